//! Per-request authentication context.
//!
//! The router resolves the request token into a [`SessionContext`] once and
//! hands it to every handler. Admin authority always comes from the `admins`
//! roles table.

use crate::db;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminRole {
    SuperAdmin,
    Admin,
}

impl AdminRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "super_admin" => Some(Self::SuperAdmin),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentSession {
    pub token: String,
    pub student_id: String,
    pub matric_number: String,
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSession {
    pub token: String,
    pub admin_id: String,
    pub email: String,
    pub role: AdminRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionContext {
    Unauthenticated,
    Student(StudentSession),
    Admin(AdminSession),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalKind {
    Student,
    Admin,
}

impl PrincipalKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Admin => "admin",
        }
    }
}

impl SessionContext {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "anonymous",
            Self::Student(_) => "student",
            Self::Admin(_) => "admin",
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Unauthenticated => None,
            Self::Student(s) => Some(&s.token),
            Self::Admin(a) => Some(&a.token),
        }
    }
}

pub fn resolve(conn: &Connection, token: Option<&str>) -> anyhow::Result<SessionContext> {
    let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(SessionContext::Unauthenticated);
    };
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT principal_kind, principal_id FROM auth_sessions WHERE token = ?",
            [token],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((kind, principal_id)) = row else {
        return Ok(SessionContext::Unauthenticated);
    };

    match kind.as_str() {
        "student" => {
            let student: Option<(String, String)> = conn
                .query_row(
                    "SELECT matric_number, level FROM students WHERE id = ?",
                    [&principal_id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            Ok(match student {
                Some((matric_number, level)) => SessionContext::Student(StudentSession {
                    token: token.to_string(),
                    student_id: principal_id,
                    matric_number,
                    level,
                }),
                None => SessionContext::Unauthenticated,
            })
        }
        "admin" => {
            let admin: Option<(String, String)> = conn
                .query_row(
                    "SELECT email, role FROM admins WHERE id = ?",
                    [&principal_id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            Ok(match admin.and_then(|(email, role)| Some((email, AdminRole::parse(&role)?))) {
                Some((email, role)) => SessionContext::Admin(AdminSession {
                    token: token.to_string(),
                    admin_id: principal_id,
                    email,
                    role,
                }),
                None => SessionContext::Unauthenticated,
            })
        }
        _ => Ok(SessionContext::Unauthenticated),
    }
}

pub fn create(conn: &Connection, kind: PrincipalKind, principal_id: &str) -> anyhow::Result<String> {
    let token = Uuid::new_v4().simple().to_string();
    conn.execute(
        "INSERT INTO auth_sessions(token, principal_kind, principal_id, created_at)
         VALUES(?, ?, ?, ?)",
        (&token, kind.as_str(), principal_id, db::now_timestamp()),
    )?;
    Ok(token)
}

pub fn revoke(conn: &Connection, token: &str) -> anyhow::Result<bool> {
    let n = conn.execute("DELETE FROM auth_sessions WHERE token = ?", [token])?;
    Ok(n > 0)
}

pub fn revoke_principal(conn: &Connection, kind: PrincipalKind, principal_id: &str) -> anyhow::Result<usize> {
    Ok(conn.execute(
        "DELETE FROM auth_sessions WHERE principal_kind = ? AND principal_id = ?",
        (kind.as_str(), principal_id),
    )?)
}
