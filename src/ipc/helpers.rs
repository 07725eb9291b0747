use crate::auth::AuthError;
use crate::ipc::error::{err, ok};
use crate::session::{AdminRole, AdminSession, SessionContext, StudentSession};
use rusqlite::Connection;
use serde_json::Value;

pub const LEVELS: [&str; 2] = ["ND1", "ND2"];
pub const SEMESTERS: [&str; 2] = ["First", "Second"];

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn db(code: &'static str, e: impl std::fmt::Display) -> Self {
        Self::new(code, e.to_string())
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<AuthError> for HandlerErr {
    fn from(e: AuthError) -> Self {
        let code = match e {
            AuthError::UnknownMatric | AuthError::WrongPin | AuthError::WrongAdminCredentials => {
                "unauthenticated"
            }
            AuthError::PinMismatch | AuthError::PinTooShort(_) => "bad_params",
            AuthError::Hashing(_) => "hash_failed",
        };
        Self::new(code, e.to_string())
    }
}

pub type HandlerResult = Result<Value, HandlerErr>;

pub fn respond(id: &str, result: HandlerResult) -> Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

pub fn require_db(db: &Option<Connection>) -> Result<&Connection, HandlerErr> {
    db.as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn require_student(ctx: &SessionContext) -> Result<&StudentSession, HandlerErr> {
    match ctx {
        SessionContext::Student(s) => Ok(s),
        SessionContext::Unauthenticated => Err(HandlerErr::new("unauthenticated", "sign in first")),
        SessionContext::Admin(_) => Err(HandlerErr::new("forbidden", "student session required")),
    }
}

pub fn require_admin(ctx: &SessionContext) -> Result<&AdminSession, HandlerErr> {
    match ctx {
        SessionContext::Admin(a) => Ok(a),
        SessionContext::Unauthenticated => Err(HandlerErr::new("unauthenticated", "sign in first")),
        SessionContext::Student(_) => Err(HandlerErr::new(
            "forbidden",
            "You don't have admin privileges",
        )),
    }
}

pub fn require_super_admin(ctx: &SessionContext) -> Result<&AdminSession, HandlerErr> {
    let admin = require_admin(ctx)?;
    if admin.role != AdminRole::SuperAdmin {
        return Err(HandlerErr::new("forbidden", "super admin role required"));
    }
    Ok(admin)
}

pub fn require_signed_in(ctx: &SessionContext) -> Result<(), HandlerErr> {
    match ctx {
        SessionContext::Unauthenticated => Err(HandlerErr::new("unauthenticated", "sign in first")),
        _ => Ok(()),
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Secrets are compared as given, without trimming.
pub fn get_required_secret(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_opt_f64(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

fn canonical(value: &str, allowed: &[&'static str], key: &str) -> Result<&'static str, HandlerErr> {
    allowed
        .iter()
        .find(|a| a.eq_ignore_ascii_case(value.trim()))
        .copied()
        .ok_or_else(|| {
            HandlerErr::bad_params(format!("{} must be one of: {}", key, allowed.join(", ")))
        })
}

pub fn parse_level(value: &str) -> Result<&'static str, HandlerErr> {
    canonical(value, &LEVELS, "level")
}

pub fn parse_semester(value: &str) -> Result<&'static str, HandlerErr> {
    canonical(value, &SEMESTERS, "semester")
}

pub fn required_level(params: &Value, key: &str) -> Result<&'static str, HandlerErr> {
    parse_level(&get_required_str(params, key)?)
}

pub fn required_semester(params: &Value, key: &str) -> Result<&'static str, HandlerErr> {
    parse_semester(&get_required_str(params, key)?)
}

/// `%term%` for a case-insensitive LIKE search.
pub fn like_pattern(term: &str) -> String {
    let escaped = term
        .to_ascii_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
