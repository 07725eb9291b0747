use crate::auth::{self, AuthError};
use crate::db;
use crate::ipc::handlers::setup::portal_config;
use crate::ipc::helpers::{
    get_opt_str, get_required_secret, get_required_str, is_unique_violation, require_admin,
    require_db, require_signed_in, require_student, require_super_admin, respond, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{self, AdminRole, PrincipalKind, SessionContext};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

fn student_login(conn: &Connection, _ctx: &SessionContext, params: &Value) -> HandlerResult {
    let matric_number = get_required_str(params, "matricNumber")?;
    let pin = get_required_secret(params, "pin")?;

    let row: Option<(String, String, bool)> = conn
        .query_row(
            "SELECT id, pin_hash, password_changed FROM students WHERE matric_number = ?",
            [&matric_number],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((student_id, pin_hash, password_changed)) = row else {
        tracing::info!(%matric_number, "student login rejected: unknown matric number");
        return Err(AuthError::UnknownMatric.into());
    };
    if !auth::verify_secret(&pin, &pin_hash)? {
        tracing::info!(%student_id, "student login rejected: wrong pin");
        return Err(AuthError::WrongPin.into());
    }

    let token = session::create(conn, PrincipalKind::Student, &student_id)
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    tracing::info!(%student_id, "student signed in");
    Ok(json!({
        "token": token,
        "studentId": student_id,
        "passwordChanged": password_changed
    }))
}

fn admin_login(conn: &Connection, _ctx: &SessionContext, params: &Value) -> HandlerResult {
    let email = normalize_email(&get_required_str(params, "email")?);
    let password = get_required_secret(params, "password")?;

    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT id, role, password_hash FROM admins WHERE email = ?",
            [&email],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((admin_id, role, password_hash)) = row else {
        return Err(AuthError::WrongAdminCredentials.into());
    };
    if !auth::verify_secret(&password, &password_hash)? {
        tracing::info!(%admin_id, "admin login rejected");
        return Err(AuthError::WrongAdminCredentials.into());
    }

    let token = session::create(conn, PrincipalKind::Admin, &admin_id)
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    tracing::info!(%admin_id, %role, "admin signed in");
    Ok(json!({ "token": token, "adminId": admin_id, "role": role }))
}

fn logout(conn: &Connection, ctx: &SessionContext, _params: &Value) -> HandlerResult {
    require_signed_in(ctx)?;
    let token = ctx.token().unwrap_or_default();
    let removed =
        session::revoke(conn, token).map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    Ok(json!({ "loggedOut": removed }))
}

fn whoami(_conn: &Connection, ctx: &SessionContext, _params: &Value) -> HandlerResult {
    Ok(match ctx {
        SessionContext::Unauthenticated => json!({ "kind": ctx.kind() }),
        SessionContext::Student(s) => json!({
            "kind": ctx.kind(),
            "studentId": s.student_id,
            "matricNumber": s.matric_number,
            "level": s.level
        }),
        SessionContext::Admin(a) => json!({
            "kind": ctx.kind(),
            "adminId": a.admin_id,
            "email": a.email,
            "role": a.role.as_str()
        }),
    })
}

fn change_pin(conn: &Connection, ctx: &SessionContext, params: &Value) -> HandlerResult {
    let student = require_student(ctx)?;
    let current_pin = get_required_secret(params, "currentPin")?;
    let new_pin = get_required_secret(params, "newPin")?;
    let confirm_pin = get_required_secret(params, "confirmPin")?;
    let cfg = portal_config(conn)?;

    let pin_hash: String = conn
        .query_row(
            "SELECT pin_hash FROM students WHERE id = ?",
            [&student.student_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if !auth::verify_secret(&current_pin, &pin_hash)? {
        return Err(AuthError::WrongPin.into());
    }
    auth::check_new_pin(&new_pin, &confirm_pin, cfg.min_pin_length)?;
    let new_hash = auth::hash_secret(&new_pin)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "UPDATE students SET pin_hash = ?, password_changed = 1 WHERE id = ?",
        (new_hash, &student.student_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    // Other devices must sign in again with the new PIN.
    tx.execute(
        "DELETE FROM auth_sessions
         WHERE principal_kind = 'student' AND principal_id = ? AND token <> ?",
        (&student.student_id, &student.token),
    )
    .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    tracing::info!(student_id = %student.student_id, "student pin changed");
    Ok(json!({ "ok": true }))
}

pub(crate) struct NewAdmin {
    email: String,
    password: String,
    first_name: String,
    last_name: String,
    staff_id: Option<String>,
    department: Option<String>,
}

impl NewAdmin {
    pub(crate) fn from_params(params: &Value, min_len: usize) -> Result<Self, HandlerErr> {
        let email = normalize_email(&get_required_str(params, "email")?);
        if !email.contains('@') {
            return Err(HandlerErr::bad_params("email must be a valid address"));
        }
        let password = get_required_secret(params, "password")?;
        if password.chars().count() < min_len {
            return Err(HandlerErr::bad_params(format!(
                "password must be at least {} characters",
                min_len
            )));
        }
        Ok(Self {
            email,
            password,
            first_name: get_required_str(params, "firstName")?,
            last_name: get_required_str(params, "lastName")?,
            staff_id: get_opt_str(params, "staffId"),
            department: get_opt_str(params, "department"),
        })
    }

    pub(crate) fn insert(&self, conn: &Connection, role: AdminRole) -> Result<String, HandlerErr> {
        let id = Uuid::new_v4().to_string();
        let password_hash = auth::hash_secret(&self.password)?;
        conn.execute(
            "INSERT INTO admins(id, email, first_name, last_name, staff_id, department,
               role, password_hash, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &id,
                &self.email,
                &self.first_name,
                &self.last_name,
                &self.staff_id,
                &self.department,
                role.as_str(),
                password_hash,
                db::now_timestamp(),
            ),
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                HandlerErr::new("conflict", "An admin with this email already exists")
            } else {
                HandlerErr::db("db_insert_failed", e)
            }
        })?;
        Ok(id)
    }
}

fn admin_bootstrap(conn: &Connection, _ctx: &SessionContext, params: &Value) -> HandlerResult {
    let existing: i64 = conn
        .query_row("SELECT COUNT(*) FROM admins", [], |r| r.get(0))
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if existing > 0 {
        return Err(HandlerErr::new(
            "conflict",
            "an administrator already exists; sign in as an admin to add more",
        ));
    }
    let cfg = portal_config(conn)?;
    let new_admin = NewAdmin::from_params(params, cfg.min_pin_length)?;
    let admin_id = new_admin.insert(conn, AdminRole::SuperAdmin)?;
    tracing::info!(%admin_id, "bootstrapped first super admin");
    Ok(json!({ "adminId": admin_id, "role": AdminRole::SuperAdmin.as_str() }))
}

fn admins_create(conn: &Connection, ctx: &SessionContext, params: &Value) -> HandlerResult {
    let creator = require_super_admin(ctx)?;
    let role = match get_opt_str(params, "role") {
        None => AdminRole::Admin,
        Some(raw) => AdminRole::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params("role must be one of: super_admin, admin"))?,
    };
    let cfg = portal_config(conn)?;
    let new_admin = NewAdmin::from_params(params, cfg.min_pin_length)?;
    let admin_id = new_admin.insert(conn, role)?;
    tracing::info!(%admin_id, created_by = %creator.admin_id, role = role.as_str(), "admin created");
    Ok(json!({ "adminId": admin_id, "role": role.as_str() }))
}

fn admins_list(conn: &Connection, ctx: &SessionContext, _params: &Value) -> HandlerResult {
    require_admin(ctx)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, email, first_name, last_name, staff_id, department, role, created_at
             FROM admins
             ORDER BY created_at, email",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let admins = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "email": r.get::<_, String>(1)?,
                "firstName": r.get::<_, String>(2)?,
                "lastName": r.get::<_, String>(3)?,
                "staffId": r.get::<_, Option<String>>(4)?,
                "department": r.get::<_, Option<String>>(5)?,
                "role": r.get::<_, String>(6)?,
                "createdAt": r.get::<_, String>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "admins": admins }))
}

pub fn try_handle(
    state: &mut AppState,
    ctx: &SessionContext,
    req: &Request,
) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &SessionContext, &Value) -> HandlerResult =
        match req.method.as_str() {
            "auth.studentLogin" => student_login,
            "auth.adminLogin" => admin_login,
            "auth.logout" => logout,
            "auth.whoami" => whoami,
            "auth.changePin" => change_pin,
            "admin.bootstrap" => admin_bootstrap,
            "admins.create" => admins_create,
            "admins.list" => admins_list,
            _ => return None,
        };
    let result = require_db(&state.db).and_then(|conn| handler(conn, ctx, &req.params));
    Some(respond(&req.id, result))
}
