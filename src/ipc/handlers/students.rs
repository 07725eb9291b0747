use crate::auth;
use crate::db;
use crate::ipc::helpers::{
    get_opt_str, get_required_str, is_unique_violation, like_pattern, parse_level, require_admin,
    require_db, require_student, respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{self, PrincipalKind, SessionContext};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use uuid::Uuid;

const DEFAULT_DEPARTMENT: &str = "Computer Science";
const DEFAULT_FACULTY: &str = "School of Information and Communication Technology";

const STUDENT_COLUMNS: &str = "id, matric_number, email, first_name, last_name, middle_name,
    level, department, faculty, phone, date_of_birth, gender, address, state_of_origin, lga,
    password_changed, created_at";

/// Profile fields a student may edit; `(param, column, required)`.
const PROFILE_FIELDS: [(&str, &str, bool); 9] = [
    ("firstName", "first_name", true),
    ("lastName", "last_name", true),
    ("middleName", "middle_name", false),
    ("phone", "phone", false),
    ("dateOfBirth", "date_of_birth", false),
    ("gender", "gender", false),
    ("address", "address", false),
    ("stateOfOrigin", "state_of_origin", false),
    ("lga", "lga", false),
];

fn student_json(r: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "matricNumber": r.get::<_, String>(1)?,
        "email": r.get::<_, String>(2)?,
        "firstName": r.get::<_, String>(3)?,
        "lastName": r.get::<_, String>(4)?,
        "middleName": r.get::<_, Option<String>>(5)?,
        "level": r.get::<_, String>(6)?,
        "department": r.get::<_, String>(7)?,
        "faculty": r.get::<_, String>(8)?,
        "phone": r.get::<_, Option<String>>(9)?,
        "dateOfBirth": r.get::<_, Option<String>>(10)?,
        "gender": r.get::<_, Option<String>>(11)?,
        "address": r.get::<_, Option<String>>(12)?,
        "stateOfOrigin": r.get::<_, Option<String>>(13)?,
        "lga": r.get::<_, Option<String>>(14)?,
        "passwordChanged": r.get::<_, bool>(15)?,
        "createdAt": r.get::<_, String>(16)?
    }))
}

pub(crate) fn load_student(conn: &Connection, student_id: &str) -> Result<Value, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS),
        [student_id],
        student_json,
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::new("not_found", "student not found"))
}

fn students_list(conn: &Connection, ctx: &SessionContext, params: &Value) -> HandlerResult {
    require_admin(ctx)?;
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<String> = Vec::new();
    if let Some(level) = get_opt_str(params, "level") {
        clauses.push("level = ?");
        binds.push(parse_level(&level)?.to_string());
    }
    if let Some(search) = get_opt_str(params, "search") {
        clauses.push(
            "(lower(matric_number) LIKE ? ESCAPE '\\'
              OR lower(first_name) LIKE ? ESCAPE '\\'
              OR lower(last_name) LIKE ? ESCAPE '\\'
              OR lower(email) LIKE ? ESCAPE '\\')",
        );
        let pattern = like_pattern(&search);
        binds.extend(std::iter::repeat(pattern).take(4));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT {} FROM students {} ORDER BY created_at DESC, matric_number",
        STUDENT_COLUMNS, where_sql
    );

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let students = stmt
        .query_map(params_from_iter(binds.iter()), student_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "students": students }))
}

pub(crate) fn students_create(conn: &Connection, ctx: &SessionContext, params: &Value) -> HandlerResult {
    let admin = require_admin(ctx)?;
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let matric_number = get_required_str(params, "matricNumber")?;
    let email = get_required_str(params, "email")?.to_ascii_lowercase();
    if !email.contains('@') {
        return Err(HandlerErr::bad_params("email must be a valid address"));
    }
    let level = parse_level(&get_required_str(params, "level")?)?;
    let department =
        get_opt_str(params, "department").unwrap_or_else(|| DEFAULT_DEPARTMENT.to_string());
    let faculty = get_opt_str(params, "faculty").unwrap_or_else(|| DEFAULT_FACULTY.to_string());

    let student_id = Uuid::new_v4().to_string();
    let pin = auth::generate_pin();
    let pin_hash = auth::hash_secret(&pin)?;
    conn.execute(
        "INSERT INTO students(id, matric_number, email, first_name, last_name, middle_name,
           level, department, faculty, phone, date_of_birth, gender, address, state_of_origin,
           lga, pin_hash, password_changed, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        params_from_iter([
            Some(student_id.clone()),
            Some(matric_number),
            Some(email),
            Some(first_name),
            Some(last_name),
            get_opt_str(params, "middleName"),
            Some(level.to_string()),
            Some(department),
            Some(faculty),
            get_opt_str(params, "phone"),
            get_opt_str(params, "dateOfBirth"),
            get_opt_str(params, "gender"),
            get_opt_str(params, "address"),
            get_opt_str(params, "stateOfOrigin"),
            get_opt_str(params, "lga"),
            Some(pin_hash),
            Some(db::now_timestamp()),
        ]),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::new(
                "conflict",
                "A student with this email or matric number already exists",
            )
        } else {
            HandlerErr::db("db_insert_failed", e)
        }
    })?;

    tracing::info!(%student_id, created_by = %admin.admin_id, "student created");
    Ok(json!({ "studentId": student_id, "pin": pin }))
}

fn students_reset_pin(conn: &Connection, ctx: &SessionContext, params: &Value) -> HandlerResult {
    let admin = require_admin(ctx)?;
    let student_id = get_required_str(params, "studentId")?;
    let pin = auth::generate_pin();
    let pin_hash = auth::hash_secret(&pin)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let changed = tx
        .execute(
            "UPDATE students SET pin_hash = ?, password_changed = 0 WHERE id = ?",
            (pin_hash, &student_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    session::revoke_principal(&tx, PrincipalKind::Student, &student_id)
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    tracing::info!(%student_id, reset_by = %admin.admin_id, "student pin reset");
    Ok(json!({ "pin": pin }))
}

fn students_delete(conn: &Connection, ctx: &SessionContext, params: &Value) -> HandlerResult {
    let admin = require_admin(ctx)?;
    let student_id = get_required_str(params, "studentId")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    for sql in [
        "DELETE FROM results WHERE student_id = ?",
        "DELETE FROM fee_payments WHERE student_id = ?",
        "DELETE FROM auth_sessions WHERE principal_kind = 'student' AND principal_id = ?",
    ] {
        tx.execute(sql, [&student_id])
            .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    }
    let removed = tx
        .execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if removed == 0 {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    tracing::info!(%student_id, deleted_by = %admin.admin_id, "student deleted");
    Ok(json!({ "ok": true }))
}

fn profile_get(conn: &Connection, ctx: &SessionContext, _params: &Value) -> HandlerResult {
    let student = require_student(ctx)?;
    Ok(json!({ "student": load_student(conn, &student.student_id)? }))
}

fn profile_update(conn: &Connection, ctx: &SessionContext, params: &Value) -> HandlerResult {
    let student = require_student(ctx)?;
    let patch = params
        .as_object()
        .ok_or_else(|| HandlerErr::bad_params("params must be an object"))?;

    let mut sets: Vec<String> = Vec::new();
    let mut binds: Vec<Option<String>> = Vec::new();
    for (key, value) in patch {
        let Some((_, column, required)) = PROFILE_FIELDS.iter().find(|(p, _, _)| *p == key.as_str()) else {
            return Err(HandlerErr::bad_params(format!(
                "{} cannot be changed from the profile",
                key
            )));
        };
        let text = match value {
            Value::Null => None,
            Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            _ => return Err(HandlerErr::bad_params(format!("{} must be string", key))),
        };
        if *required && text.is_none() {
            return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
        }
        sets.push(format!("{} = ?", column));
        binds.push(text);
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("nothing to update"));
    }
    binds.push(Some(student.student_id.clone()));

    conn.execute(
        &format!("UPDATE students SET {} WHERE id = ?", sets.join(", ")),
        params_from_iter(binds.iter()),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(json!({ "student": load_student(conn, &student.student_id)? }))
}

pub fn try_handle(
    state: &mut AppState,
    ctx: &SessionContext,
    req: &Request,
) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &SessionContext, &Value) -> HandlerResult =
        match req.method.as_str() {
            "students.list" => students_list,
            "students.create" => students_create,
            "students.resetPin" => students_reset_pin,
            "students.delete" => students_delete,
            "profile.get" => profile_get,
            "profile.update" => profile_update,
            _ => return None,
        };
    let result = require_db(&state.db).and_then(|conn| handler(conn, ctx, &req.params));
    Some(respond(&req.id, result))
}
