use crate::ipc::helpers::{
    get_opt_str, get_required_str, is_unique_violation, parse_level, parse_semester,
    require_admin, require_db, require_signed_in, required_level, required_semester, respond,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::session::SessionContext;
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Value};
use uuid::Uuid;

fn courses_list(conn: &Connection, ctx: &SessionContext, params: &Value) -> HandlerResult {
    require_signed_in(ctx)?;
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<&str> = Vec::new();
    if let Some(level) = get_opt_str(params, "level") {
        clauses.push("level = ?");
        binds.push(parse_level(&level)?);
    }
    if let Some(semester) = get_opt_str(params, "semester") {
        clauses.push("semester = ?");
        binds.push(parse_semester(&semester)?);
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let mut stmt = conn
        .prepare(&format!(
            "SELECT id, code, title, credit_hours, level, semester
             FROM courses {}
             ORDER BY code",
            where_sql
        ))
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let courses = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "title": r.get::<_, String>(2)?,
                "creditHours": r.get::<_, i64>(3)?,
                "level": r.get::<_, String>(4)?,
                "semester": r.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "courses": courses }))
}

pub(crate) fn courses_create(conn: &Connection, ctx: &SessionContext, params: &Value) -> HandlerResult {
    let admin = require_admin(ctx)?;
    let code = get_required_str(params, "code")?;
    let title = get_required_str(params, "title")?;
    let credit_hours = params
        .get("creditHours")
        .and_then(|v| v.as_i64())
        .filter(|n| *n > 0)
        .ok_or_else(|| HandlerErr::bad_params("creditHours must be a positive integer"))?;
    let level = required_level(params, "level")?;
    let semester = required_semester(params, "semester")?;

    let course_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, code, title, credit_hours, level, semester)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&course_id, &code, &title, credit_hours, level, semester),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::new("conflict", format!("course code {} already exists", code))
        } else {
            HandlerErr::db("db_insert_failed", e)
        }
    })?;

    tracing::info!(%course_id, %code, created_by = %admin.admin_id, "course created");
    Ok(json!({ "courseId": course_id }))
}

fn courses_delete(conn: &Connection, ctx: &SessionContext, params: &Value) -> HandlerResult {
    require_admin(ctx)?;
    let course_id = get_required_str(params, "courseId")?;
    let referenced: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM results WHERE course_id = ?",
            [&course_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if referenced > 0 {
        return Err(HandlerErr::new(
            "conflict",
            format!("course has {} recorded results", referenced),
        )
        .with_details(json!({ "results": referenced })));
    }
    let removed = conn
        .execute("DELETE FROM courses WHERE id = ?", [&course_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if removed == 0 {
        return Err(HandlerErr::new("not_found", "course not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(
    state: &mut AppState,
    ctx: &SessionContext,
    req: &Request,
) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &SessionContext, &Value) -> HandlerResult =
        match req.method.as_str() {
            "courses.list" => courses_list,
            "courses.create" => courses_create,
            "courses.delete" => courses_delete,
            _ => return None,
        };
    let result = require_db(&state.db).and_then(|conn| handler(conn, ctx, &req.params));
    Some(respond(&req.id, result))
}
