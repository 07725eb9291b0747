use crate::db;
use crate::ipc::helpers::{
    get_opt_str, get_required_str, parse_level, require_admin, require_db, require_student,
    respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::session::SessionContext;
use rusqlite::{Connection, Row};
use serde_json::{json, Value};
use uuid::Uuid;

const ANNOUNCEMENT_COLUMNS: &str =
    "id, title, content, is_general, target_level, created_by, created_at";

fn announcement_json(r: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "title": r.get::<_, String>(1)?,
        "content": r.get::<_, String>(2)?,
        "isGeneral": r.get::<_, bool>(3)?,
        "targetLevel": r.get::<_, Option<String>>(4)?,
        "createdBy": r.get::<_, String>(5)?,
        "createdAt": r.get::<_, String>(6)?
    }))
}

pub(crate) fn announcements_create(conn: &Connection, ctx: &SessionContext, params: &Value) -> HandlerResult {
    let admin = require_admin(ctx)?;
    let title = get_required_str(params, "title")?;
    let content = get_required_str(params, "content")?;
    let is_general = match params.get("isGeneral") {
        None | Some(Value::Null) => true,
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params("isGeneral must be boolean"))?,
    };
    let target_level = if is_general {
        None
    } else {
        let raw = get_opt_str(params, "targetLevel").ok_or_else(|| {
            HandlerErr::bad_params("targetLevel is required for level-specific announcements")
        })?;
        Some(parse_level(&raw)?)
    };

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO announcements(id, title, content, is_general, target_level, created_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &title,
            &content,
            is_general,
            target_level,
            &admin.admin_id,
            db::now_timestamp(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    tracing::info!(announcement_id = %id, is_general, "announcement created");
    Ok(json!({ "announcementId": id }))
}

fn list_where(conn: &Connection, where_sql: &str, level: Option<&str>) -> HandlerResult {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM announcements {} ORDER BY created_at DESC, id",
            ANNOUNCEMENT_COLUMNS, where_sql
        ))
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = match level {
        Some(level) => stmt.query_map([level], announcement_json),
        None => stmt.query_map([], announcement_json),
    }
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "announcements": rows }))
}

fn announcements_list(conn: &Connection, ctx: &SessionContext, _params: &Value) -> HandlerResult {
    require_admin(ctx)?;
    list_where(conn, "", None)
}

fn announcements_delete(conn: &Connection, ctx: &SessionContext, params: &Value) -> HandlerResult {
    require_admin(ctx)?;
    let id = get_required_str(params, "id")?;
    let removed = conn
        .execute("DELETE FROM announcements WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if removed == 0 {
        return Err(HandlerErr::new("not_found", "announcement not found"));
    }
    Ok(json!({ "ok": true }))
}

fn announcements_feed(conn: &Connection, ctx: &SessionContext, _params: &Value) -> HandlerResult {
    let student = require_student(ctx)?;
    list_where(
        conn,
        "WHERE is_general = 1 OR target_level = ?",
        Some(student.level.as_str()),
    )
}

pub fn try_handle(
    state: &mut AppState,
    ctx: &SessionContext,
    req: &Request,
) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &SessionContext, &Value) -> HandlerResult =
        match req.method.as_str() {
            "announcements.create" => announcements_create,
            "announcements.list" => announcements_list,
            "announcements.delete" => announcements_delete,
            "announcements.feed" => announcements_feed,
            _ => return None,
        };
    let result = require_db(&state.db).and_then(|conn| handler(conn, ctx, &req.params));
    Some(respond(&req.id, result))
}
