use crate::grading::{self, Contribution};
use crate::ipc::handlers::fees::can_view_results;
use crate::ipc::handlers::setup::portal_config;
use crate::ipc::handlers::students::load_student;
use crate::ipc::helpers::{
    require_admin, require_db, require_student, respond, HandlerErr, HandlerResult, LEVELS,
};
use crate::ipc::types::{AppState, Request};
use crate::session::SessionContext;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

fn count(conn: &Connection, sql: &str, bind: Option<&str>) -> Result<i64, HandlerErr> {
    match bind {
        Some(b) => conn.query_row(sql, [b], |r| r.get(0)),
        None => conn.query_row(sql, [], |r| r.get(0)),
    }
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn dashboard_admin(conn: &Connection, ctx: &SessionContext, _params: &Value) -> HandlerResult {
    require_admin(ctx)?;
    let mut by_level = Map::new();
    for level in LEVELS {
        let n = count(conn, "SELECT COUNT(*) FROM students WHERE level = ?", Some(level))?;
        by_level.insert(level.to_string(), json!(n));
    }
    let mut fees = Map::new();
    for status in ["paid", "unpaid", "partial"] {
        let n = count(conn, "SELECT COUNT(*) FROM fee_payments WHERE status = ?", Some(status))?;
        fees.insert(status.to_string(), json!(n));
    }
    Ok(json!({
        "students": {
            "total": count(conn, "SELECT COUNT(*) FROM students", None)?,
            "byLevel": by_level
        },
        "courses": count(conn, "SELECT COUNT(*) FROM courses", None)?,
        "results": count(conn, "SELECT COUNT(*) FROM results", None)?,
        "fees": fees,
        "announcements": count(conn, "SELECT COUNT(*) FROM announcements", None)?
    }))
}

fn dashboard_student(conn: &Connection, ctx: &SessionContext, _params: &Value) -> HandlerResult {
    let student = require_student(ctx)?;
    let cfg = portal_config(conn)?;
    let profile = load_student(conn, &student.student_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT semester, status FROM fee_payments
             WHERE student_id = ? AND session = ?
             ORDER BY semester",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let fee_status = stmt
        .query_map((&student.student_id, &cfg.current_session), |r| {
            Ok(json!({
                "semester": r.get::<_, String>(0)?,
                "status": r.get::<_, String>(1)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(json!({
        "student": profile,
        "currentSession": cfg.current_session,
        "feeStatus": fee_status,
        "canViewResults": can_view_results(conn, &cfg, &student.student_id)?
    }))
}

fn course_err(index: usize, message: impl Into<String>) -> HandlerErr {
    HandlerErr::bad_params(message).with_details(json!({ "index": index }))
}

/// Stateless; works without a workspace or session.
fn cgp_calculate(params: &Value) -> HandlerResult {
    let courses = params
        .get("courses")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("courses must be an array"))?;

    let mut contributions = Vec::with_capacity(courses.len());
    for (index, course) in courses.iter().enumerate() {
        let credit_unit = course
            .get("creditUnit")
            .and_then(|v| v.as_u64())
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| course_err(index, "creditUnit must be a non-negative integer"))?;
        let letter = course
            .get("grade")
            .and_then(|v| v.as_str())
            .ok_or_else(|| course_err(index, "missing grade"))?;
        let grade_point = grading::grade_point_for_letter(letter)
            .ok_or_else(|| course_err(index, format!("unknown grade: {}", letter.trim())))?;
        contributions.push(Contribution {
            grade_point,
            credit_unit,
        });
    }
    Ok(json!(grading::aggregate(contributions)))
}

pub fn try_handle(
    state: &mut AppState,
    ctx: &SessionContext,
    req: &Request,
) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &SessionContext, &Value) -> HandlerResult =
        match req.method.as_str() {
            "dashboard.admin" => dashboard_admin,
            "dashboard.student" => dashboard_student,
            "cgp.calculate" => return Some(respond(&req.id, cgp_calculate(&req.params))),
            _ => return None,
        };
    let result = require_db(&state.db).and_then(|conn| handler(conn, ctx, &req.params));
    Some(respond(&req.id, result))
}
