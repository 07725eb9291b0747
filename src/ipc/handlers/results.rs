use crate::bulk;
use crate::grading::{self, Contribution};
use crate::ipc::handlers::fees::fee_paid;
use crate::ipc::handlers::setup::portal_config;
use crate::ipc::handlers::students::load_student;
use crate::ipc::helpers::{
    get_opt_str, get_required_str, require_admin, require_db, require_student, required_level,
    required_semester, respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::session::SessionContext;
use crate::store::{ResultLedgerEntry, ResultStore};
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Value};
use std::collections::HashSet;

const MSG_ALREADY_LISTED: &str = "This student is already in the results list";

struct StoredResult {
    json: Value,
    grade: String,
    grade_point: u8,
    credit_hours: u32,
}

fn query_results(
    conn: &Connection,
    where_sql: &str,
    binds: &[&str],
) -> Result<Vec<StoredResult>, HandlerErr> {
    let sql = format!(
        "SELECT r.id, r.course_id, c.code, c.title, c.credit_hours, r.ca_score, r.exam_score,
                r.total_score, r.grade, r.grade_point, r.session, r.semester
         FROM results r
         JOIN courses c ON c.id = r.course_id
         WHERE {}
         ORDER BY r.session, r.semester, c.code",
        where_sql
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map(params_from_iter(binds.iter()), |r| {
        let credit_hours: u32 = r.get(4)?;
        let grade: String = r.get(8)?;
        let grade_point: u8 = r.get(9)?;
        Ok(StoredResult {
            json: json!({
                "id": r.get::<_, String>(0)?,
                "courseId": r.get::<_, String>(1)?,
                "courseCode": r.get::<_, String>(2)?,
                "courseTitle": r.get::<_, String>(3)?,
                "creditHours": credit_hours,
                "caScore": r.get::<_, i64>(5)?,
                "examScore": r.get::<_, i64>(6)?,
                "totalScore": r.get::<_, i64>(7)?,
                "grade": grade,
                "gradePoint": grade_point,
                "session": r.get::<_, String>(10)?,
                "semester": r.get::<_, String>(11)?
            }),
            grade,
            grade_point,
            credit_hours,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

/// Aggregate over the stored grade points; a carryover is any `F`.
fn results_with_summary(rows: Vec<StoredResult>) -> Value {
    let summary = grading::aggregate(rows.iter().map(|r| Contribution {
        grade_point: r.grade_point,
        credit_unit: r.credit_hours,
    }));
    let carryovers = rows.iter().filter(|r| r.grade == "F").count();
    let mut summary_json = json!(summary);
    summary_json["carryovers"] = json!(carryovers);
    json!({
        "results": rows.into_iter().map(|r| r.json).collect::<Vec<_>>(),
        "summary": summary_json
    })
}

fn exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?)", table),
        [id],
        |r| r.get(0),
    )
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn entry_err(code: &'static str, index: usize, message: impl Into<String>) -> HandlerErr {
    HandlerErr::new(code, message).with_details(json!({ "index": index }))
}

pub(crate) fn results_save(conn: &Connection, ctx: &SessionContext, params: &Value) -> HandlerResult {
    let admin = require_admin(ctx)?;
    let semester = required_semester(params, "semester")?;
    let entries = params
        .get("entries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("entries must be an array"))?;
    if entries.is_empty() {
        return Err(HandlerErr::bad_params("Please add some results before saving"));
    }
    let cfg = portal_config(conn)?;

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut ledger = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let student_id = get_required_str(entry, "studentId")
            .map_err(|e| entry_err(e.code, index, e.message))?;
        let course_id = get_required_str(entry, "courseId")
            .map_err(|e| entry_err(e.code, index, e.message))?;
        let score = |key: &str| {
            entry
                .get(key)
                .and_then(|v| v.as_i64())
                .ok_or_else(|| entry_err("bad_params", index, format!("{} must be integer", key)))
        };
        let ca_score = score("caScore")?;
        let exam_score = score("examScore")?;
        if let Some(msg) = bulk::score_range_error(ca_score, exam_score) {
            return Err(entry_err("bad_params", index, msg));
        }
        if !seen.insert((student_id.clone(), course_id.clone())) {
            return Err(entry_err("bad_params", index, MSG_ALREADY_LISTED));
        }
        if !exists(conn, "students", &student_id)? {
            return Err(entry_err("not_found", index, "student not found"));
        }
        if !exists(conn, "courses", &course_id)? {
            return Err(entry_err("not_found", index, "course not found"));
        }
        ledger.push(ResultLedgerEntry {
            student_id,
            course_id,
            ca_score,
            exam_score,
            total_score: ca_score + exam_score,
            session: get_opt_str(entry, "session").unwrap_or_else(|| cfg.default_session.clone()),
            semester: semester.to_string(),
        });
    }

    let inserted = conn.insert_results(&ledger).map_err(|e| {
        tracing::warn!(error = %e, "results save failed");
        HandlerErr::new("commit_failed", e.to_string())
    })?;
    tracing::info!(inserted, %semester, saved_by = %admin.admin_id, "results saved");
    Ok(json!({ "inserted": inserted }))
}

fn results_view(conn: &Connection, ctx: &SessionContext, params: &Value) -> HandlerResult {
    let student = require_student(ctx)?;
    let level = required_level(params, "level")?;
    let semester = required_semester(params, "semester")?;
    let cfg = portal_config(conn)?;
    let session = get_opt_str(params, "session").unwrap_or_else(|| cfg.current_session.clone());

    if cfg.results_require_fee_paid
        && !fee_paid(conn, &student.student_id, semester, &cfg.current_session)?
    {
        return Err(HandlerErr::new(
            "fee_required",
            format!(
                "Please complete your fee payment to access results for {} {} Semester.",
                level, semester
            ),
        )
        .with_details(json!({ "semester": semester, "session": cfg.current_session })));
    }

    let rows = query_results(
        conn,
        "r.student_id = ? AND c.level = ? AND c.semester = ? AND r.session = ?",
        &[student.student_id.as_str(), level, semester, session.as_str()],
    )?;
    let mut out = results_with_summary(rows);
    out["level"] = json!(level);
    out["semester"] = json!(semester);
    out["session"] = json!(session);
    Ok(out)
}

fn results_for_student(conn: &Connection, ctx: &SessionContext, params: &Value) -> HandlerResult {
    require_admin(ctx)?;
    let student_id = get_required_str(params, "studentId")?;
    let student = load_student(conn, &student_id)?;
    let rows = match get_opt_str(params, "session") {
        Some(session) => query_results(
            conn,
            "r.student_id = ? AND r.session = ?",
            &[student_id.as_str(), session.as_str()],
        )?,
        None => query_results(conn, "r.student_id = ?", &[student_id.as_str()])?,
    };
    let mut out = results_with_summary(rows);
    out["student"] = student;
    Ok(out)
}

pub fn try_handle(
    state: &mut AppState,
    ctx: &SessionContext,
    req: &Request,
) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &SessionContext, &Value) -> HandlerResult =
        match req.method.as_str() {
            "results.save" => results_save,
            "results.view" => results_view,
            "results.forStudent" => results_for_student,
            _ => return None,
        };
    let result = require_db(&state.db).and_then(|conn| handler(conn, ctx, &req.params));
    Some(respond(&req.id, result))
}
