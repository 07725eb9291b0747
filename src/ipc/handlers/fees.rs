use crate::db;
use crate::ipc::handlers::setup::{portal_config, PortalConfig};
use crate::ipc::helpers::{
    get_opt_f64, get_opt_str, get_required_str, like_pattern, parse_level, require_admin,
    require_db, require_student, required_semester, respond, HandlerErr, HandlerResult, SEMESTERS,
};
use crate::ipc::types::{AppState, Request};
use crate::session::SessionContext;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{json, Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeeStatus {
    Paid,
    Unpaid,
    Partial,
}

impl FeeStatus {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paid" => Some(Self::Paid),
            "unpaid" => Some(Self::Unpaid),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Unpaid => "unpaid",
            Self::Partial => "partial",
        }
    }

    fn from_amounts(amount_due: f64, amount_paid: f64) -> Self {
        if amount_due > 0.0 && amount_paid >= amount_due {
            Self::Paid
        } else if amount_paid > 0.0 && amount_paid < amount_due {
            Self::Partial
        } else {
            Self::Unpaid
        }
    }
}

fn required_status(params: &Value) -> Result<FeeStatus, HandlerErr> {
    let raw = get_required_str(params, "status")?;
    FeeStatus::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params("status must be one of: paid, unpaid, partial"))
}

pub(crate) fn fee_paid(
    conn: &Connection,
    student_id: &str,
    semester: &str,
    session: &str,
) -> Result<bool, HandlerErr> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM fee_payments
             WHERE student_id = ? AND semester = ? AND session = ?",
            (student_id, semester, session),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(status.as_deref() == Some(FeeStatus::Paid.as_str()))
}

/// `{ "First": bool, "Second": bool }` for the current session.
pub(crate) fn can_view_results(
    conn: &Connection,
    cfg: &PortalConfig,
    student_id: &str,
) -> Result<Value, HandlerErr> {
    let mut out = Map::new();
    for semester in SEMESTERS {
        let allowed = !cfg.results_require_fee_paid
            || fee_paid(conn, student_id, semester, &cfg.current_session)?;
        out.insert(semester.to_string(), Value::Bool(allowed));
    }
    Ok(Value::Object(out))
}

const FEE_COLUMNS: &str = "f.id, f.student_id, f.level, f.semester, f.session, f.amount_due,
    f.amount_paid, f.payment_date, f.status, f.created_at";

fn fee_json(r: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentId": r.get::<_, String>(1)?,
        "level": r.get::<_, String>(2)?,
        "semester": r.get::<_, String>(3)?,
        "session": r.get::<_, String>(4)?,
        "amountDue": r.get::<_, f64>(5)?,
        "amountPaid": r.get::<_, f64>(6)?,
        "paymentDate": r.get::<_, Option<String>>(7)?,
        "status": r.get::<_, String>(8)?,
        "createdAt": r.get::<_, String>(9)?
    }))
}

fn fees_list(conn: &Connection, ctx: &SessionContext, params: &Value) -> HandlerResult {
    require_admin(ctx)?;
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<String> = Vec::new();
    if let Some(status) = get_opt_str(params, "status") {
        let status = FeeStatus::parse(&status)
            .ok_or_else(|| HandlerErr::bad_params("status must be one of: paid, unpaid, partial"))?;
        clauses.push("f.status = ?");
        binds.push(status.as_str().to_string());
    }
    if let Some(level) = get_opt_str(params, "level") {
        clauses.push("s.level = ?");
        binds.push(parse_level(&level)?.to_string());
    }
    if let Some(search) = get_opt_str(params, "search") {
        clauses.push(
            "(lower(s.matric_number) LIKE ? ESCAPE '\\'
              OR lower(s.first_name || ' ' || s.last_name) LIKE ? ESCAPE '\\'
              OR lower(s.email) LIKE ? ESCAPE '\\')",
        );
        binds.extend(std::iter::repeat(like_pattern(&search)).take(3));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {}, s.matric_number, s.first_name, s.last_name, s.email, s.level
             FROM fee_payments f
             JOIN students s ON s.id = f.student_id
             {}
             ORDER BY f.created_at DESC, s.matric_number",
            FEE_COLUMNS, where_sql
        ))
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let fees = stmt
        .query_map(params_from_iter(binds.iter()), |r| {
            let mut fee = fee_json(r)?;
            fee["student"] = json!({
                "matricNumber": r.get::<_, String>(10)?,
                "firstName": r.get::<_, String>(11)?,
                "lastName": r.get::<_, String>(12)?,
                "email": r.get::<_, String>(13)?,
                "level": r.get::<_, String>(14)?
            });
            Ok(fee)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "fees": fees }))
}

pub(crate) fn fees_record(conn: &Connection, ctx: &SessionContext, params: &Value) -> HandlerResult {
    let admin = require_admin(ctx)?;
    let student_id = get_required_str(params, "studentId")?;
    let semester = required_semester(params, "semester")?;
    let session = get_required_str(params, "session")?;
    let amount_due = get_opt_f64(params, "amountDue")?
        .ok_or_else(|| HandlerErr::bad_params("missing amountDue"))?;
    let amount_paid = get_opt_f64(params, "amountPaid")?.unwrap_or(0.0);
    if amount_due < 0.0 || amount_paid < 0.0 {
        return Err(HandlerErr::bad_params("amounts must not be negative"));
    }
    let status = match get_opt_str(params, "status") {
        Some(_) => required_status(params)?,
        None => FeeStatus::from_amounts(amount_due, amount_paid),
    };

    let level: String = conn
        .query_row(
            "SELECT level FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "student not found"))?;

    let now = db::now_timestamp();
    let payment_date = (amount_paid > 0.0 || status == FeeStatus::Paid).then(|| now.clone());
    conn.execute(
        "INSERT INTO fee_payments(id, student_id, level, semester, session, amount_due,
           amount_paid, payment_date, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, semester, session) DO UPDATE SET
           level = excluded.level,
           amount_due = excluded.amount_due,
           amount_paid = excluded.amount_paid,
           payment_date = COALESCE(excluded.payment_date, fee_payments.payment_date),
           status = excluded.status",
        (
            Uuid::new_v4().to_string(),
            &student_id,
            &level,
            semester,
            &session,
            amount_due,
            amount_paid,
            payment_date,
            status.as_str(),
            &now,
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    let fee_id: String = conn
        .query_row(
            "SELECT id FROM fee_payments WHERE student_id = ? AND semester = ? AND session = ?",
            (&student_id, semester, &session),
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    tracing::info!(%fee_id, %student_id, status = status.as_str(), recorded_by = %admin.admin_id, "fee recorded");
    Ok(json!({ "feeId": fee_id, "status": status.as_str() }))
}

fn fees_update_status(conn: &Connection, ctx: &SessionContext, params: &Value) -> HandlerResult {
    let admin = require_admin(ctx)?;
    let fee_id = get_required_str(params, "feeId")?;
    let status = required_status(params)?;
    let payment_date = (status == FeeStatus::Paid).then(db::now_timestamp);
    let changed = conn
        .execute(
            "UPDATE fee_payments
             SET status = ?, payment_date = COALESCE(payment_date, ?)
             WHERE id = ?",
            (status.as_str(), payment_date, &fee_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "fee record not found"));
    }
    tracing::info!(%fee_id, status = status.as_str(), updated_by = %admin.admin_id, "fee status updated");
    Ok(json!({ "ok": true }))
}

fn fees_mine(conn: &Connection, ctx: &SessionContext, _params: &Value) -> HandlerResult {
    let student = require_student(ctx)?;
    let cfg = portal_config(conn)?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM fee_payments f
             WHERE f.student_id = ?
             ORDER BY f.session DESC, f.semester",
            FEE_COLUMNS
        ))
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let fees = stmt
        .query_map([&student.student_id], fee_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({
        "fees": fees,
        "currentSession": cfg.current_session,
        "canViewResults": can_view_results(conn, &cfg, &student.student_id)?
    }))
}

pub fn try_handle(
    state: &mut AppState,
    ctx: &SessionContext,
    req: &Request,
) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &SessionContext, &Value) -> HandlerResult =
        match req.method.as_str() {
            "fees.list" => fees_list,
            "fees.record" => fees_record,
            "fees.updateStatus" => fees_update_status,
            "fees.mine" => fees_mine,
            _ => return None,
        };
    let result = require_db(&state.db).and_then(|conn| handler(conn, ctx, &req.params));
    Some(respond(&req.id, result))
}
