use crate::bulk::{self, CommitError, ProcessedResult};
use crate::ipc::handlers::setup::portal_config;
use crate::ipc::helpers::{
    get_opt_str, get_required_str, require_admin, require_db, required_semester, respond,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, PendingUpload, Request};
use crate::session::SessionContext;
use serde_json::{json, Value};
use std::path::PathBuf;
use uuid::Uuid;

fn row_json(r: &ProcessedResult) -> Value {
    let mut v = json!(r);
    if let Some(grade) = r.grade() {
        v["grade"] = json!(grade.to_string());
    }
    v
}

fn bulk_template(state: &mut AppState, ctx: &SessionContext, params: &Value) -> HandlerResult {
    require_db(&state.db)?;
    require_admin(ctx)?;
    let csv = bulk::template_csv();
    let written = match get_opt_str(params, "outPath") {
        Some(out) => {
            let out_path = PathBuf::from(out);
            if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
            }
            std::fs::write(&out_path, &csv)
                .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
            Some(out_path.to_string_lossy().to_string())
        }
        None => None,
    };
    Ok(json!({
        "csv": csv,
        "fileName": bulk::TEMPLATE_FILE_NAME,
        "outPath": written
    }))
}

fn bulk_preview(state: &mut AppState, ctx: &SessionContext, params: &Value) -> HandlerResult {
    let AppState {
        db, pending_upload, ..
    } = state;
    let conn = require_db(db)?;
    let admin = require_admin(ctx)?;

    let csv_text = params.get("csvText").and_then(|v| v.as_str());
    let text = match (get_opt_str(params, "inPath"), csv_text) {
        (Some(in_path), _) => std::fs::read_to_string(&in_path).map_err(|e| {
            HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "inPath": in_path }))
        })?,
        (None, Some(text)) => text.to_string(),
        (None, None) => return Err(HandlerErr::bad_params("missing inPath or csvText")),
    };
    let rows =
        bulk::parse_rows(&text).map_err(|e| HandlerErr::new("parse_failed", e.to_string()))?;
    let opts = portal_config(conn)?.reconcile_options();
    let reconciliation = bulk::reconcile(&rows, conn, &opts);

    let upload_id = Uuid::new_v4().to_string();
    let out = json!({
        "uploadId": upload_id,
        "rowsParsed": reconciliation.all.len(),
        "validCount": reconciliation.valid.len(),
        "errorCount": reconciliation.errors.len(),
        "rows": reconciliation.all.iter().map(row_json).collect::<Vec<_>>()
    });
    tracing::info!(
        %upload_id,
        rows = reconciliation.all.len(),
        valid = reconciliation.valid.len(),
        errors = reconciliation.errors.len(),
        previewed_by = %admin.admin_id,
        "bulk upload previewed"
    );
    // A new preview replaces any upload still waiting.
    *pending_upload = Some(PendingUpload {
        upload_id,
        reconciliation,
    });
    Ok(out)
}

fn bulk_commit(state: &mut AppState, ctx: &SessionContext, params: &Value) -> HandlerResult {
    let AppState {
        db, pending_upload, ..
    } = state;
    let conn = require_db(db)?;
    let admin = require_admin(ctx)?;
    let upload_id = get_required_str(params, "uploadId")?;
    let semester = required_semester(params, "semester")?;

    let pending = pending_upload
        .as_ref()
        .filter(|p| p.upload_id == upload_id)
        .ok_or_else(|| HandlerErr::new("not_found", "no pending upload with this id"))?;

    let inserted = match bulk::commit(&pending.reconciliation, conn, semester) {
        Ok(n) => n,
        Err(CommitError::NoValidRows) => {
            return Err(HandlerErr::new("no_valid_rows", CommitError::NoValidRows.to_string()))
        }
        Err(e) => {
            tracing::warn!(%upload_id, error = %e, "bulk commit failed");
            return Err(HandlerErr::new("commit_failed", e.to_string()));
        }
    };
    *pending_upload = None;
    tracing::info!(
        %upload_id,
        inserted,
        %semester,
        committed_by = %admin.admin_id,
        "bulk upload committed"
    );
    Ok(json!({ "inserted": inserted }))
}

fn bulk_discard(state: &mut AppState, ctx: &SessionContext, params: &Value) -> HandlerResult {
    require_db(&state.db)?;
    require_admin(ctx)?;
    let upload_id = get_required_str(params, "uploadId")?;
    match state.pending_upload.take() {
        Some(p) if p.upload_id == upload_id => {
            tracing::info!(%upload_id, "bulk upload discarded");
            Ok(json!({ "discarded": true }))
        }
        other => {
            state.pending_upload = other;
            Err(HandlerErr::new("not_found", "no pending upload with this id"))
        }
    }
}

pub fn try_handle(
    state: &mut AppState,
    ctx: &SessionContext,
    req: &Request,
) -> Option<serde_json::Value> {
    let handler: fn(&mut AppState, &SessionContext, &Value) -> HandlerResult =
        match req.method.as_str() {
            "bulk.template" => bulk_template,
            "bulk.preview" => bulk_preview,
            "bulk.commit" => bulk_commit,
            "bulk.discard" => bulk_discard,
            _ => return None,
        };
    Some(respond(&req.id, handler(state, ctx, &req.params)))
}
