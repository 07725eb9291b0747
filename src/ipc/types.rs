use std::path::PathBuf;

use crate::bulk::Reconciliation;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Session token from `auth.studentLogin` / `auth.adminLogin`.
    #[serde(default)]
    pub token: Option<String>,
}

/// A reconciled bulk upload waiting for `bulk.commit` or `bulk.discard`.
pub struct PendingUpload {
    pub upload_id: String,
    pub reconciliation: Reconciliation,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub pending_upload: Option<PendingUpload>,
}
