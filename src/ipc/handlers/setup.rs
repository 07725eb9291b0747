use crate::bulk::{ReconcileOptions, ScoreParsing};
use crate::db;
use crate::ipc::helpers::{require_admin, require_db, respond, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::session::SessionContext;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Portal,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "portal" => Some(Self::Portal),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Portal => "setup.portal",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Portal => json!({
            "currentSession": "2024/2025",
            "defaultSession": "2024/2025",
            "strictScoreParsing": false,
            "resultsRequireFeePaid": true,
            "minPinLength": 6
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

/// Returns the merged section; `current` is untouched when any field is rejected.
fn merge_section_patch(
    section: SetupSection,
    current: &Value,
    patch: &Map<String, Value>,
) -> Result<Value, String> {
    let mut merged = current.clone();
    let obj = as_object_mut(&mut merged)?;
    for (k, v) in patch {
        match section {
            SetupSection::Portal => match k.as_str() {
                "currentSession" | "defaultSession" => {
                    let s = parse_string_max(v, k, 16)?;
                    if s.is_empty() {
                        return Err(format!("{} must not be empty", k));
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "strictScoreParsing" | "resultsRequireFeePaid" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "minPinLength" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 4, 32)?));
                }
                _ => return Err(format!("unknown portal field: {}", k)),
            },
        }
    }
    Ok(merged)
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let defaults = default_section(section);
    let saved = db::settings_get_json(conn, section.key())?;
    let Some(saved_obj) = saved.as_ref().and_then(|v| v.as_object()) else {
        return Ok(defaults);
    };
    match merge_section_patch(section, &defaults, saved_obj) {
        Ok(merged) => Ok(merged),
        Err(e) => {
            tracing::warn!(section = section.key(), error = %e, "saved setup ignored");
            Ok(defaults)
        }
    }
}

/// Typed view of the `setup.portal` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalConfig {
    pub current_session: String,
    pub default_session: String,
    pub strict_score_parsing: bool,
    pub results_require_fee_paid: bool,
    pub min_pin_length: usize,
}

impl PortalConfig {
    fn from_section(v: &Value) -> Self {
        let str_or = |key: &str| {
            v.get(key)
                .and_then(|x| x.as_str())
                .unwrap_or("2024/2025")
                .to_string()
        };
        Self {
            current_session: str_or("currentSession"),
            default_session: str_or("defaultSession"),
            strict_score_parsing: v
                .get("strictScoreParsing")
                .and_then(|x| x.as_bool())
                .unwrap_or(false),
            results_require_fee_paid: v
                .get("resultsRequireFeePaid")
                .and_then(|x| x.as_bool())
                .unwrap_or(true),
            min_pin_length: v
                .get("minPinLength")
                .and_then(|x| x.as_u64())
                .map(|n| n as usize)
                .unwrap_or(6),
        }
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            score_parsing: if self.strict_score_parsing {
                ScoreParsing::Strict
            } else {
                ScoreParsing::Permissive
            },
            default_session: self.default_session.clone(),
        }
    }
}

pub fn portal_config(conn: &Connection) -> Result<PortalConfig, HandlerErr> {
    let section = load_section(conn, SetupSection::Portal)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(PortalConfig::from_section(&section))
}

fn setup_get(conn: &Connection, _ctx: &SessionContext, _params: &Value) -> HandlerResult {
    let portal = load_section(conn, SetupSection::Portal)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "portal": portal }))
}

fn setup_update(conn: &Connection, ctx: &SessionContext, params: &Value) -> HandlerResult {
    let admin = require_admin(ctx)?;
    let section_raw = params
        .get("section")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing section"))?;
    let section = SetupSection::parse(section_raw)
        .ok_or_else(|| HandlerErr::bad_params("unknown section"))?;
    let patch_obj = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;

    let current =
        load_section(conn, section).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let merged =
        merge_section_patch(section, &current, patch_obj).map_err(HandlerErr::bad_params)?;
    db::settings_set_json(conn, section.key(), &merged)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tracing::info!(admin_id = %admin.admin_id, section = section.key(), "setup updated");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(
    state: &mut AppState,
    ctx: &SessionContext,
    req: &Request,
) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &SessionContext, &Value) -> HandlerResult =
        match req.method.as_str() {
            "setup.get" => setup_get,
            "setup.update" => setup_update,
            _ => return None,
        };
    let result = require_db(&state.db).and_then(|conn| handler(conn, ctx, &req.params));
    Some(respond(&req.id, result))
}
