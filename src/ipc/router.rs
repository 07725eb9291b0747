use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;
use crate::session::{self, SessionContext};

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let ctx = match state.db.as_ref() {
        Some(conn) => match session::resolve(conn, req.token.as_deref()) {
            Ok(ctx) => ctx,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        None => SessionContext::Unauthenticated,
    };
    tracing::debug!(id = %req.id, method = %req.method, principal = ctx.kind(), "request");

    if let Some(resp) = handlers::core::try_handle(state, &ctx, &req) {
        return resp;
    }
    if let Some(resp) = handlers::setup::try_handle(state, &ctx, &req) {
        return resp;
    }
    if let Some(resp) = handlers::demo::try_handle(state, &ctx, &req) {
        return resp;
    }
    if let Some(resp) = handlers::auth::try_handle(state, &ctx, &req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, &ctx, &req) {
        return resp;
    }
    if let Some(resp) = handlers::courses::try_handle(state, &ctx, &req) {
        return resp;
    }
    if let Some(resp) = handlers::results::try_handle(state, &ctx, &req) {
        return resp;
    }
    if let Some(resp) = handlers::bulk::try_handle(state, &ctx, &req) {
        return resp;
    }
    if let Some(resp) = handlers::fees::try_handle(state, &ctx, &req) {
        return resp;
    }
    if let Some(resp) = handlers::announcements::try_handle(state, &ctx, &req) {
        return resp;
    }
    if let Some(resp) = handlers::dashboard::try_handle(state, &ctx, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
