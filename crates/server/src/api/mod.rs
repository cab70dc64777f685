// REST surface over the stores and the relay core.

pub mod admin;
pub mod chat;
pub mod streams;
pub mod vods;

use std::sync::Arc;

use axum::Router;
use serde::Serialize;

use crate::state::AppState;

/// The bare `{"ok": true}` acknowledgement most mutating endpoints return.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(streams::router(state.clone()))
        .merge(chat::router(state.clone()))
        .merge(vods::router(state.clone()))
        .merge(admin::router(state))
}
