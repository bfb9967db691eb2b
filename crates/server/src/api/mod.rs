// Router composition for the connection API.

pub mod sync;
pub mod webhook;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    routing::{delete, get, post},
    Router,
};
use engram_engine::materialise::Materialiser;
use engram_engine::store::ConnectionStore;
use engram_engine::sync::SyncEngine;

use crate::sessions::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub store: ConnectionStore,
    pub sessions: Arc<SessionRegistry>,
    pub engine: SyncEngine,
    pub materialiser: Arc<Materialiser>,
    pub github_api_url: String,
    pub webhook_secret: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/sync/analyze", post(sync::analyze))
        .route("/sync/manual", post(sync::manual))
        .route("/sync/repositories", get(sync::repositories))
        .route("/sync/connected", get(sync::connected))
        .route("/sync/disconnect/:owner/:repo", delete(sync::disconnect))
        .route("/sync/sync-status", get(sync::sync_status))
        .route("/sync/auto-sync", post(sync::auto_sync))
        .route("/webhook/github", post(webhook::github_push))
        .with_state(state)
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
