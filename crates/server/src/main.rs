// engram-server: HTTP surface + scheduler wiring.

mod api;
mod error;
mod sessions;

use std::sync::Arc;

use anyhow::Context;
use engram_engine::config::EngineConfig;
use engram_engine::materialise::Materialiser;
use engram_engine::oracle::AnthropicOracle;
use engram_engine::store::ConnectionStore;
use engram_engine::sync::SyncEngine;
use tokio::net::TcpListener;
use tracing::{info, warn};

use api::AppState;
use sessions::SessionRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = EngineConfig::load();

    let store = ConnectionStore::open(
        &config.store.resolved_db_path(),
        &config.store.resolved_fallback_path(),
    );
    let loaded = store.initialize().context("failed to initialize connection store")?;
    info!(connections = loaded, "connection store loaded");

    let oracle = Arc::new(AnthropicOracle::from_settings(&config.oracle));
    if !oracle.is_configured() {
        warn!("oracle API key not configured; analyses will be degraded");
    }

    let github_api_url = config.github.resolved_api_url();
    let materialiser =
        Arc::new(Materialiser::new(store.clone(), oracle.clone(), github_api_url.clone()));
    let engine =
        SyncEngine::new(store.clone(), oracle, config.sync.clone(), github_api_url.clone());
    let scheduler = engine.start();

    let state = AppState {
        store,
        sessions: Arc::new(SessionRegistry::new()),
        engine,
        materialiser,
        github_api_url,
        webhook_secret: config.server.resolve_webhook_secret(),
    };

    let addr = config.server.listen_addr.clone();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind listener on {addr}"))?;
    info!(listen_addr = %addr, "starting engram server");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited unexpectedly")?;

    // Let in-flight cycles reach a safe point and persist cursors.
    scheduler.shutdown().await;
    info!("scheduler stopped, exiting");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
