use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::api::{self, AppState};
use crate::config::LmsConfig;
use crate::db::{DbHandle, LmsDb};
use crate::ws;

/// Build the full application router with the API and the WebSocket.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = state.config.server.cors_permissive;
    let app = api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    if cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Open the database and serve until Ctrl+C.
pub async fn start_server(config: LmsConfig) -> Result<()> {
    let db_path = config.database.path.clone();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let db = LmsDb::new(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    let addr = config.bind_addr();
    let state = Arc::new(AppState::new(DbHandle::new(db), config));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, db = %db_path.display(), "LMS server listening");
    println!("LMS running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
