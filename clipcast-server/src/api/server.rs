//! HTTP server setup and routing
//!
//! Sets up the axum HTTP server with routes for tree, playback, volume,
//! upload, speech test, and the SSE event stream.

use super::handlers;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::orchestrator::Orchestrator;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use clipcast_common::events::EventBus;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Uploads up to 64 MiB.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub orchestrator: Arc<Orchestrator>,
    pub bus: EventBus,
    pub port: u16,
}

/// Build the API router.
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        // Health endpoint
        .route("/health", get(handlers::health))
        // Tree
        .route("/tree", get(handlers::get_tree))
        .route("/directories", post(handlers::make_directory))
        .route("/nodes/:id/edit", post(handlers::edit_node))
        .route("/nodes/:id/move", post(handlers::move_node))
        .route("/nodes/:id", delete(handlers::delete_node))
        .route("/upload", post(handlers::upload))
        // Playback
        .route("/play", post(handlers::play))
        .route("/stop", post(handlers::stop))
        .route("/playing", get(handlers::get_now_playing))
        // Volume
        .route("/volume", get(handlers::get_volume))
        .route("/volume", post(handlers::set_volume))
        .route("/volume/ceiling", get(handlers::get_volume_ceiling))
        .route("/volume/ceiling", post(handlers::set_volume_ceiling))
        // Speech
        .route("/speech/test", post(handlers::speech_test))
        // SSE event stream
        .route("/events", get(super::sse::event_stream))
        // Attach application context
        .with_state(ctx)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        // Enable CORS for local access
        .layer(CorsLayer::permissive())
}

/// Run the HTTP API server until shutdown.
pub async fn run(config: &Config, orchestrator: Arc<Orchestrator>) -> Result<()> {
    let ctx = AppContext {
        bus: orchestrator.event_bus(),
        orchestrator,
        port: config.port,
    };
    let app = create_router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {addr}: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Http(format!("Server error: {e}")))?;

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::error!("Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
