//! HTTP API for the file relay.
//!
//! Routes:
//! - `POST   /api/file/upload` - multipart upload (`file`, `sender`, `receiver`)
//! - `GET    /api/file/list` - all files, newest first
//! - `GET    /api/file/inbox/{receiver}` - files addressed to a receiver
//! - `GET    /api/file/download/{token}` - stream a file as an attachment
//! - `DELETE /api/file/{token}` - delete a file
//! - `GET    /health` - liveness probe

mod error;
mod handlers;

use std::net::SocketAddr;

use anyhow::Context;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::AppError;
pub use handlers::FileView;

use crate::config::ServerConfig;
use crate::storage::StorageService;

/// Builds the router with body limit, CORS and request tracing applied.
pub fn router(storage: StorageService, config: &ServerConfig) -> Router {
    let router = Router::new()
        .route("/api/file/upload", post(handlers::upload))
        .route("/api/file/list", get(handlers::list))
        .route("/api/file/inbox/{receiver}", get(handlers::inbox))
        .route("/api/file/download/{token}", get(handlers::download))
        .route("/api/file/{token}", delete(handlers::delete))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(storage);

    if config.cors_permissive {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Serves the API until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(storage: StorageService, config: &ServerConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.host, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(
        addr = %listener.local_addr().unwrap_or(addr),
        backend = storage.backend_name(),
        "File relay listening"
    );

    axum::serve(listener, router(storage, config))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server failed")
}
