//! HTTP gateway.
//!
//! Translates requests into [`LifecycleOrchestrator`] calls and maps
//! [`OrchestratorError`](crate::container::OrchestratorError) kinds onto
//! status codes. Every error reply has the shape
//! `{"status": "error", "message": "..."}`.

pub mod error;
pub mod handlers;
pub mod types;

pub use error::ApiError;

use crate::container::LifecycleOrchestrator;
use anyhow::Context;
use axum::Router;
use axum::routing::{delete, get, post};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: LifecycleOrchestrator,
}

/// Build the router with all lifecycle routes.
pub fn create_router(orchestrator: LifecycleOrchestrator) -> Router {
    let state = AppState { orchestrator };

    Router::new()
        .route("/containers", get(handlers::list_containers))
        .route("/containers/{name}", get(handlers::inspect_container))
        .route("/version", get(handlers::get_version))
        .route("/create", post(handlers::create_container))
        .route("/destroy", delete(handlers::destroy_without_name))
        .route("/destroy/", delete(handlers::destroy_without_name))
        .route("/destroy/{name}", delete(handlers::destroy_container))
        .route("/start/{name}", post(handlers::start_container))
        .route("/stop/{name}", post(handlers::stop_container))
        .route("/health", get(handlers::health))
        .fallback(handlers::route_not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `addr` until interrupted.
///
/// # Errors
///
/// Fails if the address cannot be bound or the server stops with an error.
pub async fn serve(addr: SocketAddr, orchestrator: LifecycleOrchestrator) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("API server listening on {}", listener.local_addr()?);

    axum::serve(listener, create_router(orchestrator))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server failed")?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
