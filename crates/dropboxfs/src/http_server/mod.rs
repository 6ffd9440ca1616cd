//! Optional runtime status endpoint.
//!
//! When enabled on the command line, a small axum server exposes liveness
//! and cache statistics for anyone curious what the mount is doing.

pub mod health;
pub mod stats;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::fs::NodeCache;
use crate::sync::ChangeNotifier;

#[derive(Clone)]
pub struct StatusState {
    pub cache: Arc<NodeCache>,
    pub notifier: Arc<ChangeNotifier>,
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/_status/livez", get(health::handler))
        .route("/_status/stats", get(stats::handler))
        .with_state(state)
}

/// Serve the status endpoint until the process exits.
pub async fn serve(state: StatusState, port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "status endpoint listening");
    axum::serve(listener, router(state)).await
}
