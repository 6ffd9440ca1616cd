//! Cache statistics endpoint.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::StatusState;

/// Snapshot of the node cache and change pollers.
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub cached_files: usize,
    pub cached_dirs: usize,
    pub pollers: Vec<String>,
}

pub async fn handler(State(state): State<StatusState>) -> Response {
    let response = StatsResponse {
        cached_files: state.cache.cached_file_count(),
        cached_dirs: state.cache.cached_dir_count(),
        pollers: state.notifier.poller_paths(),
    };
    (axum::http::StatusCode::OK, Json(response)).into_response()
}
