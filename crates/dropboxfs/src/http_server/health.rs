use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Always answers ok while the process is alive; external healthchecks use
/// this to tell a hung mount from a dead one.
pub async fn handler() -> Response {
    let msg = serde_json::json!({"status": "ok"});
    (StatusCode::OK, Json(msg)).into_response()
}
