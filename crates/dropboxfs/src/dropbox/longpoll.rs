//! No-auth transport for the change long-poll.
//!
//! The notify host rejects requests that carry an `Authorization` header;
//! identity is baked into the cursor. This client is therefore built without
//! default headers and kept separate from the authenticated one.

use std::time::Duration;

use reqwest::Client;
use url::Url;

use super::error::ApiError;
use super::types::LongpollResult;

/// Ceiling the service accepts for the server-side timeout.
const MAX_TIMEOUT: Duration = Duration::from_secs(480);

#[derive(Debug, Clone)]
pub struct LongpollClient {
    endpoint: Url,
    http: Client,
}

impl LongpollClient {
    pub fn new() -> Result<Self, ApiError> {
        Self::with_endpoint(
            Url::parse("https://notify.dropboxapi.com/2/files/list_folder/longpoll")
                .expect("static url"),
        )
    }

    pub fn with_endpoint(endpoint: Url) -> Result<Self, ApiError> {
        let http = Client::builder().build().map_err(ApiError::from)?;
        Ok(Self { endpoint, http })
    }

    pub async fn poll(&self, cursor: &str, timeout: Duration) -> Result<LongpollResult, ApiError> {
        let timeout = timeout.min(MAX_TIMEOUT);
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&serde_json::json!({
                "cursor": cursor,
                "timeout": timeout.as_secs(),
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &text));
        }
        response
            .json::<LongpollResult>()
            .await
            .map_err(|e| ApiError::Protocol(e.to_string()))
    }
}
