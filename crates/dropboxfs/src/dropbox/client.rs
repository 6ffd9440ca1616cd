//! Remote client adapter over the Dropbox HTTP API.
//!
//! [`RemoteClient`] is the seam the rest of the crate is written against;
//! tests substitute a scripted implementation. [`DropboxClient`] is the real
//! thing, speaking JSON to `api.dropboxapi.com` and raw bytes to
//! `content.dropboxapi.com`. The adapter normalises pagination (callers see
//! fully drained listings) and classifies errors, but never retries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use super::error::ApiError;
use super::longpoll::LongpollClient;
use super::types::{FileMeta, FolderMeta, ListPage, LongpollResult, Metadata};

/// Page size for folder listings.
const LIST_LIMIT: u32 = 2000;

/// Typed surface of the remote service, as the node layer needs it.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// One page of a non-recursive listing of `path`.
    async fn list_folder(&self, path: &str) -> Result<ListPage, ApiError>;

    /// One page past `cursor`.
    async fn list_folder_continue(&self, cursor: &str) -> Result<ListPage, ApiError>;

    /// A cursor positioned at "now", without returning entries.
    async fn latest_cursor(&self, path: &str, recursive: bool) -> Result<String, ApiError>;

    /// Block server-side until something changes past `cursor` or `timeout`
    /// elapses. Sent without authorization; the cursor carries identity.
    async fn longpoll(&self, cursor: &str, timeout: Duration) -> Result<LongpollResult, ApiError>;

    /// Overwrite `path` with `data`, muting notifications on other clients.
    async fn upload(&self, path: &str, data: Vec<u8>) -> Result<FileMeta, ApiError>;

    /// Fetch the whole object at `path`.
    async fn download(&self, path: &str) -> Result<Vec<u8>, ApiError>;

    async fn move_entry(&self, from: &str, to: &str) -> Result<Metadata, ApiError>;

    async fn delete(&self, path: &str) -> Result<Metadata, ApiError>;

    async fn create_folder(&self, path: &str) -> Result<FolderMeta, ApiError>;

    /// Exhaustively list `path`, following the `has_more` chain.
    async fn list_folder_all(&self, path: &str) -> Result<Vec<Metadata>, ApiError> {
        let mut page = self.list_folder(path).await?;
        let mut entries = std::mem::take(&mut page.entries);
        while page.has_more {
            page = self.list_folder_continue(&page.cursor).await?;
            entries.append(&mut page.entries);
        }
        Ok(entries)
    }

    /// Drain every page past `cursor`, returning the entries and the final
    /// cursor to resume from.
    async fn drain_continue(&self, cursor: &str) -> Result<(Vec<Metadata>, String), ApiError> {
        let mut page = self.list_folder_continue(cursor).await?;
        let mut entries = std::mem::take(&mut page.entries);
        while page.has_more {
            page = self.list_folder_continue(&page.cursor).await?;
            entries.append(&mut page.entries);
        }
        Ok((entries, page.cursor))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CursorResponse {
    cursor: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RelocationResponse {
    metadata: Metadata,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateFolderResponse {
    metadata: FolderMeta,
}

/// HTTP client for the Dropbox API.
#[derive(Debug, Clone)]
pub struct DropboxClient {
    api_base: Url,
    content_base: Url,
    http: Client,
    longpoll: LongpollClient,
}

impl DropboxClient {
    pub fn new(token: &str) -> Result<Self, ApiError> {
        Self::with_bases(
            token,
            Url::parse("https://api.dropboxapi.com/").expect("static url"),
            Url::parse("https://content.dropboxapi.com/").expect("static url"),
            LongpollClient::new()?,
        )
    }

    /// Construct against explicit hosts. Used by tests pointed at a local
    /// server.
    pub fn with_bases(
        token: &str,
        api_base: Url,
        content_base: Url,
        longpoll: LongpollClient,
    ) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ApiError::Protocol(format!("invalid token: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);

        let http = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(ApiError::from)?;

        Ok(Self {
            api_base,
            content_base,
            http,
            longpoll,
        })
    }

    /// POST a JSON RPC to the api host and decode the JSON reply.
    async fn rpc<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<T, ApiError> {
        let url = self
            .api_base
            .join(endpoint)
            .map_err(|e| ApiError::Protocol(e.to_string()))?;

        let response = self.http.post(url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &text));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Protocol(e.to_string()))
    }

    /// POST to the content host. The routing arguments ride in the
    /// `Dropbox-API-Arg` header; the body is the payload.
    async fn content_rpc(
        &self,
        endpoint: &str,
        arg: serde_json::Value,
        body: Vec<u8>,
    ) -> Result<reqwest::Response, ApiError> {
        let url = self
            .content_base
            .join(endpoint)
            .map_err(|e| ApiError::Protocol(e.to_string()))?;

        let response = self
            .http
            .post(url)
            .header("Dropbox-API-Arg", arg.to_string())
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &text));
        }
        Ok(response)
    }
}

#[async_trait]
impl RemoteClient for DropboxClient {
    async fn list_folder(&self, path: &str) -> Result<ListPage, ApiError> {
        self.rpc(
            "2/files/list_folder",
            serde_json::json!({
                "path": path,
                "recursive": false,
                "limit": LIST_LIMIT,
            }),
        )
        .await
    }

    async fn list_folder_continue(&self, cursor: &str) -> Result<ListPage, ApiError> {
        self.rpc(
            "2/files/list_folder/continue",
            serde_json::json!({ "cursor": cursor }),
        )
        .await
    }

    async fn latest_cursor(&self, path: &str, recursive: bool) -> Result<String, ApiError> {
        let response: CursorResponse = self
            .rpc(
                "2/files/list_folder/get_latest_cursor",
                serde_json::json!({
                    "path": path,
                    "recursive": recursive,
                    "limit": LIST_LIMIT,
                }),
            )
            .await?;
        Ok(response.cursor)
    }

    async fn longpoll(&self, cursor: &str, timeout: Duration) -> Result<LongpollResult, ApiError> {
        self.longpoll.poll(cursor, timeout).await
    }

    async fn upload(&self, path: &str, data: Vec<u8>) -> Result<FileMeta, ApiError> {
        let response = self
            .content_rpc(
                "2/files/upload",
                serde_json::json!({
                    "path": path,
                    "mode": "overwrite",
                    "autorename": false,
                    "mute": true,
                }),
                data,
            )
            .await?;
        response
            .json::<FileMeta>()
            .await
            .map_err(|e| ApiError::Protocol(e.to_string()))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let response = self
            .content_rpc("2/files/download", serde_json::json!({ "path": path }), Vec::new())
            .await?;
        let bytes = response.bytes().await.map_err(ApiError::from)?;
        Ok(bytes.to_vec())
    }

    async fn move_entry(&self, from: &str, to: &str) -> Result<Metadata, ApiError> {
        let response: RelocationResponse = self
            .rpc(
                "2/files/move_v2",
                serde_json::json!({ "from_path": from, "to_path": to }),
            )
            .await?;
        Ok(response.metadata)
    }

    async fn delete(&self, path: &str) -> Result<Metadata, ApiError> {
        let response: RelocationResponse = self
            .rpc("2/files/delete_v2", serde_json::json!({ "path": path }))
            .await?;
        Ok(response.metadata)
    }

    async fn create_folder(&self, path: &str) -> Result<FolderMeta, ApiError> {
        let response: CreateFolderResponse = self
            .rpc(
                "2/files/create_folder_v2",
                serde_json::json!({ "path": path, "autorename": false }),
            )
            .await?;
        Ok(response.metadata)
    }
}
