//! Error kinds for the remote adapter.
//!
//! The adapter classifies failures but never retries; retry policy belongs to
//! the callers that know whether an operation is safe to repeat.

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Network failures, HTTP 5xx and rate limiting. Safe to retry with
    /// backoff.
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// The remote answered with something we could not decode.
    #[error("malformed remote response: {0}")]
    Protocol(String),
}

impl ApiError {
    /// Classify an HTTP error response. Dropbox reports most routing errors
    /// as 409 with a machine-readable `error_summary` in the body.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ApiError::PermissionDenied(body.to_string())
            }
            StatusCode::CONFLICT => {
                if body.contains("not_found") {
                    ApiError::NotFound(body.to_string())
                } else {
                    ApiError::Conflict(body.to_string())
                }
            }
            StatusCode::TOO_MANY_REQUESTS => ApiError::Transient(body.to_string()),
            s if s.is_server_error() => ApiError::Transient(body.to_string()),
            s => ApiError::Protocol(format!("unexpected status {s}: {body}")),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient(_))
    }

    /// The errno reported to the kernel once retries are exhausted.
    pub fn errno(&self) -> libc::c_int {
        match self {
            ApiError::NotFound(_) => libc::ENOENT,
            ApiError::PermissionDenied(_) => libc::EACCES,
            ApiError::Conflict(_) => libc::EEXIST,
            ApiError::Transient(_) | ApiError::Protocol(_) => libc::EIO,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Protocol(err.to_string())
        } else {
            ApiError::Transient(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropbox_409_not_found_is_not_found() {
        let e = ApiError::from_status(
            StatusCode::CONFLICT,
            r#"{"error_summary": "path/not_found/..."}"#,
        );
        assert!(matches!(e, ApiError::NotFound(_)));
        assert_eq!(e.errno(), libc::ENOENT);
    }

    #[test]
    fn dropbox_409_other_is_conflict() {
        let e = ApiError::from_status(
            StatusCode::CONFLICT,
            r#"{"error_summary": "path/conflict/file/..."}"#,
        );
        assert!(matches!(e, ApiError::Conflict(_)));
        assert_eq!(e.errno(), libc::EEXIST);
    }

    #[test]
    fn rate_limit_and_5xx_are_transient() {
        assert!(ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(ApiError::from_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!ApiError::from_status(StatusCode::UNAUTHORIZED, "").is_transient());
    }
}
