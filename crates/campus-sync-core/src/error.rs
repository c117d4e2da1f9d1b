use thiserror::Error;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Errors raised by `CacheManager`.
///
/// Disk failures never show up here. They are logged and the call degrades to
/// memory-only behavior.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("No fresh cache entry for key: {0}")]
    NotFound(String),

    #[error("Failed to serialize value for key {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

/// Failures reported by a `Fetcher`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request timed out")]
    Timeout,

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,
}

impl FetchError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 | 403 => FetchError::Unauthorized,
            _ => FetchError::ServerError(format!(
                "Status {}: {}",
                status,
                Self::truncate_body(body)
            )),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_connect() || e.is_request() {
            FetchError::NetworkUnavailable(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::from_status(status, "")
        } else {
            FetchError::ServerError(e.to_string())
        }
    }
}

/// A payload that fetched fine but could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to decode payload: {0}")]
pub struct DecodeError(pub String);

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError(e.to_string())
    }
}

/// Why a refresh task did not produce a fresh value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Compact classification of a `RefreshError`, for status lines and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    NetworkUnavailable,
    ServerError,
    Unauthorized,
    Decode,
}

impl RefreshError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RefreshError::Fetch(FetchError::Timeout) => FailureKind::Timeout,
            RefreshError::Fetch(FetchError::NetworkUnavailable(_)) => {
                FailureKind::NetworkUnavailable
            }
            RefreshError::Fetch(FetchError::ServerError(_)) => FailureKind::ServerError,
            RefreshError::Fetch(FetchError::Unauthorized) => FailureKind::Unauthorized,
            RefreshError::Decode(_) => FailureKind::Decode,
        }
    }
}

/// Errors from targeted orchestrator calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("No refresh task registered under name: {0}")]
    UnknownTask(String),

    #[error("Refresh task registered twice: {0}")]
    DuplicateTask(String),
}
