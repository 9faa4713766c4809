//! Error types for Cachet
//!
//! All cache-layer failures funnel through one enum. Only the transport
//! variants are meant to reach callers of the public cache operations; the
//! rest are logged and absorbed where they occur.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Cachet error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Storage
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ========================================================================
    // Transport
    // ========================================================================
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Request failed: {status} {url}")]
    RequestFailed { status: u16, url: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // General
    // ========================================================================
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // ========================================================================
    // External conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // ========================================================================
    // Other
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error reflects the outcome of the wrapped network request
    /// rather than a defect of the cache itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::RequestFailed { .. } | Error::Timeout(_) | Error::Cancelled
        )
    }

    /// Whether this is a durable-storage capacity failure
    pub fn is_quota(&self) -> bool {
        matches!(self, Error::QuotaExceeded(_))
    }

    /// Whether retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Http(_) | Error::QuotaExceeded(_))
    }

    /// Non-success response helper
    pub fn request_failed(status: u16, url: impl Into<String>) -> Self {
        Error::RequestFailed {
            status,
            url: url.into(),
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
