//! Unified error types for the precache gateway.
//!
//! Every variant carries a stable code prefix in its `Display` output so
//! callers (and MCP clients) can match on the failure kind.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the precache gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty URL).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Site manifest could not be parsed or violates an invariant.
    #[error("INVALID_MANIFEST: {0}")]
    InvalidManifest(String),

    /// Routing rule pattern failed to compile.
    #[error("INVALID_ROUTE: {0}")]
    InvalidRoute(String),

    /// No cache entry found for the given URL.
    #[error("CACHE_MISS: {0}")]
    CacheMiss(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// A stored entry failed its integrity check.
    #[error("CACHE_ERROR: corrupt entry: {0}")]
    CorruptEntry(String),

    /// A background task panicked or was cancelled.
    #[error("INTERNAL_ERROR: {0}")]
    TaskFailed(String),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A precache manifest entry could not be retrieved.
    #[error("ASSET_FETCH_FAILED: {url}: {reason}")]
    AssetFetchFailure { url: String, reason: String },

    /// Network failed and no cached fallback exists.
    #[error("NETWORK_UNAVAILABLE: {0}")]
    NetworkUnavailable(String),

    /// Fetch timeout.
    #[error("FETCH_TIMEOUT: {0}")]
    FetchTimeout(String),

    /// Fetch response too large.
    #[error("FETCH_TOO_LARGE: {0}")]
    FetchTooLarge(String),

    /// Transport-level HTTP failure (connection refused, reset, DNS).
    #[error("HTTP_ERROR: {0}")]
    HttpError(String),
}

impl Error {
    /// Whether this error came from the network rather than from the store
    /// or from bad input.
    ///
    /// Network-first routes fall back to the cache only for these.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::FetchTimeout(_) | Error::HttpError(_) | Error::NetworkUnavailable(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::InvalidUrl(msg) => (-32003, msg.clone()),
            Error::InvalidManifest(msg) => (-32013, msg.clone()),
            Error::InvalidRoute(msg) => (-32014, msg.clone()),
            Error::CacheMiss(msg) => (-32001, msg.clone()),
            Error::AssetFetchFailure { .. } => (-32015, err.to_string()),
            Error::NetworkUnavailable(msg) => (-32016, msg.clone()),
            Error::FetchTimeout(msg) => (-32006, msg.clone()),
            Error::FetchTooLarge(msg) => (-32007, msg.clone()),
            Error::HttpError(msg) => (-32008, msg.clone()),
            Error::Database(e) => (-32002, e.to_string()),
            Error::CorruptEntry(_) => (-32002, err.to_string()),
            Error::TaskFailed(msg) => (-32603, msg.clone()),
            Error::MigrationFailed(msg) => (-32002, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
