//! Unified error types for metalink-dedup.
//!
//! Every variant carries a stable uppercase code prefix in its display form.
//! None of these reach an HTTP client: the filter logs them and forwards the
//! response untouched.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the dedup pipeline and its stores.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty URL).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// No cache entry found for the given key.
    #[error("CACHE_MISS: {0}")]
    CacheMiss(String),

    /// The cache refused an open, read, or write.
    #[error("CACHE_UNAVAILABLE: {0}")]
    CacheUnavailable(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A declared or stored digest is not 32 bytes of valid base64.
    #[error("INVALID_DIGEST: {0}")]
    InvalidDigest(String),

    /// A header value or stored value is not a usable URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// The client request URL could not be retrieved from the transaction.
    #[error("MISSING_REQUEST_URL")]
    MissingRequestUrl,

    /// A stage received an event its current state cannot accept.
    #[error("INVARIANT_VIOLATION: {stage} got {event} while {state}")]
    UnexpectedEvent { stage: &'static str, state: &'static str, event: &'static str },
}

impl Error {
    /// True for errors that indicate a host integration bug rather than bad input.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Error::UnexpectedEvent { .. })
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
            Error::CacheMiss(msg) => (-32001, msg.clone()),
            Error::CacheUnavailable(msg) => (-32002, msg.clone()),
            Error::Database(e) => (-32002, e.to_string()),
            Error::MigrationFailed(msg) => (-32002, msg.clone()),
            Error::InvalidUrl(msg) => (-32003, msg.clone()),
            Error::InvalidDigest(msg) => (-32004, msg.clone()),
            Error::MissingRequestUrl => (-32005, "Client request URL unavailable".to_string()),
            Error::UnexpectedEvent { .. } => (-32603, err.to_string()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::CacheMiss("abc123".to_string());
        assert!(err.to_string().contains("CACHE_MISS"));
        assert!(err.to_string().contains("abc123"));
    }

    #[test]
    fn test_unexpected_event_display() {
        let err = Error::UnexpectedEvent { stage: "capture", state: "Done", event: "Data" };
        assert_eq!(err.to_string(), "INVARIANT_VIOLATION: capture got Data while Done");
        assert!(err.is_invariant_violation());
        assert!(!Error::MissingRequestUrl.is_invariant_violation());
    }

    #[test]
    fn test_error_to_mcp_error() {
        let err = Error::CacheMiss("abc123".to_string());
        let mcp_err: McpError = err.into();
        assert_eq!(mcp_err.code.0, -32001);

        let mcp_err: McpError = Error::InvalidDigest("short".into()).into();
        assert_eq!(mcp_err.code.0, -32004);
    }
}
