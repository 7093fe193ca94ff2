//! Error taxonomy for the connection layer.
//!
//! # Kinds
//! - Transient I/O (`Connection`, `Timeout`): retried by the backoff retrier
//! - Circuit rejection (`CircuitOpen`): returned immediately, no I/O attempted
//! - Cancellation (`Cancelled`, `DeadlineExceeded`): propagated verbatim, never retried
//! - Everything else (`Query`, `Conversion`, `Config`, `Stopped`, `Unexpected`):
//!   surfaced to the caller unchanged on the first occurrence
//!
//! Only transient I/O consumes the retry budget. A rejected statement or a bad
//! conversion fails the same way on every attempt, and unexpected errors are
//! logged and returned rather than masked by retries.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the connection layer.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Could not reach or talk to the database (network, pool, protocol).
    #[error("connection failed: {0}")]
    Connection(String),

    /// A single attempt did not finish within its time budget.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The server rejected the statement.
    #[error("query failed: {0}")]
    Query(String),

    /// The circuit breaker refused the call.
    #[error(
        "circuit breaker is open after {failure_count} failures (last error: {})",
        .last_error.as_deref().unwrap_or("none")
    )]
    CircuitOpen {
        failure_count: u32,
        last_error: Option<String>,
    },

    /// The caller's context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The connection manager was stopped.
    #[error("connection manager is stopped")]
    Stopped,

    /// A scalar could not be converted to the requested type.
    #[error("value conversion failed: {0}")]
    Conversion(String),

    /// Invalid configuration (bad URL, unsupported driver).
    #[error("configuration error: {0}")]
    Config(String),

    /// Anything that does not fit the kinds above.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// True for caller-initiated aborts.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }

    /// True when another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Timeout(_))
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Connection(_) => "connection",
            Error::Timeout(_) => "timeout",
            Error::Query(_) => "query",
            Error::CircuitOpen { .. } => "circuit_open",
            Error::Cancelled => "cancelled",
            Error::DeadlineExceeded => "deadline_exceeded",
            Error::Stopped => "stopped",
            Error::Conversion(_) => "conversion",
            Error::Config(_) => "config",
            Error::Unexpected(_) => "unexpected",
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(e) => Error::Connection(e.to_string()),
            sqlx::Error::Tls(e) => Error::Connection(e.to_string()),
            sqlx::Error::Protocol(msg) => Error::Connection(msg),
            sqlx::Error::PoolTimedOut => Error::Connection("timed out acquiring a pooled connection".to_string()),
            sqlx::Error::PoolClosed => Error::Connection("connection pool is closed".to_string()),
            sqlx::Error::WorkerCrashed => Error::Connection("database worker crashed".to_string()),
            sqlx::Error::Configuration(e) => Error::Config(e.to_string()),
            sqlx::Error::Database(e) => Error::Query(e.to_string()),
            sqlx::Error::RowNotFound => Error::Query("no rows returned".to_string()),
            sqlx::Error::ColumnNotFound(name) => Error::Query(format!("column not found: {}", name)),
            sqlx::Error::ColumnDecode { index, source } => {
                Error::Conversion(format!("column {}: {}", index, source))
            }
            sqlx::Error::Decode(e) => Error::Conversion(e.to_string()),
            other => Error::Unexpected(other.to_string()),
        }
    }
}

/// Result alias for the connection layer.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(Error::DeadlineExceeded.is_cancellation());
        assert!(!Error::Cancelled.is_retryable());

        assert!(Error::Connection("refused".into()).is_retryable());
        assert!(Error::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!Error::Query("syntax error".into()).is_retryable());
        assert!(!Error::Unexpected("worker panicked".into()).is_retryable());

        let open = Error::CircuitOpen { failure_count: 5, last_error: None };
        assert!(!open.is_retryable());
        assert!(!open.is_cancellation());
    }

    #[test]
    fn test_error_display() {
        let err = Error::CircuitOpen {
            failure_count: 5,
            last_error: Some("connection refused".into()),
        };
        assert_eq!(
            err.to_string(),
            "circuit breaker is open after 5 failures (last error: connection refused)"
        );

        let err = Error::CircuitOpen { failure_count: 2, last_error: None };
        assert!(err.to_string().ends_with("(last error: none)"));
    }

    #[test]
    fn test_sqlx_mapping() {
        let err: Error = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, Error::Connection(_)));

        let err: Error = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), "query");
    }
}
