//! Error types for storage operations

use thiserror::Error;

use crate::retry::Retryable;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database connection failed or timed out
    #[error("failed to connect to storage backend: {0}")]
    ConnectionFailed(String),

    /// The statement lost a race with a concurrent transaction and may be re-run
    #[error("serialization conflict: {0}")]
    Conflict(String),

    /// Database query failed
    #[error("storage query failed: {0}")]
    QueryFailed(String),

    /// A counter update would leave the `i64` range
    #[error("counter {0:?} would overflow")]
    CounterOverflow(String),

    /// Invalid configuration
    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),

    /// Snapshot serialization/deserialization error
    #[error("snapshot serialization error: {0}")]
    SerializationError(String),

    /// I/O error (file access, etc.)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Retryable for StorageError {
    fn is_transient(&self) -> bool {
        match self {
            StorageError::ConnectionFailed(_) | StorageError::Conflict(_) => true,
            StorageError::IoError(err) => matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

/// SQLite result codes that are safe to retry unchanged
///
/// `SQLITE_BUSY`, `SQLITE_LOCKED` and their extended variants.
#[cfg(feature = "storage-sqlite")]
const SQLITE_RETRY_CODES: &[&str] = &["5", "6", "261", "262", "517"];

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StorageError::IoError(io_err),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StorageError::ConnectionFailed(err.to_string())
            }
            sqlx::Error::Database(ref db_err)
                if db_err
                    .code()
                    .is_some_and(|code| SQLITE_RETRY_CODES.iter().any(|c| *c == code)) =>
            {
                StorageError::Conflict(err.to_string())
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}
