//! Error types for the fanlog pipeline

use thiserror::Error;

/// Main error type for fanlog operations.
///
/// Sink failures never reach application code through the router; they are
/// turned into notes on the event. This type is what sinks and collaborators
/// return internally, and what constructors return to the caller.
#[derive(Error, Debug)]
pub enum LogError {
    /// Severity number outside the known set (10, 20, ... 60)
    #[error("Unknown severity level: {0}")]
    UnknownLevel(u8),

    /// Severity name that does not match any level
    #[error("Unknown severity name: {0}")]
    UnknownLevelName(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error during storage operations (redb)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Mail transport rejected or failed to deliver an alert
    #[error("Mail error: {0}")]
    Mail(String),

    /// Background task failed to complete
    #[error("Task error: {0}")]
    Task(String),

    /// Logger was built outside a tokio runtime
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using LogError
pub type LogResult<T> = Result<T, LogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LogError::UnknownLevel(35);
        assert_eq!(format!("{}", err), "Unknown severity level: 35");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let log_err: LogError = io_err.into();
        assert!(matches!(log_err, LogError::Io(_)));
    }
}
