use telemon_common::error::MetricError;

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use telemon_storage::error::StorageError;
///
/// let err = StorageError::Other("disk full".to_string());
/// assert!(err.to_string().contains("disk full"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Snapshot file (de)serialization failure.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot file read/write failure.
    #[error("Storage: IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A buffered record could not be interpreted as a metric.
    #[error("Storage: invalid record: {0}")]
    InvalidRecord(#[from] MetricError),

    /// Generic storage error for cases not covered by other variants.
    #[error("Storage: {0}")]
    Other(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
