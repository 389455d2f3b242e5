use metrika_common::{MetricError, MetricKind};

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use metrika_common::MetricKind;
/// use metrika_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     kind: MetricKind::Gauge,
///     id: "cpu".to_string(),
/// };
/// assert!(err.is_not_found());
/// assert!(err.to_string().contains("cpu"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No metric of this kind has the id.
    #[error("Storage: {kind} metric not found (id={id})")]
    NotFound { kind: MetricKind, id: String },

    /// An upsert neither inserted nor updated a row.
    #[error("Storage: upsert of {kind} metric affected no rows (id={id})")]
    NoRowsAffected { kind: MetricKind, id: String },

    /// The write was rejected by the metric rules (e.g. counter overflow).
    #[error("Storage: {0}")]
    Metric(#[from] MetricError),

    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The schema could not be brought to the expected version.
    #[error("Storage: migration failed: {0}")]
    Migration(String),

    /// Generic storage error for cases not covered by other variants.
    #[error("Storage: {0}")]
    Other(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
