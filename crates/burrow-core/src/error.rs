use crate::repository::UserId;
use thiserror::Error;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
}

/// Failures and non-success outcomes reported by a [`Repository`][crate::Repository].
///
/// `Conflict`, `NotFound`, `Gone` and `NoContent` are expected outcomes that
/// callers turn into responses; the remaining variants are backend faults.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The value already has a live record.
    #[error("value already stored under id {id}")]
    Conflict { id: u64 },
    #[error("no record with id {0}")]
    NotFound(u64),
    #[error("record {0} has been deleted")]
    Gone(u64),
    #[error("user {0} owns no records")]
    NoContent(UserId),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    /// A batch asked for a block starting below the next free identifier.
    /// Nothing was written; the caller may re-read the index and retry.
    #[error("start index {start_index} is behind the next free index {next_index}")]
    StaleIndex { start_index: u64, next_index: u64 },
    /// A batch was rejected or rolled back as a whole.
    #[error("batch rolled back: {0}")]
    Batch(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
}

impl StorageError {
    /// Whether the error is a backend fault rather than an expected outcome.
    pub fn is_backend_fault(&self) -> bool {
        !matches!(
            self,
            StorageError::Conflict { .. }
                | StorageError::NotFound(_)
                | StorageError::Gone(_)
                | StorageError::NoContent(_)
                | StorageError::StaleIndex { .. }
        )
    }
}
