use thiserror::Error;

use crate::{AggregateId, Sequence};

/// Errors that can occur when reading from or writing to a read-model store.
#[derive(Debug, Error)]
pub enum ReadModelError {
    /// Another commit advanced the processed-event log for this aggregate
    /// after the unit of work read it.
    #[error(
        "Concurrency conflict for {collection}/{aggregate_id}: expected high-water mark {expected:?}, found {actual:?}"
    )]
    ConcurrencyConflict {
        collection: String,
        aggregate_id: AggregateId,
        expected: Option<Sequence>,
        actual: Option<Sequence>,
    },

    /// The store cannot serve requests right now.
    #[error("Read-model store unavailable: {0}")]
    StoreUnavailable(String),

    /// A commit was aborted part way through and fully rolled back.
    #[error("Commit aborted: {0}")]
    CommitAborted(String),

    /// A query descriptor failed validation before reaching the store.
    #[error("Malformed query: {0}")]
    MalformedQuery(String),

    /// The sequence number cannot be represented by the storage engine.
    #[error("Sequence {0} is out of range for this store")]
    SequenceOutOfRange(Sequence),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A document could not be converted to or from its entity type.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReadModelError {
    /// Whether retrying the same operation later may succeed.
    ///
    /// Malformed queries and documents fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReadModelError::ConcurrencyConflict { .. }
            | ReadModelError::StoreUnavailable(_)
            | ReadModelError::CommitAborted(_) => true,
            ReadModelError::Database(err) => !matches!(
                err,
                sqlx::Error::ColumnDecode { .. }
                    | sqlx::Error::ColumnNotFound(_)
                    | sqlx::Error::TypeNotFound { .. }
                    | sqlx::Error::Decode(_)
            ),
            ReadModelError::MalformedQuery(_)
            | ReadModelError::SequenceOutOfRange(_)
            | ReadModelError::Migration(_)
            | ReadModelError::Serialization(_) => false,
        }
    }
}

/// Result type for read-model operations.
pub type Result<T> = std::result::Result<T, ReadModelError>;
