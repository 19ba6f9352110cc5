//! Projection error types.

use std::time::Duration;

use catalog::CatalogError;
use common::AggregateId;
use read_model::ReadModelError;
use thiserror::Error;

/// Errors that can occur while projecting events or answering queries.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// An error occurred in the read-model store.
    #[error("Read model error: {0}")]
    ReadModel(#[from] ReadModelError),

    /// Failed to deserialize a stored document.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The event payload cannot be turned into an entity. Redelivering the
    /// same event fails the same way.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// A query request was rejected before reaching the store.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// The handler call was abandoned after its deadline. Nothing was
    /// committed.
    #[error("Projection timed out after {0:?}")]
    Timeout(Duration),

    /// Every commit attempt lost a race with another writer.
    #[error("Gave up on {aggregate_id} after {attempts} conflicting commits")]
    ConflictRetriesExhausted {
        aggregate_id: AggregateId,
        attempts: u32,
    },
}

impl ProjectionError {
    /// Whether redelivering the event or repeating the query may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProjectionError::ReadModel(err) => err.is_retryable(),
            ProjectionError::Timeout(_) | ProjectionError::ConflictRetriesExhausted { .. } => true,
            ProjectionError::Deserialization(_)
            | ProjectionError::MalformedEvent(_)
            | ProjectionError::MalformedRequest(_) => false,
        }
    }
}

impl From<CatalogError> for ProjectionError {
    fn from(err: CatalogError) -> Self {
        ProjectionError::MalformedEvent(err.to_string())
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
