//! Catalog error types.

use common::EventKind;
use thiserror::Error;

/// Errors raised while building or decoding catalog events.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A brand or type name failed validation.
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// The event was emitted by a different aggregate.
    #[error("Expected a {expected} event, got {actual}")]
    WrongAggregateType {
        expected: &'static str,
        actual: String,
    },

    /// The event kind has no catalog meaning.
    #[error("Unsupported event kind: {0}")]
    UnsupportedKind(EventKind),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
