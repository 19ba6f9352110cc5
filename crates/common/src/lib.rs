//! Types shared by every crate on the read side: aggregate identifiers,
//! event sequence numbers and the inbound [`DomainEvent`] envelope.

pub mod event;
pub mod types;

pub use event::{DomainEvent, EventKind};
pub use types::{AggregateId, Sequence};
