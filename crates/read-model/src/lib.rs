//! Storage side of the catalog read models.
//!
//! - [`ReadModelStore`] is the keyed document store projections write to
//! - [`QueryBuilder`] assembles a [`QueryDescriptor`] for paged searches
//! - [`UnitOfWork`] stages mutations and commits them atomically together
//!   with the processed-event log
//! - [`InMemoryReadModelStore`] and [`PostgresReadModelStore`] implement the
//!   store contract

pub mod entity;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod result;
pub mod store;
pub mod unit_of_work;

pub use common::{AggregateId, EventKind, Sequence};
pub use entity::{ReadModelEntity, Record};
pub use error::{ReadModelError, Result};
pub use memory::{CommitFault, InMemoryReadModelStore};
pub use postgres::PostgresReadModelStore;
pub use query::{
    DEFAULT_PAGE_SIZE, Direction, MAX_PAGE_SIZE, Predicate, QueryBuilder, QueryDescriptor,
    SortKey,
};
pub use result::QueryResult;
pub use store::{ChangeSet, Guard, Mutation, ProcessedEntry, ReadModelStore, ReadModelStoreExt};
pub use unit_of_work::UnitOfWork;
