//! Catalog projections and queries.
//!
//! This crate is the read side of the catalog:
//! - [`Projection`] maps one aggregate's events onto one collection
//! - [`ProjectionHandler`] applies events idempotently, in sequence order per
//!   aggregate, each inside one [`UnitOfWork`](read_model::UnitOfWork)
//! - [`ProjectionProcessor`] feeds event streams through the handler
//! - [`QueryHandler`] answers lookups by id and paged searches
//! - Two views: catalog brands and catalog types

pub mod error;
pub mod handler;
pub mod processor;
pub mod projection;
pub mod query_handler;
pub mod registry;
pub mod views;

pub use error::{ProjectionError, Result};
pub use handler::{DEFAULT_MAX_CONFLICT_RETRIES, Outcome, ProjectionHandler};
pub use processor::{DEFAULT_CONCURRENCY, ProcessorStats, ProjectionProcessor};
pub use projection::{EntityProjection, Projectable, Projection};
pub use query_handler::{QueryHandler, QueryRequest};
pub use registry::{ProjectionRegistry, QueryKind, QueryRegistry};
pub use views::{CatalogBrandView, CatalogTypeView};
