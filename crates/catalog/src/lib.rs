//! Catalog bounded context, as seen from the read side.
//!
//! - [`BrandEvent`] and [`TypeEvent`] describe what the catalog aggregates emit
//! - [`BrandName`] and [`TypeName`] are the validated names those events carry
//! - [`CatalogError`] covers invalid names and events that do not belong here

pub mod error;
pub mod events;
pub mod value_objects;

pub use error::CatalogError;
pub use events::{
    BRAND_AGGREGATE, BrandDefined, BrandEvent, TYPE_AGGREGATE, TypeDefined, TypeEvent,
};
pub use value_objects::{BrandName, MAX_NAME_LENGTH, TypeName};
