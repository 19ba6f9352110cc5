//! Catalog read-model views.

mod catalog_brands;
mod catalog_types;

pub use catalog_brands::CatalogBrandView;
pub use catalog_types::CatalogTypeView;
