//! Tag-based dispatch tables, built once at startup.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use read_model::ReadModelEntity;
use serde::{Deserialize, Serialize};

use crate::projection::{EntityProjection, Projection};
use crate::views::{CatalogBrandView, CatalogTypeView};
use crate::{ProjectionError, Result};

/// Routes events to projections by aggregate type.
#[derive(Clone, Default)]
pub struct ProjectionRegistry {
    by_aggregate: HashMap<&'static str, Arc<dyn Projection>>,
}

impl ProjectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry for the catalog read models.
    pub fn catalog() -> Self {
        let mut registry = Self::new();
        registry.register(EntityProjection::<CatalogBrandView>::new());
        registry.register(EntityProjection::<CatalogTypeView>::new());
        registry
    }

    /// Registers a projection. A projection already subscribed to the same
    /// aggregate type is replaced and returned.
    pub fn register(
        &mut self,
        projection: impl Projection + 'static,
    ) -> Option<Arc<dyn Projection>> {
        let previous = self
            .by_aggregate
            .insert(projection.aggregate_type(), Arc::new(projection));
        if let Some(previous) = &previous {
            tracing::warn!(
                aggregate_type = previous.aggregate_type(),
                replaced = previous.name(),
                "projection replaced"
            );
        }
        previous
    }

    /// The projection subscribed to an aggregate type.
    pub fn resolve(&self, aggregate_type: &str) -> Option<&Arc<dyn Projection>> {
        self.by_aggregate.get(aggregate_type)
    }

    /// The projection writing a collection.
    pub fn for_collection(&self, collection: &str) -> Option<&Arc<dyn Projection>> {
        self.by_aggregate
            .values()
            .find(|projection| projection.collection() == collection)
    }

    /// Returns the number of registered projections.
    pub fn len(&self) -> usize {
        self.by_aggregate.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_aggregate.is_empty()
    }
}

/// The queries the read side answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Brands,
    Types,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Brands => "brands",
            QueryKind::Types => "types",
        }
    }
}

impl FromStr for QueryKind {
    type Err = ProjectionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "brands" => Ok(QueryKind::Brands),
            "types" => Ok(QueryKind::Types),
            other => Err(ProjectionError::MalformedRequest(format!(
                "unknown query kind {other:?}"
            ))),
        }
    }
}

/// Resolves query kinds to the collection that answers them.
#[derive(Debug, Clone, Default)]
pub struct QueryRegistry {
    collections: HashMap<QueryKind, &'static str>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry for the catalog read models.
    pub fn catalog() -> Self {
        let mut registry = Self::new();
        registry.register(QueryKind::Brands, CatalogBrandView::COLLECTION);
        registry.register(QueryKind::Types, CatalogTypeView::COLLECTION);
        registry
    }

    pub fn register(&mut self, kind: QueryKind, collection: &'static str) {
        self.collections.insert(kind, collection);
    }

    pub fn resolve(&self, kind: QueryKind) -> Result<&'static str> {
        self.collections.get(&kind).copied().ok_or_else(|| {
            ProjectionError::MalformedRequest(format!("no collection answers {}", kind.as_str()))
        })
    }
}
