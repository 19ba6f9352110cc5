//! Catalog types read model.

use catalog::{TYPE_AGGREGATE, TypeEvent};
use common::{AggregateId, DomainEvent};
use read_model::ReadModelEntity;
use serde::{Deserialize, Serialize};

use crate::projection::Projectable;
use crate::{ProjectionError, Result};

/// A product type as listed by the catalog: `{ "id": ..., "name": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogTypeView {
    pub id: AggregateId,
    pub name: String,
}

impl ReadModelEntity for CatalogTypeView {
    const COLLECTION: &'static str = "catalog_types";

    fn id(&self) -> AggregateId {
        self.id
    }
}

impl Projectable for CatalogTypeView {
    const NAME: &'static str = "CatalogTypeProjection";
    const AGGREGATE_TYPE: &'static str = TYPE_AGGREGATE;

    fn from_defined(event: &DomainEvent) -> Result<Self> {
        match TypeEvent::try_from(event)? {
            TypeEvent::Defined(data) => Ok(Self {
                id: event.aggregate_id,
                name: data.name.into(),
            }),
            TypeEvent::Destroyed => Err(ProjectionError::MalformedEvent(
                "a Destroyed event does not define a type".to_string(),
            )),
        }
    }
}
