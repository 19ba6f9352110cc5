//! Catalog brands read model.

use catalog::{BRAND_AGGREGATE, BrandEvent};
use common::{AggregateId, DomainEvent};
use read_model::ReadModelEntity;
use serde::{Deserialize, Serialize};

use crate::projection::Projectable;
use crate::{ProjectionError, Result};

/// A brand as listed by the catalog: `{ "id": ..., "name": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogBrandView {
    pub id: AggregateId,
    pub name: String,
}

impl ReadModelEntity for CatalogBrandView {
    const COLLECTION: &'static str = "catalog_brands";

    fn id(&self) -> AggregateId {
        self.id
    }
}

impl Projectable for CatalogBrandView {
    const NAME: &'static str = "CatalogBrandProjection";
    const AGGREGATE_TYPE: &'static str = BRAND_AGGREGATE;

    fn from_defined(event: &DomainEvent) -> Result<Self> {
        match BrandEvent::try_from(event)? {
            BrandEvent::Defined(data) => Ok(Self {
                id: event.aggregate_id,
                name: data.name.into(),
            }),
            BrandEvent::Destroyed => Err(ProjectionError::MalformedEvent(
                "a Destroyed event does not define a brand".to_string(),
            )),
        }
    }
}
