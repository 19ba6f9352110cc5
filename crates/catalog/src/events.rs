//! Catalog domain events.
//!
//! Brands and types share one lifecycle: an aggregate is defined with a
//! name and later destroyed. Both map onto the generic [`DomainEvent`]
//! envelope the projections consume.

use common::{AggregateId, DomainEvent, EventKind, Sequence};
use serde::{Deserialize, Serialize};

use crate::{BrandName, CatalogError, TypeName};

/// Routing tag of events emitted by the catalog brand aggregate.
pub const BRAND_AGGREGATE: &str = "CatalogBrand";

/// Routing tag of events emitted by the catalog type aggregate.
pub const TYPE_AGGREGATE: &str = "CatalogType";

/// Data for a brand Defined event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandDefined {
    #[serde(alias = "brand")]
    pub name: BrandName,
}

/// Data for a type Defined event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDefined {
    #[serde(alias = "type")]
    pub name: TypeName,
}

/// Events that can occur on a catalog brand.
#[derive(Debug, Clone, PartialEq)]
pub enum BrandEvent {
    Defined(BrandDefined),
    Destroyed,
}

/// Events that can occur on a catalog type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeEvent {
    Defined(TypeDefined),
    Destroyed,
}

fn envelope<T: Serialize>(
    aggregate_type: &str,
    aggregate_id: AggregateId,
    sequence: Sequence,
    defined: Option<&T>,
) -> Result<DomainEvent, CatalogError> {
    match defined {
        Some(data) => Ok(
            DomainEvent::new(aggregate_type, aggregate_id, EventKind::Defined, sequence)
                .with_payload(data)?,
        ),
        None => Ok(DomainEvent::new(
            aggregate_type,
            aggregate_id,
            EventKind::Destroyed,
            sequence,
        )),
    }
}

fn check_aggregate(event: &DomainEvent, expected: &'static str) -> Result<(), CatalogError> {
    if event.aggregate_type != expected {
        return Err(CatalogError::WrongAggregateType {
            expected,
            actual: event.aggregate_type.clone(),
        });
    }
    Ok(())
}

impl BrandEvent {
    pub fn defined(name: BrandName) -> Self {
        BrandEvent::Defined(BrandDefined { name })
    }

    /// Wraps the event in the envelope published on the bus.
    pub fn into_domain_event(
        self,
        aggregate_id: AggregateId,
        sequence: Sequence,
    ) -> Result<DomainEvent, CatalogError> {
        match self {
            BrandEvent::Defined(data) => {
                envelope(BRAND_AGGREGATE, aggregate_id, sequence, Some(&data))
            }
            BrandEvent::Destroyed => {
                envelope::<BrandDefined>(BRAND_AGGREGATE, aggregate_id, sequence, None)
            }
        }
    }
}

impl TryFrom<&DomainEvent> for BrandEvent {
    type Error = CatalogError;

    fn try_from(event: &DomainEvent) -> Result<Self, Self::Error> {
        check_aggregate(event, BRAND_AGGREGATE)?;
        match &event.kind {
            EventKind::Defined => Ok(BrandEvent::Defined(serde_json::from_value(
                event.payload_value(),
            )?)),
            EventKind::Destroyed => Ok(BrandEvent::Destroyed),
            other => Err(CatalogError::UnsupportedKind(other.clone())),
        }
    }
}

impl TypeEvent {
    pub fn defined(name: TypeName) -> Self {
        TypeEvent::Defined(TypeDefined { name })
    }

    /// Wraps the event in the envelope published on the bus.
    pub fn into_domain_event(
        self,
        aggregate_id: AggregateId,
        sequence: Sequence,
    ) -> Result<DomainEvent, CatalogError> {
        match self {
            TypeEvent::Defined(data) => {
                envelope(TYPE_AGGREGATE, aggregate_id, sequence, Some(&data))
            }
            TypeEvent::Destroyed => {
                envelope::<TypeDefined>(TYPE_AGGREGATE, aggregate_id, sequence, None)
            }
        }
    }
}

impl TryFrom<&DomainEvent> for TypeEvent {
    type Error = CatalogError;

    fn try_from(event: &DomainEvent) -> Result<Self, Self::Error> {
        check_aggregate(event, TYPE_AGGREGATE)?;
        match &event.kind {
            EventKind::Defined => Ok(TypeEvent::Defined(serde_json::from_value(
                event.payload_value(),
            )?)),
            EventKind::Destroyed => Ok(TypeEvent::Destroyed),
            other => Err(CatalogError::UnsupportedKind(other.clone())),
        }
    }
}
