//! Core projection trait and the generic entity projection.

use std::marker::PhantomData;

use common::DomainEvent;
use read_model::ReadModelEntity;
use serde_json::Value;

use crate::Result;

/// Maps the events of one aggregate type onto one read-model collection.
///
/// A projection only decides what a `Defined` event looks like as a
/// document. Idempotency, ordering and deletes are handled once for every
/// projection by [`ProjectionHandler`](crate::ProjectionHandler).
pub trait Projection: Send + Sync {
    /// Returns the name of this projection.
    fn name(&self) -> &'static str;

    /// The routing tag of the aggregate this projection subscribes to.
    fn aggregate_type(&self) -> &'static str;

    /// The collection this projection writes.
    fn collection(&self) -> &'static str;

    /// Builds the entity document from a `Defined` event.
    fn define(&self, event: &DomainEvent) -> Result<Value>;
}

/// An entity type that knows how to build itself from its aggregate's
/// `Defined` event.
pub trait Projectable: ReadModelEntity {
    const NAME: &'static str;
    const AGGREGATE_TYPE: &'static str;

    fn from_defined(event: &DomainEvent) -> Result<Self>;
}

/// A [`Projection`] for any [`Projectable`] entity.
pub struct EntityProjection<T> {
    _entity: PhantomData<fn() -> T>,
}

impl<T: Projectable> EntityProjection<T> {
    pub fn new() -> Self {
        Self {
            _entity: PhantomData,
        }
    }
}

impl<T: Projectable> Default for EntityProjection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Projectable> Projection for EntityProjection<T> {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn aggregate_type(&self) -> &'static str {
        T::AGGREGATE_TYPE
    }

    fn collection(&self) -> &'static str {
        T::COLLECTION
    }

    fn define(&self, event: &DomainEvent) -> Result<Value> {
        Ok(T::from_defined(event)?.to_record()?.document)
    }
}
