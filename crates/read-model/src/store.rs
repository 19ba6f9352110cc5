use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    AggregateId, EventKind, QueryDescriptor, QueryResult, ReadModelEntity, Record, Result, Sequence,
};

/// One entry of the processed-event log.
///
/// The log keeps a single high-water mark per `(collection, aggregate)`. The
/// entry outlives the entity: after a destroy, the entry is what stops an
/// older redelivered event from bringing the entity back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEntry {
    pub collection: String,
    pub aggregate_id: AggregateId,
    pub sequence: Sequence,
    pub kind: EventKind,
}

impl ProcessedEntry {
    pub fn new(
        collection: impl Into<String>,
        aggregate_id: AggregateId,
        sequence: Sequence,
        kind: EventKind,
    ) -> Self {
        Self {
            collection: collection.into(),
            aggregate_id,
            sequence,
            kind,
        }
    }
}

/// A staged change to a projected entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Upsert { collection: String, record: Record },
    Delete { collection: String, id: AggregateId },
}

impl Mutation {
    pub fn collection(&self) -> &str {
        match self {
            Mutation::Upsert { collection, .. } | Mutation::Delete { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> AggregateId {
        match self {
            Mutation::Upsert { record, .. } => record.id,
            Mutation::Delete { id, .. } => *id,
        }
    }
}

/// Optimistic check on the processed-event log.
///
/// The commit fails with `ConcurrencyConflict` unless the high-water mark for
/// the key still equals `expected` at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    pub collection: String,
    pub aggregate_id: AggregateId,
    pub expected: Option<Sequence>,
}

/// Everything a unit of work commits in one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub guards: Vec<Guard>,
    pub mutations: Vec<Mutation>,
    pub processed: Vec<ProcessedEntry>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A change set with no mutations and no log entries. Guards alone do not
    /// make it non-empty.
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty() && self.processed.is_empty()
    }

    /// Number of staged writes.
    pub fn len(&self) -> usize {
        self.mutations.len() + self.processed.len()
    }

    /// The guard registered for a key, if any.
    pub fn guard_for(&self, collection: &str, aggregate_id: AggregateId) -> Option<&Guard> {
        self.guards
            .iter()
            .find(|g| g.collection == collection && g.aggregate_id == aggregate_id)
    }

    /// Every aggregate id this change set reads or writes.
    pub fn touched_ids(&self) -> impl Iterator<Item = AggregateId> + '_ {
        self.guards
            .iter()
            .map(|g| g.aggregate_id)
            .chain(self.mutations.iter().map(Mutation::id))
            .chain(self.processed.iter().map(|p| p.aggregate_id))
    }
}

/// Durable keyed storage for projected entities.
///
/// Writes only happen through [`ReadModelStore::commit`], which applies a
/// whole [`ChangeSet`] or nothing. Reads observe either the state before or
/// after a commit, never a mix. Implementations must be thread-safe.
#[async_trait]
pub trait ReadModelStore: Send + Sync {
    /// Returns the current projection, or `None` if it was never projected or
    /// has been destroyed.
    async fn get(&self, collection: &str, id: AggregateId) -> Result<Option<Record>>;

    /// Filters, counts, sorts and pages a collection.
    ///
    /// `total` in the result counts all matches before paging; `elapsed_ms`
    /// covers the scan, filter and sort.
    async fn query(
        &self,
        collection: &str,
        descriptor: &QueryDescriptor,
    ) -> Result<QueryResult<Record>>;

    /// The highest sequence applied for an aggregate, retained after deletes.
    async fn high_water_mark(&self, collection: &str, id: AggregateId)
    -> Result<Option<Sequence>>;

    /// Applies a change set atomically.
    ///
    /// Guards are checked first. Mutations are applied before log entries, and
    /// a failure at any point leaves the store exactly as it was. Deleting an
    /// absent entity is not an error.
    async fn commit(&self, changes: ChangeSet) -> Result<()>;

    /// Drops every entity and log entry of a collection, for rebuilds.
    async fn clear(&self, collection: &str) -> Result<()>;

    /// Verifies the store can serve requests.
    async fn health_check(&self) -> Result<()>;
}

#[async_trait]
impl<S> ReadModelStore for Arc<S>
where
    S: ReadModelStore + ?Sized,
{
    async fn get(&self, collection: &str, id: AggregateId) -> Result<Option<Record>> {
        (**self).get(collection, id).await
    }

    async fn query(
        &self,
        collection: &str,
        descriptor: &QueryDescriptor,
    ) -> Result<QueryResult<Record>> {
        (**self).query(collection, descriptor).await
    }

    async fn high_water_mark(
        &self,
        collection: &str,
        id: AggregateId,
    ) -> Result<Option<Sequence>> {
        (**self).high_water_mark(collection, id).await
    }

    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        (**self).commit(changes).await
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        (**self).clear(collection).await
    }

    async fn health_check(&self) -> Result<()> {
        (**self).health_check().await
    }
}

/// Typed convenience methods over any store.
#[async_trait]
pub trait ReadModelStoreExt: ReadModelStore {
    /// Loads and decodes one entity.
    async fn get_entity<T: ReadModelEntity>(&self, id: AggregateId) -> Result<Option<T>> {
        self.get(T::COLLECTION, id)
            .await?
            .map(T::from_record)
            .transpose()
    }

    /// Runs a query and decodes every record of the page.
    async fn query_entities<T: ReadModelEntity>(
        &self,
        descriptor: &QueryDescriptor,
    ) -> Result<QueryResult<T>> {
        self.query(T::COLLECTION, descriptor)
            .await?
            .try_map(T::from_record)
    }
}

impl<T: ReadModelStore + ?Sized> ReadModelStoreExt for T {}
