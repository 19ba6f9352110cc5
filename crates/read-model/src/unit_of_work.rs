use std::collections::HashMap;

use serde_json::Value;

use crate::{
    AggregateId, EventKind, QueryDescriptor, QueryResult, ReadModelEntity, Record, Result,
    Sequence,
    store::{ChangeSet, Guard, Mutation, ProcessedEntry, ReadModelStore},
};

type Key = (String, AggregateId);

/// Stages read-model changes and commits them in one atomic step.
///
/// Reads go through the staged state first, so a handler sees its own
/// writes before committing. Every high-water mark read from the store is
/// remembered as a guard; the commit fails with `ConcurrencyConflict` if
/// another writer moved the mark in the meantime.
///
/// Nothing reaches the store until [`UnitOfWork::commit`]. Dropping or
/// rolling back discards all staged changes.
pub struct UnitOfWork<'a, S: ReadModelStore + ?Sized> {
    store: &'a S,
    changes: ChangeSet,
    documents: HashMap<Key, Option<Value>>,
    marks: HashMap<Key, Sequence>,
    finished: bool,
}

impl<'a, S: ReadModelStore + ?Sized> UnitOfWork<'a, S> {
    pub fn begin(store: &'a S) -> Self {
        Self {
            store,
            changes: ChangeSet::new(),
            documents: HashMap::new(),
            marks: HashMap::new(),
            finished: false,
        }
    }

    /// Loads a record, seeing staged upserts and deletes.
    pub async fn get_record(&self, collection: &str, id: AggregateId) -> Result<Option<Record>> {
        if let Some(staged) = self.documents.get(&(collection.to_string(), id)) {
            return Ok(staged
                .as_ref()
                .map(|document| Record::new(id, document.clone())));
        }
        self.store.get(collection, id).await
    }

    /// Loads and decodes an entity, seeing staged changes.
    pub async fn get<T: ReadModelEntity>(&self, id: AggregateId) -> Result<Option<T>> {
        self.get_record(T::COLLECTION, id)
            .await?
            .map(T::from_record)
            .transpose()
    }

    /// Queries committed state only. Staged changes are not visible here.
    pub async fn query(
        &self,
        collection: &str,
        descriptor: &QueryDescriptor,
    ) -> Result<QueryResult<Record>> {
        self.store.query(collection, descriptor).await
    }

    /// The high-water mark for an aggregate, as this unit of work sees it.
    ///
    /// The first store read for a key registers a guard on the value read.
    pub async fn high_water_mark(
        &mut self,
        collection: &str,
        id: AggregateId,
    ) -> Result<Option<Sequence>> {
        let key = (collection.to_string(), id);
        if let Some(sequence) = self.marks.get(&key) {
            return Ok(Some(*sequence));
        }
        if let Some(guard) = self.changes.guard_for(collection, id) {
            return Ok(guard.expected);
        }

        let expected = self.store.high_water_mark(collection, id).await?;
        self.changes.guards.push(Guard {
            collection: collection.to_string(),
            aggregate_id: id,
            expected,
        });
        Ok(expected)
    }

    /// Stages an insert or replace of a typed entity.
    pub fn add<T: ReadModelEntity>(&mut self, entity: &T) -> Result<()> {
        let record = entity.to_record()?;
        self.upsert(T::COLLECTION, record);
        Ok(())
    }

    /// Stages an insert or replace of a raw record.
    pub fn upsert(&mut self, collection: &str, record: Record) {
        self.documents.insert(
            (collection.to_string(), record.id),
            Some(record.document.clone()),
        );
        self.changes.mutations.push(Mutation::Upsert {
            collection: collection.to_string(),
            record,
        });
    }

    /// Stages removal of a typed entity. Removing an absent entity is fine.
    pub fn delete<T: ReadModelEntity>(&mut self, id: AggregateId) {
        self.delete_record(T::COLLECTION, id);
    }

    pub fn delete_record(&mut self, collection: &str, id: AggregateId) {
        self.documents.insert((collection.to_string(), id), None);
        self.changes.mutations.push(Mutation::Delete {
            collection: collection.to_string(),
            id,
        });
    }

    /// Stages the processed-event log entry. A later entry for the same key
    /// replaces an earlier one.
    pub fn record_processed(
        &mut self,
        collection: &str,
        id: AggregateId,
        sequence: Sequence,
        kind: EventKind,
    ) {
        self.marks.insert((collection.to_string(), id), sequence);
        self.changes
            .processed
            .retain(|p| !(p.collection == collection && p.aggregate_id == id));
        self.changes
            .processed
            .push(ProcessedEntry::new(collection, id, sequence, kind));
    }

    /// Whether nothing has been staged yet.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Applies every staged change atomically. An empty unit of work commits
    /// trivially without touching the store.
    pub async fn commit(mut self) -> Result<()> {
        self.finished = true;
        let changes = std::mem::take(&mut self.changes);
        if changes.is_empty() {
            return Ok(());
        }

        let staged = changes.len();
        self.store.commit(changes).await?;
        metrics::counter!("read_model_commits").increment(1);
        tracing::debug!(staged, "unit of work committed");
        Ok(())
    }

    /// Discards every staged change.
    pub fn rollback(mut self) {
        self.finished = true;
        if !self.changes.is_empty() {
            tracing::debug!(staged = self.changes.len(), "unit of work rolled back");
        }
    }
}

impl<S: ReadModelStore + ?Sized> Drop for UnitOfWork<'_, S> {
    fn drop(&mut self) {
        if !self.finished && !self.changes.is_empty() {
            tracing::debug!(
                staged = self.changes.len(),
                "unit of work dropped without commit, discarding staged changes"
            );
        }
    }
}
