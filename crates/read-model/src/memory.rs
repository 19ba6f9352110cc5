use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{RwLock, RwLockWriteGuard};

use crate::{
    AggregateId, QueryDescriptor, QueryResult, ReadModelError, Record, Result, Sequence,
    result::elapsed_ms_since,
    store::{ChangeSet, Mutation, ProcessedEntry, ReadModelStore},
};

const SHARD_COUNT: usize = 16;

/// Where an injected failure interrupts the next commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitFault {
    /// After entity mutations are applied, before the log is appended.
    AfterMutations,
    /// After the log is appended, just before the commit completes.
    BeforeCompletion,
}

#[derive(Debug, Default)]
struct Shard {
    documents: HashMap<String, HashMap<AggregateId, Value>>,
    processed: HashMap<String, HashMap<AggregateId, ProcessedEntry>>,
}

impl Shard {
    fn document(&self, collection: &str, id: AggregateId) -> Option<&Value> {
        self.documents.get(collection)?.get(&id)
    }

    fn high_water_mark(&self, collection: &str, id: AggregateId) -> Option<Sequence> {
        self.processed
            .get(collection)?
            .get(&id)
            .map(|entry| entry.sequence)
    }

    fn put_document(
        &mut self,
        collection: &str,
        id: AggregateId,
        value: Option<Value>,
    ) -> Option<Value> {
        match value {
            Some(value) => self
                .documents
                .entry(collection.to_string())
                .or_default()
                .insert(id, value),
            None => self.documents.get_mut(collection)?.remove(&id),
        }
    }

    fn put_processed(
        &mut self,
        collection: &str,
        id: AggregateId,
        entry: Option<ProcessedEntry>,
    ) -> Option<ProcessedEntry> {
        match entry {
            Some(entry) => self
                .processed
                .entry(collection.to_string())
                .or_default()
                .insert(id, entry),
            None => self.processed.get_mut(collection)?.remove(&id),
        }
    }
}

/// Prior state of one slot touched by a commit, restored on abort.
enum Undo {
    Document {
        shard: usize,
        collection: String,
        id: AggregateId,
        previous: Option<Value>,
    },
    Processed {
        shard: usize,
        collection: String,
        id: AggregateId,
        previous: Option<ProcessedEntry>,
    },
}

/// Write guards over the shards one commit touches, in ascending order.
struct LockedShards<'a> {
    guards: Vec<(usize, RwLockWriteGuard<'a, Shard>)>,
}

impl LockedShards<'_> {
    fn get(&self, index: usize) -> Result<&Shard> {
        self.guards
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, guard)| &**guard)
            .ok_or_else(|| Self::not_locked(index))
    }

    fn get_mut(&mut self, index: usize) -> Result<&mut Shard> {
        self.guards
            .iter_mut()
            .find(|(i, _)| *i == index)
            .map(|(_, guard)| &mut **guard)
            .ok_or_else(|| Self::not_locked(index))
    }

    fn not_locked(index: usize) -> ReadModelError {
        ReadModelError::CommitAborted(format!("shard {index} was not locked for this commit"))
    }

    fn rollback(&mut self, journal: Vec<Undo>) {
        for undo in journal.into_iter().rev() {
            match undo {
                Undo::Document {
                    shard,
                    collection,
                    id,
                    previous,
                } => {
                    if let Ok(shard) = self.get_mut(shard) {
                        shard.put_document(&collection, id, previous);
                    }
                }
                Undo::Processed {
                    shard,
                    collection,
                    id,
                    previous,
                } => {
                    if let Ok(shard) = self.get_mut(shard) {
                        shard.put_processed(&collection, id, previous);
                    }
                }
            }
        }
    }

    /// Applies mutations, then log entries, journaling every overwritten slot.
    fn apply(
        &mut self,
        mutations: Vec<Mutation>,
        processed: Vec<ProcessedEntry>,
        fault: Option<CommitFault>,
        journal: &mut Vec<Undo>,
    ) -> Result<()> {
        for mutation in mutations {
            let shard = InMemoryReadModelStore::shard_index(mutation.id());
            let (collection, id, value) = match mutation {
                Mutation::Upsert { collection, record } => {
                    (collection, record.id, Some(record.document))
                }
                Mutation::Delete { collection, id } => (collection, id, None),
            };
            let previous = self.get_mut(shard)?.put_document(&collection, id, value);
            journal.push(Undo::Document {
                shard,
                collection,
                id,
                previous,
            });
        }

        if fault == Some(CommitFault::AfterMutations) {
            return Err(ReadModelError::CommitAborted(
                "injected fault after mutations".to_string(),
            ));
        }

        for entry in processed {
            let shard = InMemoryReadModelStore::shard_index(entry.aggregate_id);
            let collection = entry.collection.clone();
            let id = entry.aggregate_id;
            let previous = self
                .get_mut(shard)?
                .put_processed(&collection, id, Some(entry));
            journal.push(Undo::Processed {
                shard,
                collection,
                id,
                previous,
            });
        }

        if fault == Some(CommitFault::BeforeCompletion) {
            return Err(ReadModelError::CommitAborted(
                "injected fault before completion".to_string(),
            ));
        }

        Ok(())
    }
}

/// In-memory read-model store for tests and single-node deployments.
///
/// Entities and log entries are spread over shards by aggregate id, so
/// commits for different aggregates rarely contend. A commit write-locks only
/// the shards it touches, always in ascending order. A query read-locks one
/// shard at a time and copies out only its matches, so commits to other
/// shards proceed while it scans. Each record is read whole, but a query
/// running alongside commits may see some of them and not others. Sorting
/// and paging happen without holding any lock.
#[derive(Clone)]
pub struct InMemoryReadModelStore {
    shards: Arc<Vec<RwLock<Shard>>>,
    fault: Arc<Mutex<Option<CommitFault>>>,
    unavailable: Arc<AtomicBool>,
}

impl Default for InMemoryReadModelStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryReadModelStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self {
            shards: Arc::new((0..SHARD_COUNT).map(|_| RwLock::default()).collect()),
            fault: Arc::new(Mutex::new(None)),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes the next commit fail at the given point. The store rolls the
    /// partial commit back before returning the error.
    pub fn inject_fault(&self, fault: CommitFault) {
        *self.fault.lock().unwrap_or_else(|e| e.into_inner()) = Some(fault);
    }

    /// Simulates an outage: while set, every operation fails with
    /// `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of live entities in a collection.
    pub async fn count(&self, collection: &str) -> usize {
        let mut count = 0;
        for shard in self.shards.iter() {
            count += shard
                .read()
                .await
                .documents
                .get(collection)
                .map_or(0, HashMap::len);
        }
        count
    }

    fn shard_index(id: AggregateId) -> usize {
        (id.as_uuid().as_u128() % SHARD_COUNT as u128) as usize
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ReadModelError::StoreUnavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn take_fault(&self) -> Option<CommitFault> {
        self.fault.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    async fn lock_shards(&self, changes: &ChangeSet) -> LockedShards<'_> {
        let mut indices: Vec<usize> = changes.touched_ids().map(Self::shard_index).collect();
        indices.sort_unstable();
        indices.dedup();

        let mut guards = Vec::with_capacity(indices.len());
        for index in indices {
            guards.push((index, self.shards[index].write().await));
        }
        LockedShards { guards }
    }
}

#[async_trait]
impl ReadModelStore for InMemoryReadModelStore {
    async fn get(&self, collection: &str, id: AggregateId) -> Result<Option<Record>> {
        self.ensure_available()?;
        let shard = self.shards[Self::shard_index(id)].read().await;
        Ok(shard
            .document(collection, id)
            .map(|document| Record::new(id, document.clone())))
    }

    async fn query(
        &self,
        collection: &str,
        descriptor: &QueryDescriptor,
    ) -> Result<QueryResult<Record>> {
        descriptor.validate()?;
        self.ensure_available()?;
        let start = Instant::now();

        let mut matched = Vec::new();
        for shard in self.shards.iter() {
            let shard = shard.read().await;
            if let Some(documents) = shard.documents.get(collection) {
                matched.extend(
                    documents
                        .iter()
                        .filter(|(id, document)| descriptor.matches_document(**id, document))
                        .map(|(id, document)| Record::new(*id, document.clone())),
                );
            }
            drop(shard);
            tokio::task::yield_now().await;
        }

        let total = matched.len() as u64;
        descriptor.sort_records(&mut matched);
        let records: Vec<Record> = matched
            .into_iter()
            .skip(descriptor.offset() as usize)
            .take(descriptor.limit() as usize)
            .collect();

        Ok(QueryResult::new(records, total, elapsed_ms_since(start)))
    }

    async fn high_water_mark(
        &self,
        collection: &str,
        id: AggregateId,
    ) -> Result<Option<Sequence>> {
        self.ensure_available()?;
        let shard = self.shards[Self::shard_index(id)].read().await;
        Ok(shard.high_water_mark(collection, id))
    }

    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        self.ensure_available()?;
        let fault = self.take_fault();
        let mut locked = self.lock_shards(&changes).await;

        for guard in &changes.guards {
            let actual = locked
                .get(Self::shard_index(guard.aggregate_id))?
                .high_water_mark(&guard.collection, guard.aggregate_id);
            if actual != guard.expected {
                return Err(ReadModelError::ConcurrencyConflict {
                    collection: guard.collection.clone(),
                    aggregate_id: guard.aggregate_id,
                    expected: guard.expected,
                    actual,
                });
            }
        }

        let mut journal = Vec::with_capacity(changes.len());
        if let Err(err) = locked.apply(changes.mutations, changes.processed, fault, &mut journal) {
            locked.rollback(journal);
            tracing::warn!(error = %err, "read-model commit rolled back");
            return Err(err);
        }

        Ok(())
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        self.ensure_available()?;
        for shard in self.shards.iter() {
            let mut shard = shard.write().await;
            shard.documents.remove(collection);
            shard.processed.remove(collection);
        }
        tracing::info!(collection, "cleared in-memory read model");
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        self.ensure_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventKind, QueryBuilder, SortKey, store::Guard};
    use serde_json::json;
    use std::time::Duration;

    const BRANDS: &str = "catalog_brands";

    fn upsert(id: AggregateId, name: &str) -> Mutation {
        Mutation::Upsert {
            collection: BRANDS.to_string(),
            record: Record::new(id, json!({"id": id, "name": name})),
        }
    }

    fn processed(id: AggregateId, sequence: u64) -> ProcessedEntry {
        ProcessedEntry::new(BRANDS, id, Sequence::new(sequence), EventKind::Defined)
    }

    async fn seed(store: &InMemoryReadModelStore, names: &[&str]) -> Vec<AggregateId> {
        let mut ids = Vec::new();
        for name in names {
            let id = AggregateId::new();
            let changes = ChangeSet {
                mutations: vec![upsert(id, name)],
                ..ChangeSet::default()
            };
            store.commit(changes).await.unwrap();
            ids.push(id);
        }
        ids
    }

    #[tokio::test]
    async fn upsert_then_get() {
        let store = InMemoryReadModelStore::new();
        let ids = seed(&store, &["Acme"]).await;

        let record = store.get(BRANDS, ids[0]).await.unwrap().unwrap();
        assert_eq!(record.field("name"), Some(&json!("Acme")));
        assert!(store.get("catalog_types", ids[0]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryReadModelStore::new();
        let ids = seed(&store, &["Acme"]).await;

        for _ in 0..2 {
            let changes = ChangeSet {
                mutations: vec![Mutation::Delete {
                    collection: BRANDS.to_string(),
                    id: ids[0],
                }],
                ..ChangeSet::default()
            };
            store.commit(changes).await.unwrap();
        }
        assert!(store.get(BRANDS, ids[0]).await.unwrap().is_none());

        let never_seen = ChangeSet {
            mutations: vec![Mutation::Delete {
                collection: BRANDS.to_string(),
                id: AggregateId::new(),
            }],
            ..ChangeSet::default()
        };
        assert!(store.commit(never_seen).await.is_ok());
    }

    #[tokio::test]
    async fn pagination_reports_unpaged_total() {
        let store = InMemoryReadModelStore::new();
        let names: Vec<String> = (0..25).map(|i| format!("Brand {i:02}")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        seed(&store, &names).await;

        let first = QueryBuilder::new().offset(0).limit(10).build().unwrap();
        let page = store.query(BRANDS, &first).await.unwrap();
        assert_eq!(page.records.len(), 10);
        assert_eq!(page.total, 25);

        let last = QueryBuilder::new().offset(20).limit(10).build().unwrap();
        let page = store.query(BRANDS, &last).await.unwrap();
        assert_eq!(page.records.len(), 5);
        assert_eq!(page.total, 25);

        let beyond = QueryBuilder::new().offset(30).limit(10).build().unwrap();
        let page = store.query(BRANDS, &beyond).await.unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.total, 25);
    }

    #[tokio::test]
    async fn pages_do_not_overlap() {
        let store = InMemoryReadModelStore::new();
        seed(&store, &["a", "b", "c", "d", "e"]).await;

        let mut seen = Vec::new();
        for offset in [0, 2, 4] {
            let descriptor = QueryBuilder::new().offset(offset).limit(2).build().unwrap();
            let page = store.query(BRANDS, &descriptor).await.unwrap();
            seen.extend(page.records.into_iter().map(|r| r.id));
        }
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn commit_proceeds_while_query_scans() {
        let store = InMemoryReadModelStore::new();
        let names: Vec<String> = (0..200).map(|i| format!("Brand {i:03}")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        seed(&store, &names).await;

        // A commit holding the last shard stalls the scan there.
        let last = SHARD_COUNT - 1;
        let held = store.shards[last].write().await;
        let scan = tokio::spawn({
            let store = store.clone();
            async move { store.query(BRANDS, &QueryDescriptor::match_all()).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let id = std::iter::repeat_with(AggregateId::new)
            .find(|id| InMemoryReadModelStore::shard_index(*id) != last)
            .unwrap();
        let changes = ChangeSet {
            mutations: vec![Mutation::Upsert {
                collection: "catalog_types".to_string(),
                record: Record::new(id, json!({"id": id, "name": "Shoes"})),
            }],
            ..ChangeSet::default()
        };
        tokio::time::timeout(Duration::from_secs(1), store.commit(changes))
            .await
            .expect("commit waited for the scan")
            .unwrap();
        assert!(!scan.is_finished());

        drop(held);
        let page = scan.await.unwrap().unwrap();
        assert_eq!(page.total, 200);
        assert!(store.get("catalog_types", id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn filters_apply_before_count() {
        let store = InMemoryReadModelStore::new();
        seed(&store, &["Acme", "Acme Outdoor", "Globex", "Initech"]).await;

        let descriptor = QueryBuilder::new()
            .term("acme")
            .sort_by(SortKey::asc("name"))
            .limit(1)
            .build()
            .unwrap();
        let page = store.query(BRANDS, &descriptor).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].field("name"), Some(&json!("Acme")));
    }

    #[tokio::test]
    async fn query_rejects_malformed_descriptor() {
        let store = InMemoryReadModelStore::new();
        let descriptor = QueryBuilder::new().build().unwrap();
        assert!(store.query(BRANDS, &descriptor).await.is_ok());
        assert!(QueryBuilder::new().limit(0).build().is_err());
    }

    #[tokio::test]
    async fn guard_mismatch_conflicts_and_applies_nothing() {
        let store = InMemoryReadModelStore::new();
        let id = AggregateId::new();
        store
            .commit(ChangeSet {
                processed: vec![processed(id, 1)],
                ..ChangeSet::default()
            })
            .await
            .unwrap();

        let stale = ChangeSet {
            guards: vec![Guard {
                collection: BRANDS.to_string(),
                aggregate_id: id,
                expected: None,
            }],
            mutations: vec![upsert(id, "Acme")],
            processed: vec![processed(id, 2)],
        };
        let result = store.commit(stale).await;
        assert!(matches!(
            result,
            Err(ReadModelError::ConcurrencyConflict { actual: Some(s), .. }) if s == Sequence::new(1)
        ));
        assert!(store.get(BRANDS, id).await.unwrap().is_none());
        assert_eq!(
            store.high_water_mark(BRANDS, id).await.unwrap(),
            Some(Sequence::new(1))
        );
    }

    #[tokio::test]
    async fn fault_after_mutations_restores_prior_state() {
        let store = InMemoryReadModelStore::new();
        let id = AggregateId::new();
        store
            .commit(ChangeSet {
                mutations: vec![upsert(id, "Acme")],
                processed: vec![processed(id, 1)],
                ..ChangeSet::default()
            })
            .await
            .unwrap();

        store.inject_fault(CommitFault::AfterMutations);
        let result = store
            .commit(ChangeSet {
                mutations: vec![upsert(id, "Acme Renamed")],
                processed: vec![processed(id, 2)],
                ..ChangeSet::default()
            })
            .await;
        assert!(matches!(result, Err(ReadModelError::CommitAborted(_))));

        let record = store.get(BRANDS, id).await.unwrap().unwrap();
        assert_eq!(record.field("name"), Some(&json!("Acme")));
        assert_eq!(
            store.high_water_mark(BRANDS, id).await.unwrap(),
            Some(Sequence::new(1))
        );
    }

    #[tokio::test]
    async fn fault_before_completion_removes_new_entries() {
        let store = InMemoryReadModelStore::new();
        let id = AggregateId::new();

        store.inject_fault(CommitFault::BeforeCompletion);
        let result = store
            .commit(ChangeSet {
                mutations: vec![upsert(id, "Acme")],
                processed: vec![processed(id, 1)],
                ..ChangeSet::default()
            })
            .await;
        assert!(result.is_err());
        assert!(store.get(BRANDS, id).await.unwrap().is_none());
        assert!(store.high_water_mark(BRANDS, id).await.unwrap().is_none());

        // The fault fires once.
        store
            .commit(ChangeSet {
                mutations: vec![upsert(id, "Acme")],
                processed: vec![processed(id, 1)],
                ..ChangeSet::default()
            })
            .await
            .unwrap();
        assert!(store.get(BRANDS, id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryReadModelStore::new();
        store.set_unavailable(true);
        let id = AggregateId::new();

        assert!(matches!(
            store.get(BRANDS, id).await,
            Err(ReadModelError::StoreUnavailable(_))
        ));
        assert!(store.health_check().await.is_err());
        assert!(
            store
                .commit(ChangeSet {
                    mutations: vec![upsert(id, "Acme")],
                    ..ChangeSet::default()
                })
                .await
                .is_err()
        );

        store.set_unavailable(false);
        assert!(store.get(BRANDS, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_drops_entities_and_log() {
        let store = InMemoryReadModelStore::new();
        let ids = seed(&store, &["Acme", "Globex"]).await;
        store
            .commit(ChangeSet {
                processed: vec![processed(ids[0], 4)],
                ..ChangeSet::default()
            })
            .await
            .unwrap();

        store.clear(BRANDS).await.unwrap();
        assert_eq!(store.count(BRANDS).await, 0);
        assert!(store.high_water_mark(BRANDS, ids[0]).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_commits_across_aggregates() {
        let store = InMemoryReadModelStore::new();
        let mut tasks = Vec::new();
        for i in 0..64 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let id = AggregateId::new();
                store
                    .commit(ChangeSet {
                        mutations: vec![upsert(id, &format!("Brand {i}"))],
                        processed: vec![processed(id, 1)],
                        ..ChangeSet::default()
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(store.count(BRANDS).await, 64);
    }
}
