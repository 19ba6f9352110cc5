//! Feeds event streams through the projection handler.

use std::sync::Arc;

use common::DomainEvent;
use futures_core::Stream;
use futures_util::StreamExt;
use read_model::ReadModelStore;

use crate::handler::{Outcome, ProjectionHandler};
use crate::{ProjectionError, Result};

/// Default number of events handled at once.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Tally of what a run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub applied: u64,
    pub deleted: u64,
    pub stale: u64,
    pub unknown_kind: u64,
    pub unsubscribed: u64,
    pub failed: u64,
}

impl ProcessorStats {
    fn record(&mut self, result: &Result<Outcome>) {
        match result {
            Ok(Outcome::Applied) => self.applied += 1,
            Ok(Outcome::Deleted) => self.deleted += 1,
            Ok(Outcome::Stale) => self.stale += 1,
            Ok(Outcome::UnknownKind) => self.unknown_kind += 1,
            Ok(Outcome::Unsubscribed) => self.unsubscribed += 1,
            Err(_) => self.failed += 1,
        }
    }

    /// Number of events seen.
    pub fn total(&self) -> u64 {
        self.applied + self.deleted + self.stale + self.unknown_kind + self.unsubscribed + self.failed
    }
}

/// Delivers events from a stream to a [`ProjectionHandler`].
///
/// Events are handled with bounded concurrency and in no particular order;
/// the handler's sequence checks make the result independent of the order.
/// A failed event is logged and counted but does not stop the run.
pub struct ProjectionProcessor<S> {
    handler: Arc<ProjectionHandler<S>>,
    concurrency: usize,
}

impl<S: ReadModelStore> ProjectionProcessor<S> {
    pub fn new(handler: Arc<ProjectionHandler<S>>) -> Self {
        Self {
            handler,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn handler(&self) -> &ProjectionHandler<S> {
        &self.handler
    }

    /// Delivers a single event, logging a failure before returning it.
    pub async fn process_event(&self, event: &DomainEvent) -> Result<Outcome> {
        let result = self.handler.handle(event).await;
        if let Err(err) = &result {
            tracing::error!(
                aggregate_id = %event.aggregate_id,
                sequence = %event.sequence,
                error = %err,
                retryable = err.is_retryable(),
                "failed to project event"
            );
        }
        result
    }

    /// Handles every event of the stream.
    #[tracing::instrument(skip(self, events), fields(concurrency = self.concurrency))]
    pub async fn run<St>(&self, events: St) -> ProcessorStats
    where
        St: Stream<Item = DomainEvent>,
    {
        let stats = events
            .map(|event| async move { self.process_event(&event).await })
            .buffer_unordered(self.concurrency)
            .fold(ProcessorStats::default(), |mut stats, result| async move {
                stats.record(&result);
                stats
            })
            .await;

        tracing::info!(
            applied = stats.applied,
            deleted = stats.deleted,
            stale = stats.stale,
            failed = stats.failed,
            "event stream processed"
        );
        stats
    }

    /// Clears a collection, including its processed-event log, and replays
    /// the stream into it. Events for other collections are skipped.
    #[tracing::instrument(skip(self, events))]
    pub async fn rebuild<St>(&self, collection: &str, events: St) -> Result<ProcessorStats>
    where
        St: Stream<Item = DomainEvent>,
    {
        let aggregate_type = self
            .handler
            .registry()
            .for_collection(collection)
            .map(|projection| projection.aggregate_type())
            .ok_or_else(|| {
                ProjectionError::MalformedRequest(format!(
                    "no projection writes collection {collection:?}"
                ))
            })?;

        self.handler.store().clear(collection).await?;
        let events = events.filter(move |event| {
            std::future::ready(event.aggregate_type == aggregate_type)
        });
        Ok(self.run(events).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::{BrandEvent, BrandName, TypeEvent, TypeName};
    use common::{AggregateId, Sequence};
    use futures_util::stream;
    use read_model::{InMemoryReadModelStore, ReadModelEntity};

    use crate::registry::ProjectionRegistry;
    use crate::views::{CatalogBrandView, CatalogTypeView};

    fn processor() -> ProjectionProcessor<InMemoryReadModelStore> {
        ProjectionProcessor::new(Arc::new(ProjectionHandler::new(
            InMemoryReadModelStore::new(),
            Arc::new(ProjectionRegistry::catalog()),
        )))
    }

    fn brand(id: AggregateId, sequence: u64, name: &str) -> DomainEvent {
        BrandEvent::defined(BrandName::new(name).unwrap())
            .into_domain_event(id, Sequence::new(sequence))
            .unwrap()
    }

    fn product_type(id: AggregateId, sequence: u64, name: &str) -> DomainEvent {
        TypeEvent::defined(TypeName::new(name).unwrap())
            .into_domain_event(id, Sequence::new(sequence))
            .unwrap()
    }

    #[tokio::test]
    async fn run_tallies_outcomes() {
        let processor = processor();
        let id = AggregateId::new();
        let events = vec![
            brand(id, 1, "Acme"),
            brand(id, 1, "Acme"),
            BrandEvent::Destroyed
                .into_domain_event(AggregateId::new(), Sequence::first())
                .unwrap(),
            DomainEvent::new("Order", id, "Defined", Sequence::first()),
        ];

        let stats = processor
            .with_concurrency(1)
            .run(stream::iter(events))
            .await;
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.unsubscribed, 1);
        assert_eq!(stats.total(), 4);
    }

    #[tokio::test]
    async fn process_event_reports_outcome_and_failure() {
        let processor = processor();
        let id = AggregateId::new();

        let outcome = processor.process_event(&brand(id, 1, "Acme")).await.unwrap();
        assert_eq!(outcome, Outcome::Applied);

        processor.handler().store().set_unavailable(true);
        let err = processor
            .process_event(&brand(id, 2, "Acme Corp"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn concurrent_run_converges_to_latest() {
        let processor = processor();
        let id = AggregateId::new();
        let events: Vec<_> = (1..=50)
            .rev()
            .map(|sequence| brand(id, sequence, &format!("Acme {sequence}")))
            .collect();

        let stats = processor.run(stream::iter(events)).await;
        assert_eq!(stats.failed, 0);

        let view = processor
            .handler()
            .store()
            .get(CatalogBrandView::COLLECTION, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(view.field("name"), Some(&serde_json::json!("Acme 50")));
    }

    #[tokio::test]
    async fn rebuild_replays_one_collection() {
        let processor = processor();
        let brand_id = AggregateId::new();
        let type_id = AggregateId::new();
        processor
            .run(stream::iter(vec![
                brand(brand_id, 1, "Acme"),
                product_type(type_id, 1, "Shoes"),
            ]))
            .await;

        let stats = processor
            .rebuild(
                CatalogBrandView::COLLECTION,
                stream::iter(vec![
                    brand(brand_id, 1, "Acme"),
                    brand(brand_id, 2, "Acme Corp"),
                    product_type(type_id, 1, "Shoes"),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(stats.applied, 2);
        assert_eq!(stats.total(), 2);
        let store = processor.handler().store();
        assert_eq!(store.count(CatalogBrandView::COLLECTION).await, 1);
        assert_eq!(store.count(CatalogTypeView::COLLECTION).await, 1);
    }

    #[tokio::test]
    async fn rebuild_of_unknown_collection_fails() {
        let processor = processor();
        let err = processor
            .rebuild("orders", stream::iter(Vec::<DomainEvent>::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectionError::MalformedRequest(_)));
    }
}
