//! Applies domain events to the read model.

use std::sync::Arc;
use std::time::Duration;

use common::{DomainEvent, EventKind};
use read_model::{ReadModelError, ReadModelStore, Record, UnitOfWork};
use serde::{Deserialize, Serialize};

use crate::registry::ProjectionRegistry;
use crate::{ProjectionError, Result};

/// Default number of times a conflicting commit is retried.
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 8;

/// What handling one event did to the read model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The entity was created or replaced.
    Applied,
    /// The entity was removed; the high-water mark is kept.
    Deleted,
    /// The event was not newer than the high-water mark.
    Stale,
    /// The kind has no meaning for a subscribed aggregate.
    UnknownKind,
    /// No projection subscribes to the aggregate type.
    Unsubscribed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::Deleted => "deleted",
            Outcome::Stale => "stale",
            Outcome::UnknownKind => "unknown_kind",
            Outcome::Unsubscribed => "unsubscribed",
        }
    }
}

/// Projects events into the store, once each, in sequence order per
/// aggregate.
///
/// For every event the handler reads the aggregate's high-water mark inside
/// a [`UnitOfWork`], drops the event if it is not newer, and otherwise
/// stages the entity change together with the new mark. The commit
/// re-checks the mark, so two concurrent calls for the same aggregate can
/// never both apply: the loser re-reads and either applies on top or finds
/// itself stale.
///
/// Redelivered, duplicated and reordered events all converge on the
/// projection of the highest sequence seen.
pub struct ProjectionHandler<S> {
    store: S,
    registry: Arc<ProjectionRegistry>,
    max_conflict_retries: u32,
}

impl<S: ReadModelStore> ProjectionHandler<S> {
    pub fn new(store: S, registry: Arc<ProjectionRegistry>) -> Self {
        Self {
            store,
            registry,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &ProjectionRegistry {
        &self.registry
    }

    /// Handles one event.
    ///
    /// Stale, unknown and unsubscribed events are absorbed and reported in
    /// the [`Outcome`]. Store failures are returned so the caller can
    /// redeliver; no partial change is left behind.
    #[tracing::instrument(
        skip(self, event),
        fields(
            aggregate_type = %event.aggregate_type,
            aggregate_id = %event.aggregate_id,
            sequence = %event.sequence,
            kind = %event.kind,
        )
    )]
    pub async fn handle(&self, event: &DomainEvent) -> Result<Outcome> {
        let Some(projection) = self.registry.resolve(&event.aggregate_type) else {
            tracing::debug!("no projection subscribed, dropping event");
            metrics::counter!("projections_events_dropped", "reason" => "unsubscribed")
                .increment(1);
            return Ok(Outcome::Unsubscribed);
        };

        if !event.kind.is_known() {
            tracing::warn!(projection = projection.name(), "unknown event kind, dropping event");
            metrics::counter!("projections_events_dropped", "reason" => "unknown_kind")
                .increment(1);
            return Ok(Outcome::UnknownKind);
        }

        let collection = projection.collection();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut uow = UnitOfWork::begin(&self.store);

            let high_water_mark = uow.high_water_mark(collection, event.aggregate_id).await?;
            if high_water_mark.is_some_and(|applied| applied >= event.sequence) {
                tracing::debug!(?high_water_mark, "stale event, already applied");
                metrics::counter!("projections_events_stale").increment(1);
                return Ok(Outcome::Stale);
            }

            let outcome = match event.kind {
                EventKind::Defined => {
                    let document = projection.define(event)?;
                    uow.upsert(collection, Record::new(event.aggregate_id, document));
                    Outcome::Applied
                }
                _ => {
                    uow.delete_record(collection, event.aggregate_id);
                    Outcome::Deleted
                }
            };
            uow.record_processed(
                collection,
                event.aggregate_id,
                event.sequence,
                event.kind.clone(),
            );

            match uow.commit().await {
                Ok(()) => {
                    tracing::debug!(outcome = outcome.as_str(), "event projected");
                    metrics::counter!("projections_events_applied", "outcome" => outcome.as_str())
                        .increment(1);
                    return Ok(outcome);
                }
                Err(ReadModelError::ConcurrencyConflict { .. })
                    if attempts <= self.max_conflict_retries =>
                {
                    tracing::debug!(attempts, "commit conflicted, retrying");
                    metrics::counter!("projections_commit_conflicts").increment(1);
                }
                Err(ReadModelError::ConcurrencyConflict { .. }) => {
                    metrics::counter!("projections_commit_conflicts").increment(1);
                    return Err(ProjectionError::ConflictRetriesExhausted {
                        aggregate_id: event.aggregate_id,
                        attempts,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Handles one event, giving up after `timeout`.
    ///
    /// An abandoned call commits nothing, so the caller may redeliver.
    pub async fn handle_with_timeout(
        &self,
        event: &DomainEvent,
        timeout: Duration,
    ) -> Result<Outcome> {
        tokio::time::timeout(timeout, self.handle(event))
            .await
            .map_err(|_| {
                tracing::warn!(
                    aggregate_id = %event.aggregate_id,
                    sequence = %event.sequence,
                    ?timeout,
                    "projection timed out"
                );
                ProjectionError::Timeout(timeout)
            })?
    }
}
