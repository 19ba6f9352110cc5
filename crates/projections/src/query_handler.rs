//! Answers read requests against the read model.

use std::collections::BTreeMap;
use std::time::Instant;

use common::AggregateId;
use read_model::{
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, QueryBuilder, QueryDescriptor, QueryResult,
    ReadModelEntity, ReadModelError, ReadModelStore, Record, SortKey,
    result::elapsed_ms_since,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::{QueryKind, QueryRegistry};
use crate::{ProjectionError, Result};

/// A caller's read request.
///
/// `offset` and `limit` are signed so that negative values reach validation
/// and are rejected instead of failing to parse somewhere upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub id: Option<AggregateId>,
    pub term: Option<String>,
    #[serde(default)]
    pub filters: BTreeMap<String, Value>,
    pub sort: Option<String>,
    #[serde(default)]
    pub desc: bool,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

impl QueryRequest {
    pub fn by_id(id: AggregateId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn page(offset: i64, limit: i64) -> Self {
        Self {
            offset: Some(offset),
            limit: Some(limit),
            ..Self::default()
        }
    }
}

/// Read-only query side of the catalog.
///
/// A request with an `id` is a lookup: the result holds zero or one record
/// and `total` equals the record count. Anything else becomes a
/// [`QueryDescriptor`] and the store's result is returned unchanged.
pub struct QueryHandler<S> {
    store: S,
    registry: QueryRegistry,
    default_page_size: u32,
}

impl<S: ReadModelStore> QueryHandler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            registry: QueryRegistry::catalog(),
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_registry(mut self, registry: QueryRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Page size used when a request has no `limit`. Clamped to the store's
    /// accepted range.
    pub fn with_default_page_size(mut self, size: u32) -> Self {
        self.default_page_size = size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Turns a request into a validated descriptor without touching the store.
    pub fn descriptor(&self, request: &QueryRequest) -> Result<QueryDescriptor> {
        let offset = match request.offset {
            None => 0,
            Some(offset) => u32::try_from(offset).map_err(|_| {
                ProjectionError::MalformedRequest(format!("offset {offset} is out of range"))
            })?,
        };
        let limit = match request.limit {
            None => self.default_page_size,
            Some(limit) if (1..=i64::from(MAX_PAGE_SIZE)).contains(&limit) => limit as u32,
            Some(limit) => {
                return Err(ProjectionError::MalformedRequest(format!(
                    "limit {limit} must be between 1 and {MAX_PAGE_SIZE}"
                )));
            }
        };

        let mut builder = QueryBuilder::new().offset(offset).limit(limit);
        if let Some(id) = request.id {
            builder = builder.id(id);
        }
        if let Some(term) = &request.term {
            builder = builder.term(term.as_str());
        }
        for (field, value) in &request.filters {
            builder = builder.filter(field.as_str(), value.clone());
        }
        if let Some(field) = &request.sort {
            builder = builder.sort_by(if request.desc {
                SortKey::desc(field.as_str())
            } else {
                SortKey::asc(field.as_str())
            });
        }

        builder.build().map_err(malformed)
    }

    /// Answers a request against one collection, returning raw documents.
    #[tracing::instrument(skip(self, request), fields(id = ?request.id))]
    pub async fn handle_collection(
        &self,
        collection: &str,
        request: &QueryRequest,
    ) -> Result<QueryResult<Record>> {
        let start = Instant::now();
        let descriptor = self.descriptor(request)?;

        let result = match request.id {
            Some(id) => {
                let record = self.store.get(collection, id).await?;
                QueryResult::from_option(record, elapsed_ms_since(start))
            }
            None => self
                .store
                .query(collection, &descriptor)
                .await
                .map_err(malformed)?,
        };

        metrics::histogram!("read_model_query_duration_ms", "collection" => collection.to_string())
            .record(f64::from(elapsed_ms_since(start)));
        tracing::debug!(
            records = result.records.len(),
            total = result.total,
            elapsed_ms = result.elapsed_ms,
            "query answered"
        );
        Ok(result)
    }

    /// Answers a request and decodes every record as `T`.
    pub async fn handle<T: ReadModelEntity>(&self, request: &QueryRequest) -> Result<QueryResult<T>> {
        Ok(self
            .handle_collection(T::COLLECTION, request)
            .await?
            .try_map(T::from_record)?)
    }

    /// Answers a request for a registered query kind.
    pub async fn handle_kind(
        &self,
        kind: QueryKind,
        request: &QueryRequest,
    ) -> Result<QueryResult<Record>> {
        let collection = self.registry.resolve(kind)?;
        self.handle_collection(collection, request).await
    }
}

fn malformed(err: ReadModelError) -> ProjectionError {
    match err {
        ReadModelError::MalformedQuery(reason) => ProjectionError::MalformedRequest(reason),
        other => other.into(),
    }
}
