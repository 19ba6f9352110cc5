//! Catalog list and lookup endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use common::AggregateId;
use projections::{QueryKind, QueryRequest};
use read_model::QueryResult;
use serde::Deserialize;
use serde_json::Value;

use crate::AppState;
use crate::error::ApiError;

/// Prefix of query-string keys that carry exact-match filters.
const FILTER_PREFIX: &str = "filter.";

/// Query string of a catalog list request.
///
/// Exact-match filters are given as `filter.<field>=<value>`. A value that
/// parses as JSON (`3`, `true`, `"3"`) is matched as that value; anything
/// else is matched as a string.
#[derive(Debug, Default, Deserialize)]
pub struct CatalogParams {
    pub id: Option<String>,
    pub term: Option<String>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
    pub sort: Option<String>,
    #[serde(default)]
    pub desc: bool,
}

impl CatalogParams {
    fn into_request(self, pairs: Vec<(String, String)>) -> Result<QueryRequest, ApiError> {
        let id = self
            .id
            .as_deref()
            .map(AggregateId::parse)
            .transpose()
            .map_err(|e| ApiError::BadRequest(format!("Invalid id: {e}")))?;

        let filters: BTreeMap<String, Value> = pairs
            .into_iter()
            .filter_map(|(key, value)| {
                let field = key.strip_prefix(FILTER_PREFIX)?.to_string();
                let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
                Some((field, value))
            })
            .collect();

        Ok(QueryRequest {
            id,
            term: self.term,
            filters,
            sort: self.sort,
            desc: self.desc,
            offset: self.offset,
            limit: self.limit,
        })
    }
}

/// GET /catalog/{kind} — paged list of brands or types, or one by `id`.
#[tracing::instrument(skip(state, params, pairs))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    params: Result<Query<CatalogParams>, QueryRejection>,
    pairs: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Json<QueryResult<Value>>, ApiError> {
    let kind: QueryKind = kind
        .parse()
        .map_err(|_| ApiError::NotFound(format!("Unknown catalog list {kind:?}")))?;
    let Query(params) = params?;
    let Query(pairs) = pairs?;
    let request = params.into_request(pairs)?;

    let result = state.queries.handle_kind(kind, &request).await?;
    let documents = result
        .records
        .into_iter()
        .map(|record| record.document)
        .collect();
    Ok(Json(QueryResult::new(
        documents,
        result.total,
        result.elapsed_ms,
    )))
}
