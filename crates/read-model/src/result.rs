//! The paged response shape shared by every query.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// One page of query results.
///
/// Serialized as `{"records": [...], "total": n, "elapsedMs": n}`. `total`
/// counts every record matching the filters before paging, so a client can
/// render "page N of M"; it is not `records.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult<T> {
    pub records: Vec<T>,
    pub total: u64,
    pub elapsed_ms: u32,
}

impl<T> QueryResult<T> {
    pub fn new(records: Vec<T>, total: u64, elapsed_ms: u32) -> Self {
        Self {
            records,
            total,
            elapsed_ms,
        }
    }

    /// An empty page; `total` is zero.
    pub fn empty(elapsed_ms: u32) -> Self {
        Self::new(Vec::new(), 0, elapsed_ms)
    }

    /// A page holding zero or one record, as returned by lookups by id.
    pub fn from_option(record: Option<T>, elapsed_ms: u32) -> Self {
        match record {
            Some(record) => Self::new(vec![record], 1, elapsed_ms),
            None => Self::empty(elapsed_ms),
        }
    }

    /// Converts every record, keeping `total` and `elapsed_ms`.
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<QueryResult<U>, E> {
        let records = self.records.into_iter().map(f).collect::<Result<Vec<_>, E>>()?;
        Ok(QueryResult::new(records, self.total, self.elapsed_ms))
    }
}

/// Milliseconds since `start`, saturating at `u32::MAX`.
pub fn elapsed_ms_since(start: Instant) -> u32 {
    u32::try_from(start.elapsed().as_millis()).unwrap_or(u32::MAX)
}
