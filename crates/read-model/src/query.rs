use std::cmp::Ordering;

use serde_json::Value;

use crate::{AggregateId, ReadModelError, Record, Result};

/// Page size used when a caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page a single query may request.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// A single filter criterion. All predicates of a descriptor must match.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// The record is the projection of this aggregate.
    Id(AggregateId),

    /// A top-level field equals the given JSON value.
    Eq { field: String, value: Value },

    /// A top-level string field contains `term`, ignoring case.
    Contains { field: String, term: String },

    /// Any top-level string field other than `id` contains the term,
    /// ignoring case.
    Term(String),
}

impl Predicate {
    /// Evaluates the predicate against a stored record.
    pub fn matches(&self, record: &Record) -> bool {
        self.matches_document(record.id, &record.document)
    }

    /// Evaluates the predicate against a document without taking ownership.
    pub fn matches_document(&self, id: AggregateId, document: &Value) -> bool {
        match self {
            Predicate::Id(expected) => id == *expected,
            Predicate::Eq { field, value } => document
                .get(field)
                .is_some_and(|actual| values_equal(actual, value)),
            Predicate::Contains { field, term } => document
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|text| contains_ignore_case(text, term)),
            Predicate::Term(term) => document.as_object().is_some_and(|fields| {
                fields
                    .iter()
                    .filter(|(name, _)| name.as_str() != "id")
                    .filter_map(|(_, value)| value.as_str())
                    .any(|text| contains_ignore_case(text, term))
            }),
        }
    }

    fn field_name(&self) -> Option<&str> {
        match self {
            Predicate::Eq { field, .. } | Predicate::Contains { field, .. } => Some(field),
            Predicate::Id(_) | Predicate::Term(_) => None,
        }
    }
}

fn contains_ignore_case(text: &str, term: &str) -> bool {
    text.to_lowercase().contains(&term.to_lowercase())
}

/// JSON equality with numbers compared by value, so `3` equals `3.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Ordering of a result set by one top-level field.
///
/// Records missing the field sort last in either direction; ties are broken
/// by aggregate id so that pages never overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }

    /// Compares two records under this key.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let ordering = match (a.field(&self.field), b.field(&self.field)) {
            (Some(x), Some(y)) => {
                let ordering = compare_values(x, y);
                match self.direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        ordering.then_with(|| a.id.cmp(&b.id))
    }
}

/// Orders JSON values by type first (null, string, number, bool, array,
/// object), then by value within a type. Strings compare by bytes, which is
/// what the PostgreSQL store gets from `COLLATE "C"`.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::String(_) => 1,
            Value::Number(_) => 2,
            Value::Bool(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (x, y) if rank(x) == rank(y) => x.to_string().cmp(&y.to_string()),
        (x, y) => rank(x).cmp(&rank(y)),
    }
}

/// Store-agnostic description of a paged search.
///
/// Descriptors are only built through [`QueryBuilder`] and never change
/// afterwards. A descriptor without filters matches every record.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    filters: Vec<Predicate>,
    sort: Option<SortKey>,
    offset: u32,
    limit: u32,
}

impl QueryDescriptor {
    /// Matches every record, first page of the default size.
    pub fn match_all() -> Self {
        Self {
            filters: Vec::new(),
            sort: None,
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn filters(&self) -> &[Predicate] {
        &self.filters
    }

    pub fn sort(&self) -> Option<&SortKey> {
        self.sort.as_ref()
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Whether a record passes every filter.
    pub fn matches(&self, record: &Record) -> bool {
        self.matches_document(record.id, &record.document)
    }

    /// Whether a stored document passes every filter.
    pub fn matches_document(&self, id: AggregateId, document: &Value) -> bool {
        self.filters
            .iter()
            .all(|predicate| predicate.matches_document(id, document))
    }

    /// Sorts records in place: by the sort key if any, else by id.
    pub fn sort_records(&self, records: &mut [Record]) {
        match &self.sort {
            Some(key) => records.sort_by(|a, b| key.compare(a, b)),
            None => records.sort_by(|a, b| a.id.cmp(&b.id)),
        }
    }

    /// Checks the descriptor before it reaches a store.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(ReadModelError::MalformedQuery(
                "limit must be at least 1".to_string(),
            ));
        }
        if self.limit > MAX_PAGE_SIZE {
            return Err(ReadModelError::MalformedQuery(format!(
                "limit {} exceeds the maximum page size of {MAX_PAGE_SIZE}",
                self.limit
            )));
        }

        let sort_field = self.sort.as_ref().map(|key| key.field.as_str());
        for field in self
            .filters
            .iter()
            .filter_map(Predicate::field_name)
            .chain(sort_field)
        {
            if !is_valid_field_name(field) {
                return Err(ReadModelError::MalformedQuery(format!(
                    "invalid field name {field:?}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for QueryDescriptor {
    fn default() -> Self {
        Self::match_all()
    }
}

fn is_valid_field_name(field: &str) -> bool {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Assembles a [`QueryDescriptor`] from a caller's criteria.
///
/// Every method consumes the builder and `build` moves it into the
/// descriptor, so one query's criteria can never leak into the next.
/// A lookup by id still gets the default page; callers that want a single
/// record say so themselves.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    filters: Vec<Predicate>,
    sort: Option<SortKey>,
    offset: u32,
    limit: Option<u32>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters to the projection of one aggregate.
    pub fn id(mut self, id: AggregateId) -> Self {
        self.filters.push(Predicate::Id(id));
        self
    }

    /// Free-text search over all string fields. Blank terms are ignored.
    pub fn term(mut self, term: impl Into<String>) -> Self {
        let term = term.into();
        let term = term.trim();
        if !term.is_empty() {
            self.filters.push(Predicate::Term(term.to_string()));
        }
        self
    }

    /// Filters by exact field value.
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Predicate::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Filters by case-insensitive substring of one field.
    pub fn contains(mut self, field: impl Into<String>, term: impl Into<String>) -> Self {
        self.filters.push(Predicate::Contains {
            field: field.into(),
            term: term.into(),
        });
        self
    }

    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort = Some(key);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Produces a validated descriptor.
    pub fn build(self) -> Result<QueryDescriptor> {
        let descriptor = QueryDescriptor {
            filters: self.filters,
            sort: self.sort,
            offset: self.offset,
            limit: self.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}
