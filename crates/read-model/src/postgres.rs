use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

use crate::{
    AggregateId, Direction, EventKind, Predicate, QueryDescriptor, QueryResult, ReadModelError,
    Record, Result, Sequence, SortKey,
    result::elapsed_ms_since,
    store::{ChangeSet, Mutation, ReadModelStore},
};

/// PostgreSQL-backed read-model store.
///
/// Entities live in `read_models` as JSONB documents, the processed-event log
/// in `processed_events`. A commit is one transaction: mutations first, then
/// a compare-and-set on each log row, so a concurrent commit for the same
/// aggregate makes one of the two roll back with `ConcurrencyConflict`.
#[derive(Clone)]
pub struct PostgresReadModelStore {
    pool: PgPool,
}

/// A positional parameter for a dynamically built statement.
#[derive(Debug, Clone)]
enum BindValue {
    Uuid(Uuid),
    Text(String),
    Json(Value),
    Int(i64),
}

fn bind_values<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    values: &[BindValue],
) -> Query<'q, Postgres, PgArguments> {
    for value in values {
        query = match value {
            BindValue::Uuid(v) => query.bind(*v),
            BindValue::Text(v) => query.bind(v.clone()),
            BindValue::Json(v) => query.bind(v.clone()),
            BindValue::Int(v) => query.bind(*v),
        };
    }
    query
}

/// Escapes LIKE wildcards so user terms match literally.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn sequence_to_db(sequence: Sequence) -> Result<i64> {
    i64::try_from(sequence.as_u64()).map_err(|_| ReadModelError::SequenceOutOfRange(sequence))
}

fn sequence_from_db(value: i64) -> Sequence {
    Sequence::new(u64::try_from(value).unwrap_or(0))
}

/// Builds `collection = $1 AND ...` for a descriptor's filters.
fn where_clause(collection: &str, descriptor: &QueryDescriptor) -> (String, Vec<BindValue>) {
    let mut sql = String::from("collection = $1");
    let mut binds = vec![BindValue::Text(collection.to_string())];

    for predicate in descriptor.filters() {
        match predicate {
            Predicate::Id(id) => {
                binds.push(BindValue::Uuid(id.as_uuid()));
                sql.push_str(&format!(" AND id = ${}", binds.len()));
            }
            Predicate::Eq { field, value } => {
                binds.push(BindValue::Text(field.clone()));
                let field_param = binds.len();
                binds.push(BindValue::Json(value.clone()));
                sql.push_str(&format!(
                    " AND document -> ${field_param}::text = ${}::jsonb",
                    binds.len()
                ));
            }
            Predicate::Contains { field, term } => {
                binds.push(BindValue::Text(field.clone()));
                let field_param = binds.len();
                binds.push(BindValue::Text(like_pattern(term)));
                sql.push_str(&format!(
                    " AND document ->> ${field_param}::text ILIKE ${}",
                    binds.len()
                ));
            }
            Predicate::Term(term) => {
                binds.push(BindValue::Text(like_pattern(term)));
                sql.push_str(&format!(
                    " AND EXISTS (SELECT 1 FROM jsonb_each(document) AS kv \
                     WHERE kv.key <> 'id' AND jsonb_typeof(kv.value) = 'string' \
                     AND kv.value #>> '{{}}' ILIKE ${})",
                    binds.len()
                ));
            }
        }
    }

    (sql, binds)
}

/// Builds the `ORDER BY` for a sort key whose field name is bound at `$param`.
///
/// Mirrors the in-memory ordering: records missing the field come last, then
/// values group by JSON type, strings compare by bytes (`COLLATE "C"`) rather
/// than by the database locale, and ties fall back to id.
fn order_by_clause(key: &SortKey, param: usize) -> String {
    let direction = match key.direction {
        Direction::Asc => "ASC",
        Direction::Desc => "DESC",
    };
    let value = format!("document -> ${param}::text");
    format!(
        " ORDER BY ({value}) IS NULL ASC, \
         CASE jsonb_typeof({value}) WHEN 'null' THEN 0 WHEN 'string' THEN 1 \
         WHEN 'number' THEN 2 WHEN 'boolean' THEN 3 WHEN 'array' THEN 4 ELSE 5 END {direction}, \
         (CASE WHEN jsonb_typeof({value}) = 'string' THEN document ->> ${param}::text END) \
         COLLATE \"C\" {direction}, \
         {value} {direction}, id ASC"
    )
}

impl PostgresReadModelStore {
    /// Creates a new PostgreSQL read-model store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool of at most `max_connections` to `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<Record> {
        Ok(Record::new(
            AggregateId::from_uuid(row.try_get::<Uuid, _>("id")?),
            row.try_get("document")?,
        ))
    }
}

#[async_trait]
impl ReadModelStore for PostgresReadModelStore {
    async fn get(&self, collection: &str, id: AggregateId) -> Result<Option<Record>> {
        let row = sqlx::query(
            r#"
            SELECT id, document
            FROM read_models
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(collection)
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn query(
        &self,
        collection: &str,
        descriptor: &QueryDescriptor,
    ) -> Result<QueryResult<Record>> {
        descriptor.validate()?;
        let start = Instant::now();
        let (filter_sql, mut binds) = where_clause(collection, descriptor);

        // Count and page from the same snapshot.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let count_sql = format!("SELECT COUNT(*) AS total FROM read_models WHERE {filter_sql}");
        let total: i64 = bind_values(sqlx::query(&count_sql), &binds)
            .fetch_one(&mut *tx)
            .await?
            .try_get("total")?;

        let mut page_sql = format!("SELECT id, document FROM read_models WHERE {filter_sql}");
        match descriptor.sort() {
            Some(key) => {
                binds.push(BindValue::Text(key.field.clone()));
                page_sql.push_str(&order_by_clause(key, binds.len()));
            }
            None => page_sql.push_str(" ORDER BY id ASC"),
        }
        binds.push(BindValue::Int(i64::from(descriptor.limit())));
        page_sql.push_str(&format!(" LIMIT ${}", binds.len()));
        binds.push(BindValue::Int(i64::from(descriptor.offset())));
        page_sql.push_str(&format!(" OFFSET ${}", binds.len()));

        let rows = bind_values(sqlx::query(&page_sql), &binds)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        let records = rows
            .into_iter()
            .map(Self::row_to_record)
            .collect::<Result<Vec<_>>>()?;
        Ok(QueryResult::new(
            records,
            u64::try_from(total).unwrap_or(0),
            elapsed_ms_since(start),
        ))
    }

    async fn high_water_mark(
        &self,
        collection: &str,
        id: AggregateId,
    ) -> Result<Option<Sequence>> {
        let sequence: Option<i64> = sqlx::query_scalar(
            "SELECT sequence FROM processed_events WHERE collection = $1 AND aggregate_id = $2",
        )
        .bind(collection)
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(sequence.map(sequence_from_db))
    }

    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        // Dropping the transaction on any early return rolls it back.
        let mut tx = self.pool.begin().await?;

        for mutation in &changes.mutations {
            match mutation {
                Mutation::Upsert { collection, record } => {
                    sqlx::query(
                        r#"
                        INSERT INTO read_models (collection, id, document, updated_at)
                        VALUES ($1, $2, $3, NOW())
                        ON CONFLICT (collection, id) DO UPDATE SET
                            document = EXCLUDED.document,
                            updated_at = EXCLUDED.updated_at
                        "#,
                    )
                    .bind(collection)
                    .bind(record.id.as_uuid())
                    .bind(&record.document)
                    .execute(&mut *tx)
                    .await?;
                }
                Mutation::Delete { collection, id } => {
                    sqlx::query("DELETE FROM read_models WHERE collection = $1 AND id = $2")
                        .bind(collection)
                        .bind(id.as_uuid())
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        for entry in &changes.processed {
            let expected = changes
                .guard_for(&entry.collection, entry.aggregate_id)
                .map(|guard| guard.expected);
            let sequence = sequence_to_db(entry.sequence)?;
            let kind = String::from(entry.kind.clone());

            let rows = match expected {
                Some(Some(previous)) => sqlx::query(
                    r#"
                    UPDATE processed_events
                    SET sequence = $3, event_kind = $4, processed_at = NOW()
                    WHERE collection = $1 AND aggregate_id = $2 AND sequence = $5
                    "#,
                )
                .bind(&entry.collection)
                .bind(entry.aggregate_id.as_uuid())
                .bind(sequence)
                .bind(&kind)
                .bind(sequence_to_db(previous)?)
                .execute(&mut *tx)
                .await?
                .rows_affected(),
                Some(None) => sqlx::query(
                    r#"
                    INSERT INTO processed_events (collection, aggregate_id, sequence, event_kind)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (collection, aggregate_id) DO NOTHING
                    "#,
                )
                .bind(&entry.collection)
                .bind(entry.aggregate_id.as_uuid())
                .bind(sequence)
                .bind(&kind)
                .execute(&mut *tx)
                .await?
                .rows_affected(),
                // Unguarded appends only ever raise the mark.
                None => {
                    sqlx::query(
                        r#"
                        INSERT INTO processed_events (collection, aggregate_id, sequence, event_kind)
                        VALUES ($1, $2, $3, $4)
                        ON CONFLICT (collection, aggregate_id) DO UPDATE SET
                            sequence = EXCLUDED.sequence,
                            event_kind = EXCLUDED.event_kind,
                            processed_at = NOW()
                        WHERE processed_events.sequence < EXCLUDED.sequence
                        "#,
                    )
                    .bind(&entry.collection)
                    .bind(entry.aggregate_id.as_uuid())
                    .bind(sequence)
                    .bind(&kind)
                    .execute(&mut *tx)
                    .await?;
                    1
                }
            };

            if rows != 1 {
                let actual: Option<i64> = sqlx::query_scalar(
                    "SELECT sequence FROM processed_events WHERE collection = $1 AND aggregate_id = $2",
                )
                .bind(&entry.collection)
                .bind(entry.aggregate_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
                return Err(ReadModelError::ConcurrencyConflict {
                    collection: entry.collection.clone(),
                    aggregate_id: entry.aggregate_id,
                    expected: expected.flatten(),
                    actual: actual.map(sequence_from_db),
                });
            }
        }

        // Guards that were read but not written still have to hold.
        for guard in &changes.guards {
            let written = changes
                .processed
                .iter()
                .any(|p| p.collection == guard.collection && p.aggregate_id == guard.aggregate_id);
            if written {
                continue;
            }
            let actual: Option<i64> = sqlx::query_scalar(
                "SELECT sequence FROM processed_events WHERE collection = $1 AND aggregate_id = $2 FOR SHARE",
            )
            .bind(&guard.collection)
            .bind(guard.aggregate_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
            let actual = actual.map(sequence_from_db);
            if actual != guard.expected {
                return Err(ReadModelError::ConcurrencyConflict {
                    collection: guard.collection.clone(),
                    aggregate_id: guard.aggregate_id,
                    expected: guard.expected,
                    actual,
                });
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM read_models WHERE collection = $1")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM processed_events WHERE collection = $1")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(collection, "cleared postgres read model");
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| ReadModelError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }
}
