//! Row sources for the table-reading job types (backup, extract).

use std::collections::HashMap;

use async_trait::async_trait;
use atrium_core::job::validate_identifier;
use atrium_db::DbPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::WorkerError;

/// Connection cap for the pool a worker process opens for itself.
const WORKER_MAX_CONNECTIONS: u32 = 2;

/// Something that can return the rows of a named table as JSON objects.
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Fetch up to `limit` rows (all rows when `None`) of `table`.
    async fn fetch_rows(
        &self,
        table: &str,
        limit: Option<i64>,
    ) -> Result<Vec<serde_json::Value>, WorkerError>;
}

/// Reads rows from Postgres with `row_to_json`.
pub struct PgTableSource {
    pool: DbPool,
}

impl PgTableSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Build a lazily-connecting pool, so a worker whose job never touches
    /// the database never opens a connection.
    pub fn connect_lazy(database_url: &str) -> Result<Self, WorkerError> {
        let pool = PgPoolOptions::new()
            .max_connections(WORKER_MAX_CONNECTIONS)
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl TableSource for PgTableSource {
    async fn fetch_rows(
        &self,
        table: &str,
        limit: Option<i64>,
    ) -> Result<Vec<serde_json::Value>, WorkerError> {
        validate_identifier(table)?;

        // `table` is a validated identifier; LIMIT NULL means no limit.
        let query = format!("SELECT row_to_json(t)::jsonb FROM \"{table}\" t LIMIT $1");
        let rows = sqlx::query_scalar::<_, serde_json::Value>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

/// Fixed in-memory tables, for dry runs and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryTableSource {
    tables: HashMap<String, Vec<serde_json::Value>>,
}

impl MemoryTableSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: impl Into<String>, rows: Vec<serde_json::Value>) -> Self {
        self.tables.insert(name.into(), rows);
        self
    }
}

#[async_trait]
impl TableSource for MemoryTableSource {
    async fn fetch_rows(
        &self,
        table: &str,
        limit: Option<i64>,
    ) -> Result<Vec<serde_json::Value>, WorkerError> {
        validate_identifier(table)?;
        let rows = self
            .tables
            .get(table)
            .ok_or_else(|| WorkerError::InvalidPayload(format!("Table '{table}' does not exist")))?;

        let take = limit
            .map(|n| usize::try_from(n.max(0)).unwrap_or(usize::MAX))
            .unwrap_or(rows.len());
        Ok(rows.iter().take(take).cloned().collect())
    }
}
