//! SQLite context backend
//!
//! Each context is one row. The JSON document carries the run fields; the
//! store-owned timestamps live in their own integer columns (microseconds
//! since the epoch) so ordering and expiry are evaluated in SQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;
use std::time::Duration;
use toolrun_core::RunId;
use tracing::{debug, info};

use crate::backend::ContextBackend;
use crate::context::{expiry, ContextFilter, ContextUpdate, ExecutionContext};
use crate::error::{ContextStoreError, ContextStoreResult};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS execution_contexts (
        run_id TEXT PRIMARY KEY NOT NULL,
        document TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        expires_at INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_execution_contexts_created_at
        ON execution_contexts (created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_execution_contexts_expires_at
        ON execution_contexts (expires_at)",
];

const SELECT_LIVE: &str = "SELECT run_id, document, created_at, updated_at, expires_at
    FROM execution_contexts
    WHERE (expires_at IS NULL OR expires_at > ?)";

/// Durable context backend on SQLite
#[derive(Clone)]
pub struct SqliteContextBackend {
    pool: SqlitePool,
    ttl: Option<Duration>,
}

impl SqliteContextBackend {
    /// Connect to `database_url`, creating the database and schema if needed
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        ttl: Option<Duration>,
    ) -> ContextStoreResult<Self> {
        info!("Connecting to context database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| {
                ContextStoreError::ConfigError(format!(
                    "Invalid SQLite URL {}: {}",
                    database_url, e
                ))
            })?
            .create_if_missing(true);

        let in_memory = is_in_memory(database_url);
        if !in_memory {
            ensure_parent_dir(options.get_filename())?;
        }

        // Every connection to an in-memory database sees a fresh database,
        // so the pool is pinned to a single long-lived connection.
        let pool_options = if in_memory {
            debug!("Using in-memory SQLite database");
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| ContextStoreError::ConnectionFailed(e.to_string()))?;

        let backend = Self::from_pool(pool, ttl);
        backend.migrate().await?;

        debug!(
            "Context database ready with {} max connections",
            if in_memory { 1 } else { max_connections }
        );
        Ok(backend)
    }

    /// Wrap an existing pool. The schema must already exist; see [`migrate`](Self::migrate).
    pub fn from_pool(pool: SqlitePool, ttl: Option<Duration>) -> Self {
        Self { pool, ttl }
    }

    /// Create the schema if it does not exist
    pub async fn migrate(&self) -> ContextStoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| ContextStoreError::MigrationFailed(e.to_string()))?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn update_locked(
        &self,
        conn: &mut SqliteConnection,
        run_id: &RunId,
        update: &ContextUpdate,
    ) -> ContextStoreResult<bool> {
        let now = Utc::now();
        let row = sqlx::query(&format!("{} AND run_id = ?", SELECT_LIVE))
            .bind(now.timestamp_micros())
            .bind(run_id.as_str())
            .fetch_optional(&mut *conn)
            .await?;

        let Some(row) = row else {
            return Ok(false);
        };

        let existing = decode_row(&row)?;
        let updated = update.apply_to(&existing)?;
        let created_at = existing.created_at.unwrap_or(now);

        sqlx::query(
            "UPDATE execution_contexts
             SET document = ?, created_at = ?, updated_at = ?, expires_at = ?
             WHERE run_id = ?",
        )
        .bind(encode_document(&updated)?)
        .bind(updated.created_at.unwrap_or(created_at).timestamp_micros())
        .bind(now.timestamp_micros())
        .bind(expiry(now, self.ttl).map(|t| t.timestamp_micros()))
        .bind(run_id.as_str())
        .execute(&mut *conn)
        .await?;

        Ok(true)
    }
}

#[async_trait]
impl ContextBackend for SqliteContextBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn save(&self, context: ExecutionContext) -> ContextStoreResult<()> {
        let now = Utc::now();
        let explicit_created_at = context.created_at.is_some();
        let created_at = context.created_at.unwrap_or(now);

        // An expired predecessor counts as absent, so its created_at is replaced.
        sqlx::query(
            "INSERT INTO execution_contexts (run_id, document, created_at, updated_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(run_id) DO UPDATE SET
                document = excluded.document,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at,
                created_at = CASE
                    WHEN ?6 THEN excluded.created_at
                    WHEN execution_contexts.expires_at IS NOT NULL
                         AND execution_contexts.expires_at <= ?4 THEN excluded.created_at
                    ELSE execution_contexts.created_at
                END",
        )
        .bind(context.run_id.as_str())
        .bind(encode_document(&context)?)
        .bind(created_at.timestamp_micros())
        .bind(now.timestamp_micros())
        .bind(expiry(now, self.ttl).map(|t| t.timestamp_micros()))
        .bind(explicit_created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, run_id: &RunId) -> ContextStoreResult<Option<ExecutionContext>> {
        let row = sqlx::query(&format!("{} AND run_id = ?", SELECT_LIVE))
            .bind(Utc::now().timestamp_micros())
            .bind(run_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn update(&self, run_id: &RunId, update: &ContextUpdate) -> ContextStoreResult<bool> {
        let mut conn = self.pool.acquire().await?;

        // Take the write lock up front so the read-modify-write is atomic.
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        let outcome = self.update_locked(&mut conn, run_id, update).await;
        let finish = if outcome.is_ok() { "COMMIT" } else { "ROLLBACK" };
        sqlx::query(finish).execute(&mut *conn).await?;

        outcome
    }

    async fn delete(&self, run_id: &RunId) -> ContextStoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM execution_contexts
             WHERE run_id = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(run_id.as_str())
        .bind(Utc::now().timestamp_micros())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(
        &self,
        filter: &ContextFilter,
        limit: usize,
        offset: usize,
    ) -> ContextStoreResult<Vec<ExecutionContext>> {
        let now = Utc::now().timestamp_micros();
        let order = "ORDER BY created_at DESC, run_id ASC";

        if filter.is_empty() {
            let rows = sqlx::query(&format!("{} {} LIMIT ? OFFSET ?", SELECT_LIVE, order))
                .bind(now)
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .bind(i64::try_from(offset).unwrap_or(i64::MAX))
                .fetch_all(&self.pool)
                .await?;
            return rows.iter().map(decode_row).collect();
        }

        let rows = sqlx::query(&format!("{} {}", SELECT_LIVE, order))
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        let mut matching = Vec::new();
        for row in &rows {
            let context = decode_row(row)?;
            if filter.matches(&context) {
                matching.push(context);
            }
        }
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, filter: &ContextFilter) -> ContextStoreResult<usize> {
        let now = Utc::now().timestamp_micros();

        if filter.is_empty() {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM execution_contexts
                 WHERE (expires_at IS NULL OR expires_at > ?)",
            )
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
            return Ok(count.max(0) as usize);
        }

        let rows = sqlx::query(SELECT_LIVE)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        let mut count = 0;
        for row in &rows {
            if filter.matches(&decode_row(row)?) {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn purge_expired(&self) -> ContextStoreResult<usize> {
        let result = sqlx::query(
            "DELETE FROM execution_contexts
             WHERE expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(Utc::now().timestamp_micros())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn health_check(&self) -> ContextStoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| ContextStoreError::ConnectionFailed(e.to_string()))?;
        Ok(())
    }
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

fn ensure_parent_dir(path: &std::path::Path) -> ContextStoreResult<()> {
    if let Some(parent_dir) = path.parent() {
        if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
            info!("Creating database directory: {:?}", parent_dir);
            std::fs::create_dir_all(parent_dir).map_err(|e| {
                ContextStoreError::ConfigError(format!(
                    "Failed to create database directory {:?}: {}",
                    parent_dir, e
                ))
            })?;
        }
    }
    Ok(())
}

/// Serialize a context without the column-backed timestamps
fn encode_document(context: &ExecutionContext) -> ContextStoreResult<String> {
    let mut document = context.to_document()?;
    if let JsonValue::Object(ref mut map) = document {
        map.remove("created_at");
        map.remove("updated_at");
        map.remove("expires_at");
    }
    Ok(serde_json::to_string(&document)?)
}

fn decode_row(row: &SqliteRow) -> ContextStoreResult<ExecutionContext> {
    let document: String = row.try_get("document")?;
    let created_at: i64 = row.try_get("created_at")?;
    let updated_at: i64 = row.try_get("updated_at")?;
    let expires_at: Option<i64> = row.try_get("expires_at")?;

    let mut context = ExecutionContext::from_document(serde_json::from_str(&document)?)?;
    context.created_at = DateTime::from_timestamp_micros(created_at);
    context.updated_at = DateTime::from_timestamp_micros(updated_at);
    context.expires_at = expires_at.and_then(DateTime::from_timestamp_micros);
    Ok(context)
}
