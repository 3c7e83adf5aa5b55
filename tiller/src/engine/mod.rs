//! Database engine client
//!
//! One lazily-connected pool per instance, plus the coordinator-owned
//! metadata operations: stamping logical timestamps with only-increase
//! semantics and reading them back for lag accounting.
//!
//! The `_metadata` and `_table_timestamps` tables live on every instance and
//! replicate through the engine's own binlog stream together with the
//! client's writes.

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::topology::InstanceDescriptor;
use parking_lot::Mutex;
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row, TypeInfo};
use std::collections::HashMap;
use tracing::debug;

const METADATA_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS _metadata (id INT PRIMARY KEY, last_applied_timestamp BIGINT NOT NULL DEFAULT 0)",
    "CREATE TABLE IF NOT EXISTS _table_timestamps (table_name VARCHAR(128) PRIMARY KEY, last_timestamp BIGINT NOT NULL DEFAULT 0)",
    "INSERT IGNORE INTO _metadata (id, last_applied_timestamp) VALUES (1, 0)",
];

/// Pooled client for every managed instance
pub struct EngineClient {
    db: DatabaseConfig,
    pools: Mutex<HashMap<String, MySqlPool>>,
}

impl EngineClient {
    pub fn new(db: DatabaseConfig) -> Self {
        Self {
            db,
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn database_config(&self) -> &DatabaseConfig {
        &self.db
    }

    /// Get (or create) the connection pool for an instance. Pools connect
    /// lazily so constructing one never blocks on an unreachable host.
    pub fn pool(&self, instance: &InstanceDescriptor) -> MySqlPool {
        let key = format!("{}:{}", instance.host, instance.port);
        if let Some(pool) = self.pools.lock().get(&key) {
            return pool.clone();
        }

        let options = MySqlConnectOptions::new()
            .host(&instance.host)
            .port(instance.port)
            .username(&self.db.user)
            .password(&self.db.password)
            .database(&self.db.database);

        let pool = MySqlPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(self.db.connect_timeout())
            .connect_lazy_with(options);

        self.pools.lock().insert(key, pool.clone());
        pool
    }

    /// Cheap liveness probe
    pub async fn probe(&self, instance: &InstanceDescriptor) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool(instance)).await?;
        Ok(())
    }

    /// Create the coordinator metadata tables when they do not exist yet
    pub async fn ensure_metadata(&self, instance: &InstanceDescriptor) -> Result<()> {
        let pool = self.pool(instance);
        for stmt in METADATA_SCHEMA {
            sqlx::query(stmt).execute(&pool).await?;
        }
        Ok(())
    }

    /// Apply a client write plus its metadata stamp on one connection.
    ///
    /// The metadata updates use GREATEST so a stale timestamp (reissued by a
    /// restarted allocator shard) can never move the watermark backwards.
    pub async fn apply_write(
        &self,
        instance: &InstanceDescriptor,
        statement: &str,
        timestamp: u64,
        table: Option<&str>,
    ) -> Result<u64> {
        let pool = self.pool(instance);
        let mut conn = pool.acquire().await.map_err(Error::Database)?;

        let result = sqlx::query(statement).execute(&mut *conn).await?;

        sqlx::query(
            "UPDATE _metadata SET last_applied_timestamp = GREATEST(last_applied_timestamp, ?) WHERE id = 1",
        )
        .bind(timestamp)
        .execute(&mut *conn)
        .await?;

        if let Some(table) = table {
            sqlx::query(
                "INSERT INTO _table_timestamps (table_name, last_timestamp) VALUES (?, ?) \
                 ON DUPLICATE KEY UPDATE last_timestamp = GREATEST(last_timestamp, VALUES(last_timestamp))",
            )
            .bind(table)
            .bind(timestamp)
            .execute(&mut *conn)
            .await?;
        }

        Ok(result.rows_affected())
    }

    /// Run a read statement and return the rows as JSON objects
    pub async fn execute_read(
        &self,
        instance: &InstanceDescriptor,
        statement: &str,
    ) -> Result<Vec<serde_json::Map<String, Value>>> {
        let rows = sqlx::query(statement)
            .fetch_all(&self.pool(instance))
            .await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    /// The instance's global logical watermark, 0 when the row is missing
    pub async fn last_applied_timestamp(&self, instance: &InstanceDescriptor) -> Result<u64> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT last_applied_timestamp FROM _metadata LIMIT 1")
                .fetch_optional(&self.pool(instance))
                .await?;
        Ok(value.unwrap_or(0).max(0) as u64)
    }

    /// Per-table logical watermarks
    pub async fn table_timestamps(
        &self,
        instance: &InstanceDescriptor,
    ) -> Result<HashMap<String, u64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT table_name, last_timestamp FROM _table_timestamps")
                .fetch_all(&self.pool(instance))
                .await?;
        Ok(rows
            .into_iter()
            .map(|(table, ts)| (table, ts.max(0) as u64))
            .collect())
    }

    /// Application tables, excluding the coordinator's own metadata
    pub async fn user_tables(&self, instance: &InstanceDescriptor) -> Result<Vec<String>> {
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = ? AND table_type = 'BASE TABLE' \
             AND table_name NOT IN ('_metadata', '_table_timestamps')",
        )
        .bind(&self.db.database)
        .fetch_all(&self.pool(instance))
        .await?;
        Ok(tables)
    }

    /// TRUNCATE a user table. The name is validated because TRUNCATE cannot
    /// take a bind parameter.
    pub async fn truncate_table(&self, instance: &InstanceDescriptor, table: &str) -> Result<()> {
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::ExecutionError(format!(
                "refusing to truncate suspicious table name: {}",
                table
            )));
        }
        sqlx::query(&format!("TRUNCATE TABLE `{}`", table))
            .execute(&self.pool(instance))
            .await?;
        Ok(())
    }

    /// Zero the logical watermarks (administrative data-clear)
    pub async fn reset_metadata(&self, instance: &InstanceDescriptor) -> Result<()> {
        let pool = self.pool(instance);
        sqlx::query("UPDATE _metadata SET last_applied_timestamp = 0 WHERE id = 1")
            .execute(&pool)
            .await?;
        sqlx::query("DELETE FROM _table_timestamps")
            .execute(&pool)
            .await?;
        Ok(())
    }
}

/// Convert a row into a JSON object keyed by column name
fn row_to_json(row: &MySqlRow) -> serde_json::Map<String, Value> {
    let mut out = serde_json::Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        out.insert(
            column.name().to_string(),
            column_value(row, i, column.type_info().name()),
        );
    }
    out
}

fn column_value(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    match type_name {
        "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        t if t.contains("INT") && t.contains("UNSIGNED") => row
            .try_get::<Option<u64>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Number(v.into()))
            .unwrap_or(Value::Null),
        t if t.contains("INT") || t == "YEAR" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Number(v.into()))
            .unwrap_or(Value::Null),
        "FLOAT" | "DOUBLE" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .and_then(|v| serde_json::Number::from_f64(v).map(Value::Number))
            .unwrap_or(Value::Null),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_rfc3339()))
            .unwrap_or(Value::Null),
        "DATETIME" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        "TIME" => row
            .try_get::<Option<chrono::NaiveTime>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        other => {
            // VARCHAR/TEXT/DECIMAL/ENUM and anything else stringly typed
            match row.try_get::<Option<String>, _>(index) {
                Ok(v) => v.map(Value::String).unwrap_or(Value::Null),
                Err(e) => {
                    debug!("undecodable column type {}: {}", other, e);
                    Value::Null
                }
            }
        }
    }
}
