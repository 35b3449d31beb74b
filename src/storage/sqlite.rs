// src/storage/sqlite.rs
//! Pooled SQLite wrapper
//!
//! Every operation leases one connection for its duration. Native
//! connections run in WAL mode and reuse prepared statements; fallback
//! connections use SQLite defaults and prepare each statement afresh.

use crate::backend::{global_resolver, Backend, BackendResolver, Component};
use crate::storage::pool::{ConnectionPool, PoolConfig, PoolStats};
use crate::utils::errors::{EngineError, Result};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Statement};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::path::Path;
use tracing::{debug, info, trace};

/// One result row: column name → value, in column order
pub type Row = Map<String, Value>;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS long_term_memories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_description TEXT,
        metadata TEXT,
        datetime TEXT,
        score REAL
    )
"#;

/// Long-term memory row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermMemory {
    pub task_description: String,

    /// Parsed metadata; text that is not JSON is kept as a string
    pub metadata: Value,

    pub datetime: String,

    pub score: f64,
}

/// SQLite wrapper over a fixed connection pool
pub struct AcceleratedSqliteWrapper {
    backend: Backend,
    pool: ConnectionPool,
}

impl AcceleratedSqliteWrapper {
    /// Open `db_path` with `pool_size` connections, using the process-wide
    /// resolver and configuration
    pub fn new(db_path: impl AsRef<Path>, pool_size: usize) -> Result<Self> {
        Self::with_resolver(global_resolver(), db_path, pool_size)
    }

    pub fn with_resolver(
        resolver: &BackendResolver,
        db_path: impl AsRef<Path>,
        pool_size: usize,
    ) -> Result<Self> {
        let backend = resolver.resolve(Component::Database);
        let storage = resolver.config().storage;
        let config = PoolConfig {
            pool_size,
            acquire_timeout: storage.acquire_timeout(),
            busy_timeout: storage.busy_timeout(),
        };
        Self::with_backend(backend, db_path, config)
    }

    pub fn with_backend(
        backend: Backend,
        db_path: impl AsRef<Path>,
        config: PoolConfig,
    ) -> Result<Self> {
        let pool = ConnectionPool::open_with(db_path, backend, config, |conn| {
            conn.execute_batch(SCHEMA)
        })?;

        info!(
            "SQLite wrapper ready at {:?} ({} backend)",
            pool.path(),
            backend
        );
        Ok(Self { backend, pool })
    }

    pub fn implementation(&self) -> Backend {
        self.backend
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Lease a connection, prepare `sql` on it and hand the statement to
    /// `run`. Native connections reuse cached statements.
    fn with_statement<T>(
        &self,
        sql: &str,
        run: impl FnOnce(&mut Statement<'_>) -> Result<T>,
    ) -> Result<T> {
        let conn = self.pool.acquire()?;
        match self.backend {
            Backend::Native => {
                let mut stmt = conn.prepare_cached(sql)?;
                run(&mut *stmt)
            }
            Backend::Fallback => {
                let mut stmt = conn.prepare(sql)?;
                run(&mut stmt)
            }
        }
    }

    /// Run a read-only statement and return its rows
    pub fn execute_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        trace!("Query: {}", sql);
        self.with_statement(sql, |stmt| {
            if !stmt.readonly() {
                return Err(EngineError::QueryFailed(
                    "execute_query requires a read-only statement".to_string(),
                ));
            }

            let columns: Vec<String> =
                stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = stmt.query(params_from_iter(params.iter().map(to_sql)))?;

            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut record = Row::new();
                for (index, column) in columns.iter().enumerate() {
                    record.insert(column.clone(), from_sql(row.get_ref(index)?));
                }
                out.push(record);
            }
            Ok(out)
        })
    }

    /// Run a mutating statement and return the affected row count
    pub fn execute_update(&self, sql: &str, params: &[Value]) -> Result<usize> {
        trace!("Update: {}", sql);
        self.with_statement(sql, |stmt| {
            Ok(stmt.execute(params_from_iter(params.iter().map(to_sql)))?)
        })
    }

    /// Persist one long-term memory row
    pub fn save_memory(
        &self,
        task_description: &str,
        metadata: &Value,
        datetime: &str,
        score: f64,
    ) -> Result<()> {
        let metadata = serde_json::to_string(metadata)
            .map_err(|e| EngineError::QueryFailed(format!("metadata: {}", e)))?;

        self.with_statement(
            "INSERT INTO long_term_memories (task_description, metadata, datetime, score) \
             VALUES (?1, ?2, ?3, ?4)",
            |stmt| Ok(stmt.execute(params![task_description, metadata, datetime, score])?),
        )?;
        debug!("Saved long-term memory for '{}'", task_description);
        Ok(())
    }

    /// Most recent `latest_n` rows whose description equals `task_description`
    /// exactly, newest first
    pub fn load_memories(
        &self,
        task_description: &str,
        latest_n: usize,
    ) -> Result<Vec<LongTermMemory>> {
        let limit = i64::try_from(latest_n).unwrap_or(i64::MAX);
        self.with_statement(
            "SELECT task_description, metadata, datetime, score \
             FROM long_term_memories \
             WHERE task_description = ?1 \
             ORDER BY datetime DESC, id DESC \
             LIMIT ?2",
            |stmt| {
                let rows = stmt
                    .query_map(params![task_description, limit], |row| {
                        let metadata: Option<String> = row.get(1)?;
                        Ok(LongTermMemory {
                            task_description: row
                                .get::<_, Option<String>>(0)?
                                .unwrap_or_default(),
                            metadata: parse_metadata(metadata),
                            datetime: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                            score: row.get::<_, Option<f64>>(3)?.unwrap_or_default(),
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            },
        )
    }

    /// Delete every long-term memory row
    pub fn reset_memories(&self) -> Result<usize> {
        let removed = self.execute_update("DELETE FROM long_term_memories", &[])?;
        info!("Removed {} long-term memories", removed);
        Ok(removed)
    }
}

fn parse_metadata(raw: Option<String>) -> Value {
    match raw {
        None => Value::Null,
        Some(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
    }
}

/// JSON parameter → SQLite value. Arrays and objects bind as JSON text.
fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// SQLite value → JSON. Blobs become byte arrays.
fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}
