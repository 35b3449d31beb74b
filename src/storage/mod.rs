// src/storage/mod.rs
//! Embedded relational storage
//!
//! - **Pool**: fixed-size, eagerly opened SQLite connection pool with
//!   first-come-first-served leasing and a bounded wait
//! - **SQLite wrapper**: query/update execution plus the long-term memory
//!   table used by the host
//!
//! # Schema
//!
//! ```text
//! long_term_memories
//! ├─ id                INTEGER PRIMARY KEY AUTOINCREMENT
//! ├─ task_description  TEXT
//! ├─ metadata          TEXT   (JSON)
//! ├─ datetime          TEXT
//! └─ score             REAL
//! ```

pub mod pool;
pub mod sqlite;

pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use sqlite::{AcceleratedSqliteWrapper, LongTermMemory, Row};
