// src/storage/pool.rs
//! Fixed-size SQLite connection pool
//!
//! Every connection is opened at construction; the pool never grows. The
//! path `:memory:` names one private in-memory database shared by every
//! connection of the pool, not one database per connection.
//!
//! # Architecture
//!
//! ```text
//! ConnectionPool
//! ├─ idle:    [Conn1, Conn2, ...]   (free connections)
//! ├─ leased:  n                     (held by PooledConnection guards)
//! └─ waiters: [t7, t8, ...]         (tickets, served first-come-first-served)
//! ```
//!
//! A caller that finds no idle connection parks on a condition variable
//! until its ticket reaches the head of the queue and a connection is
//! returned, or until `acquire_timeout` expires (`PoolExhausted`). Dropping a
//! [`PooledConnection`] always returns its connection, on every exit path.

use crate::backend::Backend;
use crate::utils::errors::{EngineError, Result};
use parking_lot::{Condvar, Mutex};
use rusqlite::{Connection, OpenFlags};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of connections (default: 4)
    pub pool_size: usize,

    /// Bounded wait for a free connection (default: 5s)
    pub acquire_timeout: Duration,

    /// SQLite busy handler timeout per connection (default: 5s)
    pub busy_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    pub fn with_pool_size(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Default::default()
        }
    }
}

/// Pool occupancy snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    pub idle: usize,
    pub leased: usize,
    pub waiters: usize,
}

struct PoolState {
    idle: Vec<Connection>,
    leased: usize,
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

struct PoolShared {
    state: Mutex<PoolState>,
    available: Condvar,
    size: usize,
}

impl PoolShared {
    fn release(&self, conn: Connection) {
        let mut state = self.state.lock();
        state.idle.push(conn);
        state.leased -= 1;
        drop(state);
        // Every waiter re-checks; only the head of the queue takes it.
        self.available.notify_all();
    }
}

/// Connection pool
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
    config: PoolConfig,
    path: PathBuf,
}

impl ConnectionPool {
    /// Open `config.pool_size` connections to `path`, tuned for `backend`
    pub fn open(path: impl AsRef<Path>, backend: Backend, config: PoolConfig) -> Result<Self> {
        Self::open_with(path, backend, config, |_| Ok(()))
    }

    /// Like [`open`](Self::open), running `init` on every connection as it
    /// is opened
    pub fn open_with(
        path: impl AsRef<Path>,
        backend: Backend,
        config: PoolConfig,
        init: impl Fn(&Connection) -> rusqlite::Result<()>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if config.pool_size == 0 {
            return Err(EngineError::ConfigError(
                "pool_size must be at least 1".to_string(),
            ));
        }

        let target = Target::for_path(&path);
        let mut idle = Vec::with_capacity(config.pool_size);
        for _ in 0..config.pool_size {
            let conn = open_connection(&target, backend, config.busy_timeout)?;
            init(&conn)?;
            idle.push(conn);
        }

        info!(
            "Connection pool opened at {:?} ({} connections, {} backend)",
            path, config.pool_size, backend
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    idle,
                    leased: 0,
                    waiters: VecDeque::new(),
                    next_ticket: 0,
                }),
                available: Condvar::new(),
                size: config.pool_size,
            }),
            config,
            path,
        })
    }

    /// Lease a connection, waiting in line up to `acquire_timeout`
    pub fn acquire(&self) -> Result<PooledConnection> {
        let started = Instant::now();
        let deadline = started.checked_add(self.config.acquire_timeout);

        let mut state = self.shared.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiters.push_back(ticket);

        loop {
            if state.waiters.front() == Some(&ticket) {
                if let Some(conn) = state.idle.pop() {
                    state.waiters.pop_front();
                    state.leased += 1;
                    let more_waiting = !state.waiters.is_empty() && !state.idle.is_empty();
                    drop(state);
                    if more_waiting {
                        self.shared.available.notify_all();
                    }

                    let waited = started.elapsed();
                    metrics::histogram!("accelerate_pool_wait_seconds")
                        .record(waited.as_secs_f64());
                    trace!("Leased connection {} after {:?}", ticket, waited);

                    return Ok(PooledConnection {
                        conn: Some(conn),
                        shared: Arc::clone(&self.shared),
                    });
                }
            }

            let timed_out = match deadline {
                Some(deadline) => self
                    .shared
                    .available
                    .wait_until(&mut state, deadline)
                    .timed_out(),
                None => {
                    self.shared.available.wait(&mut state);
                    false
                }
            };
            if timed_out {
                // Last look before giving up
                if state.waiters.front() == Some(&ticket) && !state.idle.is_empty() {
                    continue;
                }
                state.waiters.retain(|t| *t != ticket);
                drop(state);
                // Our place in line may have been blocking the next waiter
                self.shared.available.notify_all();

                let waited = started.elapsed();
                metrics::counter!("accelerate_pool_exhausted_total").increment(1);
                warn!("Connection pool exhausted after {:?}", waited);
                return Err(EngineError::PoolExhausted { waited });
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            size: self.shared.size,
            idle: state.idle.len(),
            leased: state.leased,
            waiters: state.waiters.len(),
        }
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// What each pooled connection actually opens
enum Target {
    File(PathBuf),
    /// Shared-cache URI naming one in-memory database for the whole pool
    SharedMemory(String),
}

impl Target {
    fn for_path(path: &Path) -> Self {
        if path.as_os_str() == ":memory:" {
            Target::SharedMemory(format!(
                "file:accelerate-{}?mode=memory&cache=shared",
                ulid::Ulid::new()
            ))
        } else {
            Target::File(path.to_path_buf())
        }
    }
}

fn open_connection(target: &Target, backend: Backend, busy_timeout: Duration) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;

    let opened = match target {
        Target::File(path) => Connection::open_with_flags(path, flags),
        Target::SharedMemory(uri) => {
            Connection::open_with_flags(uri, flags | OpenFlags::SQLITE_OPEN_URI)
        }
    };
    let conn = opened.map_err(|e| {
        let name = match target {
            Target::File(path) => path.display().to_string(),
            Target::SharedMemory(uri) => uri.clone(),
        };
        EngineError::StorageUnavailable(format!("cannot open {}: {}", name, e))
    })?;
    conn.busy_timeout(busy_timeout)?;

    if backend.is_native() {
        let mode: String =
            conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.set_prepared_statement_cache_capacity(64);
        debug!("Opened native connection (journal_mode={})", mode);
    } else {
        debug!("Opened fallback connection");
    }

    Ok(conn)
}

/// Leased connection; returned to the pool on drop
pub struct PooledConnection {
    conn: Option<Connection>,
    shared: Arc<PoolShared>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `drop` takes the connection out
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.release(conn);
        }
    }
}
