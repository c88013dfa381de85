//! Connection handling: per-connection tuning and the bounded pool every
//! worker checks its connection out of.
//!
//! The pool is built once by the caller and handed down by reference; there
//! is no process-wide instance.

use anyhow::{ensure, Context, Result};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub type PooledConn = PooledConnection<SqliteConnectionManager>;

/// Pool size for `concurrency` workers: two per worker plus headroom for
/// the orchestrator's own checkouts.
pub fn pool_capacity_for(concurrency: usize) -> usize {
    concurrency * 2 + 5
}

/// Tune a connection for concurrent benchmark traffic.
pub fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA cache_size = -65536;
         PRAGMA temp_store = MEMORY;",
    )
}

/// Bounded pool of SQLite connections to one database file.
#[derive(Clone)]
pub struct StorePool {
    inner: r2d2::Pool<SqliteConnectionManager>,
    capacity: usize,
}

impl StorePool {
    /// Open (creating if needed) the database at `path`.
    ///
    /// Fails when the database cannot be opened, which callers treat as a
    /// hard startup failure.
    pub fn open(path: impl AsRef<Path>, capacity: usize, busy_timeout: Duration) -> Result<Self> {
        ensure!(capacity > 0, "pool capacity must be positive");
        let path = path.as_ref();
        let manager = SqliteConnectionManager::file(path)
            .with_init(move |conn| configure_connection(conn, busy_timeout));
        let inner = r2d2::Pool::builder()
            .max_size(capacity as u32)
            .min_idle(Some(1))
            .connection_timeout(busy_timeout.max(Duration::from_secs(5)))
            .build(manager)
            .with_context(|| format!("opening store at {}", path.display()))?;
        log::info!(
            "Opened store {} (pool capacity {capacity})",
            path.display()
        );
        Ok(Self { inner, capacity })
    }

    /// Fail fast if `workers` connections plus one spare cannot be served.
    pub fn ensure_fits(&self, workers: usize) -> Result<()> {
        ensure!(
            self.capacity > workers,
            "pool capacity {} must exceed worker count {workers}",
            self.capacity
        );
        Ok(())
    }

    pub fn get(&self) -> Result<PooledConn> {
        self.inner.get().context("checking out a store connection")
    }
}
