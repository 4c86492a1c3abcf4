//! Bounded SQLite connection pool
//!
//! Each session owns one connection for its whole life, so the pool is a
//! plain idle list guarded by a mutex with a condvar for waiters. A checkout
//! never blocks longer than the configured wait.

use crate::error::{RepositoryError, RepositoryResult};
use crate::schema;
use arbor_config::WorkspaceConfig;
use parking_lot::{Condvar, Mutex};
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pool sizing and per-connection settings
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub path: PathBuf,
    pub max_connections: usize,
    pub min_idle: usize,
    pub wait: Duration,
    pub busy_timeout_ms: u64,
    pub wal_mode: bool,
}

impl PoolConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::from_workspace(path, &WorkspaceConfig::default())
    }

    pub fn from_workspace(path: impl Into<PathBuf>, config: &WorkspaceConfig) -> Self {
        Self {
            path: path.into(),
            max_connections: config.max_connections(),
            min_idle: config.min_idle(),
            wait: Duration::from_millis(config.connection_wait_ms),
            busy_timeout_ms: config.busy_timeout_ms,
            wal_mode: config.wal_mode,
        }
    }
}

struct PoolState {
    idle: Vec<Connection>,
    open: usize,
    closed: bool,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
}

/// Thread-safe pool of SQLite connections to one workspace database
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Open the database, apply migrations and warm `min_idle` connections
    pub fn new(config: PoolConfig) -> RepositoryResult<Self> {
        info!(path = ?config.path, max = config.max_connections, "Creating SQLite connection pool");

        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RepositoryError::Pool(format!("Failed to create directory: {}", e))
            })?;
        }

        let pool = Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    open: 0,
                    closed: false,
                }),
                available: Condvar::new(),
                config,
            }),
        };

        let first = pool.open_connection()?;
        schema::apply_migrations(&first)?;

        let mut warm = vec![first];
        for _ in 1..pool.inner.config.min_idle {
            warm.push(pool.open_connection()?);
        }
        {
            let mut state = pool.inner.state.lock();
            state.open = warm.len();
            state.idle = warm;
        }

        info!("SQLite connection pool initialized");
        Ok(pool)
    }

    pub fn path(&self) -> &Path {
        &self.inner.config.path
    }

    /// Check out a connection, waiting at most the configured duration
    pub fn get(&self) -> RepositoryResult<PooledConnection> {
        let deadline = Instant::now() + self.inner.config.wait;
        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return Err(RepositoryError::Pool("pool is closed".into()));
            }
            if let Some(conn) = state.idle.pop() {
                return Ok(self.wrap(conn));
            }
            if state.open < self.inner.config.max_connections {
                state.open += 1;
                drop(state);
                return match self.open_connection() {
                    Ok(conn) => Ok(self.wrap(conn)),
                    Err(e) => {
                        let mut state = self.inner.state.lock();
                        state.open -= 1;
                        self.inner.available.notify_one();
                        Err(e)
                    }
                };
            }
            if self
                .inner
                .available
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return Err(RepositoryError::Pool(format!(
                    "timed out after {}ms waiting for a connection",
                    self.inner.config.wait.as_millis()
                )));
            }
        }
    }

    /// Refuse further checkouts and drop idle connections
    ///
    /// Connections still checked out are closed when they are returned.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        let idle = std::mem::take(&mut state.idle);
        state.open -= idle.len();
        drop(state);
        self.inner.available.notify_all();
        debug!(closed = idle.len(), "Closed idle connections");
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            open: state.open,
            idle: state.idle.len(),
            max: self.inner.config.max_connections,
        }
    }

    fn wrap(&self, conn: Connection) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            pool: self.inner.clone(),
        }
    }

    fn open_connection(&self) -> RepositoryResult<Connection> {
        let conn = Connection::open(&self.inner.config.path)?;
        configure_pragmas(&conn, &self.inner.config)?;
        Ok(conn)
    }
}

fn configure_pragmas(conn: &Connection, config: &PoolConfig) -> RepositoryResult<()> {
    if config.wal_mode {
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
    }
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    conn.execute_batch("PRAGMA temp_store = MEMORY;")?;
    Ok(())
}

/// Pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub open: usize,
    pub idle: usize,
    pub max: usize,
}

/// A checked-out connection, returned to the pool on drop
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only taken in Drop
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
        let Some(conn) = self.conn.take() else {
            return;
        };
        if !conn.is_autocommit() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "Rollback on connection return failed");
            }
        }
        let mut state = self.pool.state.lock();
        if state.closed {
            state.open -= 1;
            drop(state);
            drop(conn);
        } else {
            state.idle.push(conn);
        }
        self.pool.available.notify_one();
    }
}
