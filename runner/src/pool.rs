//! Connection pool adapter.
//!
//! The executor only sees the [`ConnectionPool`] and [`DbConnection`]
//! traits. [`SqlitePool`] is the production implementation over `rusqlite`;
//! tests substitute their own pools to inject failures.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use runner_core::{Result, RunnerError};
use rusqlite::{Batch, Connection, OpenFlags};

/// Database error text as reported by the driver.
pub type DbError = String;

/// One pooled database connection.
pub trait DbConnection: Send {
    /// Whether each statement commits on its own.
    fn autocommit(&self) -> bool;

    /// Switch commit mode. Disabling autocommit makes the next script run
    /// inside a transaction that stays open until [`commit`](Self::commit)
    /// or [`rollback`](Self::rollback).
    fn set_autocommit(&mut self, enabled: bool) -> std::result::Result<(), DbError>;

    /// Run a possibly multi-statement script. Result rows are discarded.
    fn execute_script(&mut self, sql: &str) -> std::result::Result<(), DbError>;

    fn commit(&mut self) -> std::result::Result<(), DbError>;

    fn rollback(&mut self) -> std::result::Result<(), DbError>;

    /// Whether an explicit transaction is currently open.
    fn in_transaction(&self) -> bool;
}

/// Hands out connections shared by all concurrently running tasks.
pub trait ConnectionPool: Send + Sync {
    /// Block until a connection is free. Fails with
    /// [`RunnerError::ConnectionUnavailable`] when none can be obtained.
    fn acquire(&self) -> Result<Box<dyn DbConnection>>;

    /// Give a connection back. Called exactly once per successful acquire.
    fn release(&self, conn: Box<dyn DbConnection>);
}

/// A connection checked out of a pool, returned on drop.
pub struct Checkout<'a> {
    pool: &'a dyn ConnectionPool,
    conn: Option<Box<dyn DbConnection>>,
}

impl<'a> Checkout<'a> {
    pub fn acquire(pool: &'a dyn ConnectionPool) -> Result<Self> {
        let conn = pool.acquire()?;
        Ok(Self {
            pool,
            conn: Some(conn),
        })
    }
}

impl Deref for Checkout<'_> {
    type Target = dyn DbConnection;

    fn deref(&self) -> &Self::Target {
        match self.conn.as_deref() {
            Some(conn) => conn,
            None => unreachable!("connection is only taken on drop"),
        }
    }
}

impl DerefMut for Checkout<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.conn.as_deref_mut() {
            Some(conn) => conn,
            None => unreachable!("connection is only taken on drop"),
        }
    }
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

// ---------------------------------------------------------------------------
//  SQLite
// ---------------------------------------------------------------------------

/// Apply per-connection settings: WAL so readers don't block the writer,
/// relaxed fsync, and a busy timeout so concurrent writers wait instead of
/// failing immediately.
pub fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(())
}

/// `rusqlite` connection with driver-style commit mode: starts in
/// autocommit, and with autocommit off the transaction is opened lazily
/// before the next script.
pub struct SqliteConnection {
    conn: Connection,
    autocommit: bool,
}

impl SqliteConnection {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            autocommit: true,
        }
    }
}

fn db_err(e: rusqlite::Error) -> DbError {
    e.to_string()
}

/// Step every statement of `sql` until it is done, discarding rows.
/// `execute_batch` stops a row-returning statement after its first row.
fn run_to_completion(conn: &Connection, sql: &str) -> rusqlite::Result<()> {
    let mut batch = Batch::new(conn, sql);
    while let Some(mut stmt) = batch.next()? {
        let mut rows = stmt.raw_query();
        while rows.next()?.is_some() {}
    }
    Ok(())
}

impl DbConnection for SqliteConnection {
    fn autocommit(&self) -> bool {
        self.autocommit
    }

    fn set_autocommit(&mut self, enabled: bool) -> std::result::Result<(), DbError> {
        if enabled && self.in_transaction() {
            return Err("cannot enable autocommit while a transaction is open".to_string());
        }
        self.autocommit = enabled;
        Ok(())
    }

    fn execute_script(&mut self, sql: &str) -> std::result::Result<(), DbError> {
        if !self.autocommit && !self.in_transaction() {
            self.conn.execute_batch("BEGIN").map_err(db_err)?;
        }
        run_to_completion(&self.conn, sql).map_err(db_err)
    }

    fn commit(&mut self) -> std::result::Result<(), DbError> {
        if self.in_transaction() {
            self.conn.execute_batch("COMMIT").map_err(db_err)?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> std::result::Result<(), DbError> {
        if self.in_transaction() {
            self.conn.execute_batch("ROLLBACK").map_err(db_err)?;
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }
}

/// Sizing and timeouts for [`SqlitePool`].
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub max_size: usize,
    pub acquire_timeout: Duration,
    pub busy_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 16,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

struct PoolState {
    idle: Vec<Box<dyn DbConnection>>,
    /// Connections currently alive, idle or checked out.
    open: usize,
}

/// Bounded pool of SQLite connections to one database file.
///
/// Connections are opened lazily up to `max_size`; once all are checked
/// out, `acquire` waits up to `acquire_timeout` for one to be released.
pub struct SqlitePool {
    path: PathBuf,
    options: PoolOptions,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl SqlitePool {
    /// Open the pool and verify the database is reachable by opening the
    /// first connection eagerly.
    pub fn open(path: impl AsRef<Path>, options: PoolOptions) -> Result<Self> {
        let pool = Self {
            path: path.as_ref().to_path_buf(),
            options: PoolOptions {
                max_size: options.max_size.max(1),
                ..options
            },
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
            }),
            available: Condvar::new(),
        };
        let first = pool.connect()?;
        {
            let mut state = pool.lock_state();
            state.idle.push(first);
            state.open = 1;
        }
        log::info!(
            "Opened SQLite pool on {} (max {} connections)",
            pool.path.display(),
            pool.options.max_size
        );
        Ok(pool)
    }

    pub fn max_size(&self) -> usize {
        self.options.max_size
    }

    /// Connections currently open, idle or checked out.
    pub fn open_connections(&self) -> usize {
        self.lock_state().open
    }

    fn connect(&self) -> Result<Box<dyn DbConnection>> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(&self.path, flags).map_err(|e| {
            RunnerError::ConnectionUnavailable(format!(
                "cannot open {}: {e}",
                self.path.display()
            ))
        })?;
        configure_connection(&conn, self.options.busy_timeout).map_err(|e| {
            RunnerError::ConnectionUnavailable(format!(
                "cannot configure {}: {e}",
                self.path.display()
            ))
        })?;
        Ok(Box::new(SqliteConnection::new(conn)))
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConnectionPool for SqlitePool {
    fn acquire(&self) -> Result<Box<dyn DbConnection>> {
        let deadline = Instant::now() + self.options.acquire_timeout;
        let mut state = self.lock_state();
        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(conn);
            }
            if state.open < self.options.max_size {
                // Reserve the slot before connecting outside the lock.
                state.open += 1;
                drop(state);
                return self.connect().inspect_err(|_| {
                    self.lock_state().open -= 1;
                    self.available.notify_one();
                });
            }
            let now = Instant::now();
            if now >= deadline {
                log::warn!(
                    "Connection pool exhausted: {} connections busy for {:?}",
                    state.open,
                    self.options.acquire_timeout
                );
                return Err(RunnerError::ConnectionUnavailable(format!(
                    "pool exhausted: all {} connections busy after {:?}",
                    self.options.max_size, self.options.acquire_timeout
                )));
            }
            state = self
                .available
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn release(&self, mut conn: Box<dyn DbConnection>) {
        if conn.in_transaction() {
            log::warn!("Connection returned with an open transaction; rolling back");
            if let Err(e) = conn.rollback() {
                // Unknown state: drop it and let the next acquire reconnect.
                log::warn!("Rollback on release failed ({e}); discarding connection");
                self.lock_state().open -= 1;
                self.available.notify_one();
                return;
            }
        }
        if !conn.autocommit() {
            // Present the pool default to the next borrower.
            let _ = conn.set_autocommit(true);
        }
        self.lock_state().idle.push(conn);
        self.available.notify_one();
    }
}
