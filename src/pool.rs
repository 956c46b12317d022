//! Bounded pool of reusable store connections.
//!
//! `acquire` hands out an idle connection when one exists, opens a new one
//! while fewer than `capacity` are live, and otherwise blocks until another
//! caller releases. Waiters are served in arrival order. Connections return
//! to the pool when the [`Pooled`] guard drops, so every exit path releases.
//!
//! A failure to open a connection is reported as [`PoolError::Connect`] and
//! is meant to be treated as unrecoverable by the caller.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::db::{Database, DbError};

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("unable to connect to the database: {0}")]
    Connect(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Opens new connections for a [`Pool`].
pub trait Connector: Send + Sync {
    type Connection: Send;
    type Error: std::error::Error + Send + Sync + 'static;

    fn connect(&self) -> Result<Self::Connection, Self::Error>;
}

/// Connector for the SQLite inventory database.
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    /// Migrate the database at `path` once; pooled connections then skip it.
    pub fn new(path: &Path) -> Result<Self, DbError> {
        Database::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Connector for SqliteConnector {
    type Connection = Database;
    type Error = DbError;

    fn connect(&self) -> Result<Database, DbError> {
        log::debug!("Opening pooled connection to {}", self.path.display());
        Database::connect(&self.path)
    }
}

pub type StorePool = Pool<SqliteConnector>;

/// A pool over a fresh database in a temp dir. Keep the dir alive.
#[cfg(test)]
pub(crate) fn test_pool(capacity: usize) -> (tempfile::TempDir, StorePool) {
    let dir = tempfile::tempdir().unwrap();
    let connector = SqliteConnector::new(&dir.path().join("files.db")).unwrap();
    (dir, Pool::new(connector, capacity))
}

struct PoolState<T> {
    idle: Vec<T>,
    live: usize,
    next_ticket: u64,
    queue: VecDeque<u64>,
}

pub struct Pool<C: Connector> {
    connector: C,
    capacity: usize,
    state: Mutex<PoolState<C::Connection>>,
    changed: Condvar,
}

impl<C: Connector> Pool<C> {
    /// Create a pool holding at most `capacity` live connections (minimum 1).
    /// Connections are opened lazily.
    pub fn new(connector: C, capacity: usize) -> Self {
        Self {
            connector,
            capacity: capacity.max(1),
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                live: 0,
                next_ticket: 0,
                queue: VecDeque::new(),
            }),
            changed: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of connections opened and not yet lost to a failure.
    pub fn live(&self) -> usize {
        self.lock().live
    }

    pub fn idle(&self) -> usize {
        self.lock().idle.len()
    }

    /// Callers currently blocked in `acquire`.
    pub fn waiting(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<C::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a connection, blocking while the pool is exhausted.
    pub fn acquire(&self) -> Result<Pooled<'_, C>, PoolError> {
        let mut state = self.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(ticket);

        loop {
            if state.queue.front() == Some(&ticket) {
                if let Some(conn) = state.idle.pop() {
                    state.queue.pop_front();
                    self.changed.notify_all();
                    return Ok(Pooled { pool: self, conn: Some(conn) });
                }
                if state.live < self.capacity {
                    state.live += 1;
                    state.queue.pop_front();
                    self.changed.notify_all();
                    drop(state);
                    return self.open();
                }
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn open(&self) -> Result<Pooled<'_, C>, PoolError> {
        match self.connector.connect() {
            Ok(conn) => Ok(Pooled { pool: self, conn: Some(conn) }),
            Err(e) => {
                // Give the slot back so a later caller may try again
                self.lock().live -= 1;
                self.changed.notify_all();
                Err(PoolError::Connect(Box::new(e)))
            }
        }
    }

    fn release(&self, conn: C::Connection) {
        self.lock().idle.push(conn);
        self.changed.notify_all();
    }
}

/// A connection on loan from a [`Pool`]; returned when dropped.
pub struct Pooled<'a, C: Connector> {
    pool: &'a Pool<C>,
    conn: Option<C::Connection>,
}

impl<C: Connector> Deref for Pooled<'_, C> {
    type Target = C::Connection;

    fn deref(&self) -> &C::Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<C: Connector> DerefMut for Pooled<'_, C> {
    fn deref_mut(&mut self) -> &mut C::Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<C: Connector> Drop for Pooled<'_, C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
