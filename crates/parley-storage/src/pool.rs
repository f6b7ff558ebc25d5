// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded pool of connections dedicated to turns.
//!
//! Each turn needs its own connection because a SQLite transaction belongs to
//! the connection it was started on. Connections are opened lazily, reused
//! after a clean commit or rollback, and discarded otherwise so that closing
//! them rolls back whatever they still hold.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use parley_core::ParleyError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::database::map_tr_err;

/// Opens a connection with the per-connection PRAGMAs applied.
pub(crate) async fn open_connection(
    path: &str,
    busy_timeout: Duration,
) -> Result<tokio_rusqlite::Connection, ParleyError> {
    let conn = tokio_rusqlite::Connection::open(path)
        .await
        .map_err(ParleyError::storage)?;
    conn.call(move |conn| -> Result<(), rusqlite::Error> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;")?;
        Ok(())
    })
    .await
    .map_err(map_tr_err)?;
    Ok(conn)
}

/// Pool of turn connections, at most `size` checked out at once.
pub struct TurnPool {
    path: String,
    busy_timeout: Duration,
    idle: Mutex<Vec<tokio_rusqlite::Connection>>,
    permits: Arc<Semaphore>,
}

impl TurnPool {
    pub(crate) fn new(path: String, size: usize, busy_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            path,
            busy_timeout,
            idle: Mutex::new(Vec::with_capacity(size)),
            permits: Arc::new(Semaphore::new(size.max(1))),
        })
    }

    /// Waits for a free slot and returns a connection for it.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection, ParleyError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ParleyError::Internal("turn pool is closed".into()))?;

        let reused = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                debug!(path = %self.path, "opening turn connection");
                open_connection(&self.path, self.busy_timeout).await?
            }
        };

        Ok(PooledConnection {
            conn,
            pool: Arc::clone(self),
            discard: false,
            _permit: permit,
        })
    }

    /// Number of connections waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drops every idle connection and refuses further checkouts.
    pub(crate) fn close(&self) {
        self.permits.close();
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// A checked-out turn connection. Returned to the pool on drop unless discarded.
pub struct PooledConnection {
    conn: tokio_rusqlite::Connection,
    pool: Arc<TurnPool>,
    discard: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Closes the connection on drop instead of returning it.
    pub fn discard(&mut self) {
        self.discard = true;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // The last handle to a discarded connection goes away here, which
        // closes it and rolls back any open transaction.
        if !self.discard && !self.pool.permits.is_closed() {
            self.pool
                .idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(self.conn.clone());
        }
    }
}
