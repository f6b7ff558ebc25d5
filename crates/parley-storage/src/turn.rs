// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transactional turns.
//!
//! A [`Turn`] is one `BEGIN IMMEDIATE` transaction on a pooled connection.
//! `IMMEDIATE` takes the database write lock up front, so two turns never
//! interleave their writes: the second waits (up to `busy_timeout`) until the
//! first commits or rolls back. Every query function that takes an
//! [`Executor`] can run inside a turn.

use parley_core::ParleyError;
use tracing::{debug, warn};

use crate::database::map_tr_err;
use crate::pool::PooledConnection;

/// Something queries can run against: the shared database handle (autocommit)
/// or a turn (transactional).
pub trait Executor: Send + Sync {
    fn connection(&self) -> &tokio_rusqlite::Connection;
}

/// An open write transaction. Must be finished with [`Turn::commit`] or
/// [`Turn::rollback`]; dropping it unfinished closes its connection, which
/// makes SQLite discard the transaction.
pub struct Turn {
    pooled: PooledConnection,
    finished: bool,
}

impl Turn {
    pub(crate) async fn begin(pooled: PooledConnection) -> Result<Self, ParleyError> {
        pooled
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                if !conn.is_autocommit() {
                    conn.execute_batch("ROLLBACK")?;
                }
                conn.execute_batch("BEGIN IMMEDIATE")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("turn transaction started");
        Ok(Self {
            pooled,
            finished: false,
        })
    }

    /// Commits every write made through this turn.
    pub async fn commit(mut self) -> Result<(), ParleyError> {
        self.finish("COMMIT").await?;
        debug!("turn committed");
        Ok(())
    }

    /// Discards every write made through this turn.
    pub async fn rollback(mut self) -> Result<(), ParleyError> {
        self.finish("ROLLBACK").await?;
        debug!("turn rolled back");
        Ok(())
    }

    async fn finish(&mut self, statement: &'static str) -> Result<(), ParleyError> {
        self.pooled
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch(statement)?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        self.finished = true;
        Ok(())
    }
}

impl Executor for Turn {
    fn connection(&self) -> &tokio_rusqlite::Connection {
        self.pooled.connection()
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        if !self.finished {
            warn!("turn dropped without commit or rollback, discarding its connection");
            self.pooled.discard();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parley_config::model::StorageConfig;
    use tempfile::tempdir;

    use crate::database::Database;

    async fn setup_db(pool: usize) -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            database_path: dir.path().join("turn.db").to_string_lossy().into_owned(),
            wal_mode: true,
            busy_timeout_ms: 5_000,
            turn_pool_size: pool,
        };
        let db = Database::open_with(&config).await.unwrap();
        (db, dir)
    }

    async fn count_rows(db: &Database) -> i64 {
        db.connection()
            .call(|conn| -> Result<i64, rusqlite::Error> {
                conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
            })
            .await
            .unwrap()
    }

    async fn insert_row(exec: &impl super::Executor, id: &'static str) {
        exec.connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO sessions (id, identity, flow, step, status, created_at, updated_at)
                     VALUES (?1, ?1, 'FAQ', 1, 'CLOSED', 't', 't')",
                    [id],
                )?;
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn commit_persists_writes() {
        let (db, _dir) = setup_db(2).await;
        let turn = db.begin_turn().await.unwrap();
        insert_row(&turn, "a").await;
        turn.commit().await.unwrap();
        assert_eq!(count_rows(&db).await, 1);
        assert_eq!(db.turn_pool().idle_count(), 1);
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let (db, _dir) = setup_db(2).await;
        let turn = db.begin_turn().await.unwrap();
        insert_row(&turn, "a").await;
        turn.rollback().await.unwrap();
        assert_eq!(count_rows(&db).await, 0);
    }

    #[tokio::test]
    async fn dropped_turn_rolls_back_and_releases_lock() {
        let (db, _dir) = setup_db(2).await;
        {
            let turn = db.begin_turn().await.unwrap();
            insert_row(&turn, "a").await;
        }
        assert_eq!(db.turn_pool().idle_count(), 0);

        // The write lock must be free again for a new turn.
        let turn = tokio::time::timeout(Duration::from_secs(3), db.begin_turn())
            .await
            .expect("lock released")
            .unwrap();
        insert_row(&turn, "b").await;
        turn.commit().await.unwrap();
        assert_eq!(count_rows(&db).await, 1);
    }

    #[tokio::test]
    async fn second_turn_waits_for_first() {
        let (db, _dir) = setup_db(2).await;
        let first = db.begin_turn().await.unwrap();
        insert_row(&first, "a").await;

        let db2 = db.clone();
        let second = tokio::spawn(async move {
            let turn = db2.begin_turn().await.unwrap();
            let n = count_rows_in(&turn).await;
            turn.commit().await.unwrap();
            n
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!second.is_finished());
        first.commit().await.unwrap();
        assert_eq!(second.await.unwrap(), 1);
    }

    async fn count_rows_in(exec: &impl super::Executor) -> i64 {
        exec.connection()
            .call(|conn| -> Result<i64, rusqlite::Error> {
                conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
            })
            .await
            .unwrap()
    }
}
