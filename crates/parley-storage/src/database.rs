// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database lifecycle: schema setup, PRAGMAs, the shared autocommit
//! connection, and the turn pool.

use std::path::Path;
use std::sync::Arc;

use parley_config::model::StorageConfig;
use parley_core::ParleyError;
use tracing::{debug, info};

use crate::migrations;
use crate::pool::{TurnPool, open_connection};
use crate::turn::{Executor, Turn};

/// Maps a tokio-rusqlite call error into a storage error.
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> ParleyError {
    ParleyError::Storage {
        source: Box::new(e),
    }
}

/// Handle to the Parley database.
///
/// Cloning is cheap; clones share the autocommit connection and the turn pool.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
    turns: Arc<TurnPool>,
    path: String,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}

impl Database {
    /// Opens the database at `path` with default storage settings.
    pub async fn open(path: &str) -> Result<Self, ParleyError> {
        let config = StorageConfig {
            database_path: path.to_string(),
            ..StorageConfig::default()
        };
        Self::open_with(&config).await
    }

    /// Opens (creating if needed) and migrates the database described by `config`.
    pub async fn open_with(config: &StorageConfig) -> Result<Self, ParleyError> {
        let path = config.database_path.clone();
        if let Some(parent) = Path::new(&path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(ParleyError::storage)?;
        }

        // Schema work runs once on a short-lived blocking connection.
        let wal_mode = config.wal_mode;
        let setup_path = path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), ParleyError> {
            let mut conn = rusqlite::Connection::open(&setup_path).map_err(ParleyError::storage)?;
            if wal_mode {
                let mode: String = conn
                    .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                    .map_err(ParleyError::storage)?;
                debug!(journal_mode = %mode, "journal mode set");
            }
            migrations::run_migrations(&mut conn)
        })
        .await
        .map_err(|e| ParleyError::Internal(format!("database setup task failed: {e}")))??;

        let conn = open_connection(&path, config.busy_timeout()).await?;
        let turns = TurnPool::new(path.clone(), config.turn_pool_size, config.busy_timeout());

        info!(path = %path, wal = wal_mode, turn_pool = config.turn_pool_size, "database opened");
        Ok(Self { conn, turns, path })
    }

    /// The shared autocommit connection.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn turn_pool(&self) -> &Arc<TurnPool> {
        &self.turns
    }

    /// Checks out a turn connection and starts a write transaction on it.
    pub async fn begin_turn(&self) -> Result<Turn, ParleyError> {
        let pooled = self.turns.acquire().await?;
        Turn::begin(pooled).await
    }

    /// Checkpoints the WAL and stops handing out turn connections.
    pub async fn close(&self) -> Result<(), ParleyError> {
        self.turns.close();
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}

impl Executor for Database {
    fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_creates_file_and_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/dir/parley.db");
        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        assert!(path.exists());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn wal_mode_is_enabled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.db");
        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        let mode: String = db
            .connection()
            .call(|conn| -> Result<String, rusqlite::Error> {
                conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))
            })
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn reopen_keeps_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.db");
        let path = path.to_str().unwrap();
        Database::open(path).await.unwrap().close().await.unwrap();
        let db = Database::open(path).await.unwrap();
        let turn = db.begin_turn().await.unwrap();
        turn.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn closed_database_refuses_turns() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("c.db").to_str().unwrap())
            .await
            .unwrap();
        db.close().await.unwrap();
        assert!(db.begin_turn().await.is_err());
    }
}
