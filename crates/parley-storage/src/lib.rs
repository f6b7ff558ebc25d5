// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for the Parley engine.
//!
//! Provides the ingestion ledger, the session store, and transactional turns.
//! Autocommit work goes through one shared `tokio-rusqlite` connection; each
//! turn runs a `BEGIN IMMEDIATE` transaction on its own pooled connection.

pub mod database;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
pub mod turn;

pub use database::Database;
pub use models::{FailedEvent, OutcomeKind};
pub use queries::ledger::Registration;
pub use turn::{Executor, Turn};
