// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row mapping between SQLite and the core domain types.
//!
//! Timestamps are stored as fixed-width UTC text (`2026-01-01T00:00:00.000Z`)
//! so that lexical order equals chronological order.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use parley_core::types::{FlowKind, Identity, InboundEvent, Session, SessionData, SessionStatus};
use parley_core::{DedupeKey, ParleyError};
use rusqlite::Row;
use rusqlite::types::Type;

/// Column list matching [`session_from_row`].
pub(crate) const SESSION_COLUMNS: &str =
    "id, identity, flow, step, data, status, created_at, updated_at, closed_at, close_reason";

/// Column list matching [`event_from_row`].
pub(crate) const EVENT_COLUMNS: &str = "id, dedupe_key, identity, body, media, raw, received_at";

/// What happened to a ledger row once it was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    /// The handler ran and its writes were committed.
    Processed,
    /// Nothing to do (no session and no flow selected, or an intercepted reply).
    Ignored,
    /// The session closed between fetch and lock; a fallback prompt was sent.
    LockLost,
    /// The turn rolled back.
    Failed,
}

/// A ledger row whose most recent outcome is [`OutcomeKind::Failed`].
#[derive(Debug, Clone, PartialEq)]
pub struct FailedEvent {
    pub event: InboundEvent,
    pub error_kind: Option<String>,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Formats a timestamp for storage.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parses a stored timestamp.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ParleyError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(ParleyError::storage)
}

/// Current time truncated to storage precision.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

fn conversion_err<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn timestamp_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn json_col<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_err(idx, e))
}

pub(crate) fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let flow: String = row.get(2)?;
    let status: String = row.get(5)?;
    let closed_at = match row.get::<_, Option<String>>(8)? {
        Some(_) => Some(timestamp_col(row, 8)?),
        None => None,
    };

    Ok(Session {
        id: row.get(0)?,
        identity: Identity::new(row.get::<_, String>(1)?),
        flow: FlowKind::from_str(&flow).map_err(|e| conversion_err(2, e))?,
        step: row.get(3)?,
        data: json_col::<SessionData>(row, 4)?,
        status: SessionStatus::from_str(&status).map_err(|e| conversion_err(5, e))?,
        created_at: timestamp_col(row, 6)?,
        updated_at: timestamp_col(row, 7)?,
        closed_at,
        close_reason: row.get(9)?,
    })
}

pub(crate) fn event_from_row(row: &Row<'_>) -> rusqlite::Result<InboundEvent> {
    Ok(InboundEvent {
        id: row.get(0)?,
        dedupe_key: DedupeKey::new(row.get::<_, String>(1)?),
        identity: Identity::new(row.get::<_, String>(2)?),
        body: row.get(3)?,
        media: json_col(row, 4)?,
        raw: json_col(row, 5)?,
        received_at: timestamp_col(row, 6)?,
    })
}
