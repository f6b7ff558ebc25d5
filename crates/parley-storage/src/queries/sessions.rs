// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session store operations.
//!
//! Creation and locking take a [`Turn`] because they are only meaningful under
//! the turn's write lock. Reads, updates, and closes accept any [`Executor`].
//! Data updates are merged in SQL with `json_patch`, which keeps keys absent
//! from the patch and deletes keys whose patch value is `null`.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parley_core::types::{FlowKind, Identity, Session, SessionData};
use parley_core::ParleyError;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::database::map_tr_err;
use crate::models::{SESSION_COLUMNS, format_timestamp, now_timestamp, session_from_row};
use crate::turn::{Executor, Turn};

/// Close reason recorded by [`close_if_timed_out`].
pub const TIMEOUT_REASON: &str = "timeout";

fn select_by_id(conn: &Connection, id: &str) -> rusqlite::Result<Option<Session>> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
        params![id],
        session_from_row,
    )
    .optional()
}

fn select_open_by_identity(conn: &Connection, identity: &str) -> rusqlite::Result<Option<Session>> {
    conn.query_row(
        &format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE identity = ?1 AND status = 'OPEN'
             ORDER BY updated_at DESC LIMIT 1"
        ),
        params![identity],
        session_from_row,
    )
    .optional()
}

/// The open session of `identity`, if any.
pub async fn get_open_session_by_identity(
    exec: &impl Executor,
    identity: &Identity,
) -> Result<Option<Session>, ParleyError> {
    let identity = identity.as_str().to_string();
    exec.connection()
        .call(move |conn| select_open_by_identity(conn, &identity))
        .await
        .map_err(map_tr_err)
}

/// A session by id, in any state.
pub async fn get_session(exec: &impl Executor, id: &str) -> Result<Option<Session>, ParleyError> {
    let id = id.to_string();
    exec.connection()
        .call(move |conn| select_by_id(conn, &id))
        .await
        .map_err(map_tr_err)
}

/// All open sessions, most recently active first.
pub async fn list_open_sessions(exec: &impl Executor) -> Result<Vec<Session>, ParleyError> {
    exec.connection()
        .call(|conn| -> Result<Vec<Session>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE status = 'OPEN' ORDER BY updated_at DESC"
            ))?;
            let rows = stmt.query_map([], session_from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Starts `flow` for `identity`, leaving exactly one open session.
///
/// An existing open session is reused and re-seeded with the new flow, step,
/// and data; otherwise a new one is inserted.
pub async fn create_session(
    turn: &Turn,
    identity: &Identity,
    flow: FlowKind,
    step: i64,
    data: &SessionData,
) -> Result<Session, ParleyError> {
    let identity = identity.as_str().to_string();
    let flow = flow.to_string();
    let data = serde_json::to_string(&SessionData::new().merged(data))?;
    let now = now_timestamp();

    turn.connection()
        .call(move |conn| -> Result<Session, rusqlite::Error> {
            let id = match select_open_by_identity(conn, &identity)? {
                Some(existing) => {
                    conn.execute(
                        "UPDATE sessions SET flow = ?2, step = ?3, data = ?4, updated_at = ?5
                         WHERE id = ?1",
                        params![existing.id, flow, step, data, now],
                    )?;
                    debug!(session_id = %existing.id, flow = %flow, "re-seeded open session");
                    existing.id
                }
                None => {
                    let id = format!("sess_{}", uuid::Uuid::new_v4().simple());
                    conn.execute(
                        "INSERT INTO sessions
                             (id, identity, flow, step, data, status, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, 'OPEN', ?6, ?6)",
                        params![id, identity, flow, step, data, now],
                    )?;
                    debug!(session_id = %id, flow = %flow, "created session");
                    id
                }
            };
            select_by_id(conn, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
        })
        .await
        .map_err(map_tr_err)
}

/// Re-reads the session under the turn's lock.
///
/// Returns `None` when the session is no longer open, i.e. it was closed by
/// someone else between fetch and lock.
pub async fn lock_session(turn: &Turn, session_id: &str) -> Result<Option<Session>, ParleyError> {
    let id = session_id.to_string();
    turn.connection()
        .call(move |conn| -> Result<Option<Session>, rusqlite::Error> {
            Ok(select_by_id(conn, &id)?.filter(Session::is_open))
        })
        .await
        .map_err(map_tr_err)
}

/// Advances an open session to `step`, merging `data` when given.
///
/// `None` leaves the data untouched. Returns the updated session, or `None`
/// if the session is not open.
pub async fn update_session(
    exec: &impl Executor,
    session_id: &str,
    step: i64,
    data: Option<&SessionData>,
) -> Result<Option<Session>, ParleyError> {
    let id = session_id.to_string();
    let patch = data.map(serde_json::to_string).transpose()?;
    let now = now_timestamp();

    exec.connection()
        .call(move |conn| -> Result<Option<Session>, rusqlite::Error> {
            let changed = conn.execute(
                "UPDATE sessions
                 SET step = ?2,
                     data = CASE WHEN ?3 IS NULL THEN data ELSE json_patch(data, ?3) END,
                     updated_at = ?4
                 WHERE id = ?1 AND status = 'OPEN'",
                params![id, step, patch, now],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            select_by_id(conn, &id)
        })
        .await
        .map_err(map_tr_err)
}

/// Closes an open session. The reason is stored in `close_reason` and merged
/// into the data under the same key. Returns false if it was not open.
pub async fn close_session(
    exec: &impl Executor,
    session_id: &str,
    reason: Option<&str>,
) -> Result<bool, ParleyError> {
    close_where(exec, session_id, reason, None).await
}

/// Closes `session` with reason [`TIMEOUT_REASON`] if it has been idle for at
/// least `timeout` as of `now`. Returns true if it was closed.
///
/// The close only applies if the stored row is still idle, so a session
/// touched concurrently is left open.
pub async fn close_if_timed_out(
    exec: &impl Executor,
    session: &Session,
    timeout: Duration,
    now: DateTime<Utc>,
) -> Result<bool, ParleyError> {
    if !session.is_open() || !session.is_idle_at(now, timeout) {
        return Ok(false);
    }
    let cutoff = now - TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
    let closed = close_where(exec, &session.id, Some(TIMEOUT_REASON), Some(cutoff)).await?;
    if closed {
        debug!(session_id = %session.id, "closed idle session");
    }
    Ok(closed)
}

async fn close_where(
    exec: &impl Executor,
    session_id: &str,
    reason: Option<&str>,
    idle_since: Option<DateTime<Utc>>,
) -> Result<bool, ParleyError> {
    let id = session_id.to_string();
    let reason = reason.map(str::to_string);
    let cutoff = idle_since.map(format_timestamp);
    let now = now_timestamp();

    exec.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let changed = conn.execute(
                "UPDATE sessions
                 SET status = 'CLOSED',
                     closed_at = ?2,
                     updated_at = ?2,
                     close_reason = ?3,
                     data = CASE WHEN ?3 IS NULL THEN data
                                 ELSE json_set(data, '$.close_reason', ?3) END
                 WHERE id = ?1 AND status = 'OPEN'
                   AND (?4 IS NULL OR updated_at <= ?4)",
                params![id, now, reason, cutoff],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}
