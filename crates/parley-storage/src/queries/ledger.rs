// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ingestion ledger and outcome journal.
//!
//! `register_inbound` is the dedupe gate: a single `INSERT ... ON CONFLICT DO
//! NOTHING` decides which delivery of an event wins, so concurrent
//! redeliveries cannot both pass.

use parley_core::types::{InboundEvent, InboundMessage};
use parley_core::{DedupeKey, ParleyError};
use rusqlite::{OptionalExtension, params};

use crate::database::map_tr_err;
use crate::models::{
    EVENT_COLUMNS, FailedEvent, OutcomeKind, event_from_row, now_timestamp, parse_timestamp,
};
use crate::turn::Executor;

/// Result of a registration attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    /// False when the dedupe key was already present; the caller must stop.
    pub inserted: bool,
    /// The ledger row for the key (the pre-existing one on a duplicate).
    pub record: InboundEvent,
}

/// Records an inbound event unless its dedupe key was seen before.
pub async fn register_inbound(
    exec: &impl Executor,
    message: &InboundMessage,
) -> Result<Registration, ParleyError> {
    let key = message.dedupe_key.as_str().to_string();
    let identity = message.identity.as_str().to_string();
    let body = message.text.clone();
    let media = serde_json::to_string(&message.media)?;
    let raw = serde_json::to_string(&message.raw)?;
    let received_at = now_timestamp();

    exec.connection()
        .call(move |conn| -> Result<Registration, rusqlite::Error> {
            let inserted = conn.execute(
                "INSERT INTO inbound_events (dedupe_key, identity, body, media, raw, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(dedupe_key) DO NOTHING",
                params![key, identity, body, media, raw, received_at],
            )? == 1;

            let record = conn.query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM inbound_events WHERE dedupe_key = ?1"),
                params![key],
                event_from_row,
            )?;
            Ok(Registration { inserted, record })
        })
        .await
        .map_err(map_tr_err)
}

/// Looks up a ledger row by dedupe key.
pub async fn get_inbound_by_key(
    exec: &impl Executor,
    key: &DedupeKey,
) -> Result<Option<InboundEvent>, ParleyError> {
    let key = key.as_str().to_string();
    exec.connection()
        .call(move |conn| -> Result<Option<InboundEvent>, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM inbound_events WHERE dedupe_key = ?1"),
                params![key],
                event_from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Number of ledger rows.
pub async fn count_inbound(exec: &impl Executor) -> Result<i64, ParleyError> {
    exec.connection()
        .call(|conn| -> Result<i64, rusqlite::Error> {
            conn.query_row("SELECT COUNT(*) FROM inbound_events", [], |row| row.get(0))
        })
        .await
        .map_err(map_tr_err)
}

/// Appends an outcome for a ledger row. Earlier outcomes are kept.
pub async fn record_outcome(
    exec: &impl Executor,
    event_id: i64,
    outcome: OutcomeKind,
    session_id: Option<&str>,
    error: Option<&ParleyError>,
) -> Result<(), ParleyError> {
    let outcome = outcome.to_string();
    let session_id = session_id.map(str::to_string);
    let error_kind = error.map(|e| e.kind().to_string());
    let error = error.map(|e| e.to_string());
    let recorded_at = now_timestamp();

    exec.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO inbound_outcomes
                     (event_id, outcome, session_id, error_kind, error, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![event_id, outcome, session_id, error_kind, error, recorded_at],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Most recent outcome recorded for a ledger row.
pub async fn latest_outcome(
    exec: &impl Executor,
    event_id: i64,
) -> Result<Option<OutcomeKind>, ParleyError> {
    let raw = exec
        .connection()
        .call(move |conn| -> Result<Option<String>, rusqlite::Error> {
            conn.query_row(
                "SELECT outcome FROM inbound_outcomes WHERE event_id = ?1
                 ORDER BY id DESC LIMIT 1",
                params![event_id],
                |row| row.get(0),
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)?;

    raw.map(|s| s.parse::<OutcomeKind>().map_err(ParleyError::storage))
        .transpose()
}

/// Ledger rows whose latest outcome is a failure, newest first.
pub async fn list_failed_events(
    exec: &impl Executor,
    limit: usize,
) -> Result<Vec<FailedEvent>, ParleyError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = exec
        .connection()
        .call(
            move |conn| -> Result<Vec<(InboundEvent, Option<String>, Option<String>, String)>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT e.id, e.dedupe_key, e.identity, e.body, e.media, e.raw, e.received_at,
                            o.error_kind, o.error, o.recorded_at
                     FROM inbound_events e
                     JOIN inbound_outcomes o ON o.event_id = e.id
                     WHERE o.id = (SELECT MAX(id) FROM inbound_outcomes WHERE event_id = e.id)
                       AND o.outcome = 'FAILED'
                     ORDER BY o.id DESC
                     LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit], |row| {
                    Ok((event_from_row(row)?, row.get(7)?, row.get(8)?, row.get(9)?))
                })?;
                rows.collect()
            },
        )
        .await
        .map_err(map_tr_err)?;

    rows.into_iter()
        .map(|(event, error_kind, error, recorded_at)| {
            Ok(FailedEvent {
                event,
                error_kind,
                error,
                recorded_at: parse_timestamp(&recorded_at)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use parley_core::types::{Identity, MediaCategory, MediaRef};
    use serde_json::json;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("ledger.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    fn message(key: &str, text: &str) -> InboundMessage {
        InboundMessage::new(
            DedupeKey::from_provider_id(key),
            Identity::new("+5215512345678"),
            text,
        )
        .with_raw(json!({"event": "messages.received"}))
    }

    #[tokio::test]
    async fn first_registration_inserts() {
        let (db, _dir) = setup_db().await;
        let reg = register_inbound(&db, &message("abc123", "hola")).await.unwrap();
        assert!(reg.inserted);
        assert_eq!(reg.record.dedupe_key.as_str(), "pmid:abc123");
        assert_eq!(reg.record.body, "hola");
        assert_eq!(reg.record.raw["event"], "messages.received");
    }

    #[tokio::test]
    async fn redelivery_is_rejected_and_returns_original_row() {
        let (db, _dir) = setup_db().await;
        let first = register_inbound(&db, &message("abc123", "hola")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let second = register_inbound(&db, &message("abc123", "hola otra vez"))
            .await
            .unwrap();

        assert!(!second.inserted);
        assert_eq!(second.record.id, first.record.id);
        assert_eq!(second.record.body, "hola");
        assert_eq!(count_inbound(&db).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_insert_exactly_once() {
        let (db, _dir) = setup_db().await;
        let mut handles = Vec::new();
        for _ in 0..16 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                register_inbound(&db, &message("same-key", "hola"))
                    .await
                    .unwrap()
                    .inserted
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(count_inbound(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn media_refs_are_stored() {
        let (db, _dir) = setup_db().await;
        let msg = message("with-media", "").with_media(MediaRef {
            url: "https://mmg.example/a.enc".into(),
            crypto_key: Some("a2V5".into()),
            mimetype: Some("image/jpeg".into()),
            file_name: None,
            category: MediaCategory::Image,
        });
        register_inbound(&db, &msg).await.unwrap();

        let stored = get_inbound_by_key(&db, &msg.dedupe_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.media, msg.media);
    }

    #[tokio::test]
    async fn failed_view_tracks_latest_outcome() {
        let (db, _dir) = setup_db().await;
        let a = register_inbound(&db, &message("a", "x")).await.unwrap().record;
        let b = register_inbound(&db, &message("b", "y")).await.unwrap().record;

        let err = ParleyError::Flow("handler exploded".into()).into_transaction();
        record_outcome(&db, a.id, OutcomeKind::Failed, None, Some(&err))
            .await
            .unwrap();
        record_outcome(&db, b.id, OutcomeKind::Failed, None, Some(&err))
            .await
            .unwrap();
        record_outcome(&db, b.id, OutcomeKind::Processed, Some("sess_1"), None)
            .await
            .unwrap();

        let failed = list_failed_events(&db, 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].event.id, a.id);
        assert_eq!(failed[0].error_kind.as_deref(), Some("TRANSACTION_FAILURE"));
        assert!(failed[0].error.as_deref().unwrap().contains("handler exploded"));

        assert_eq!(
            latest_outcome(&db, b.id).await.unwrap(),
            Some(OutcomeKind::Processed)
        );
        assert_eq!(latest_outcome(&db, 9999).await.unwrap(), None);
    }
}
