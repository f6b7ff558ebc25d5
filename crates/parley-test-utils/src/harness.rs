// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles a complete dispatcher with a temp SQLite database,
//! a running egress worker backed by [`MockSender`], and an optional media
//! pipeline backed by [`MemoryObjectStore`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parley_core::{DedupeKey, Identity, InboundMessage, ParleyError, Session};
use parley_dispatch::{Dispatcher, FlowHandler, FlowRegistry, FlowSelector, TurnReport};
use parley_egress::{EgressPolicy, EgressQueue};
use parley_media::{HttpFetcher, MediaPipeline};
use parley_storage::database::map_tr_err;
use parley_storage::models::format_timestamp;
use parley_storage::queries::{ledger, sessions};
use parley_storage::{Database, OutcomeKind};
use rusqlite::params;
use tokio_util::sync::CancellationToken;

use crate::memory_store::MemoryObjectStore;
use crate::mock_sender::{MockSender, SentMessage};
use crate::scripted_flow::KeywordSelector;

/// Fallback prompt used when no selector is configured.
pub const DEFAULT_FALLBACK: &str = "Escribe MENU para ver las opciones.";

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    flows: Vec<Arc<dyn FlowHandler>>,
    selector: Option<Arc<dyn FlowSelector>>,
    idle_timeout: Option<Duration>,
    policy: EgressPolicy,
    with_media: bool,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            flows: Vec::new(),
            selector: None,
            idle_timeout: None,
            policy: EgressPolicy {
                min_interval: Duration::ZERO,
                max_retries: 3,
                default_retry_after: Duration::from_millis(10),
                retry_grace: Duration::ZERO,
                max_retry_after: Duration::from_secs(1),
            },
            with_media: false,
        }
    }

    pub fn with_flow(mut self, flow: Arc<dyn FlowHandler>) -> Self {
        self.flows.push(flow);
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn FlowSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Egress pacing. The default has no minimum interval.
    pub fn with_egress_policy(mut self, policy: EgressPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Attach a media pipeline that uploads to the harness store.
    pub fn with_media(mut self) -> Self {
        self.with_media = true;
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub async fn build(self) -> Result<TestHarness, ParleyError> {
        let temp_dir = tempfile::TempDir::new().map_err(ParleyError::storage)?;
        let db_path = temp_dir.path().join("parley.db");
        let db = Database::open(&db_path.to_string_lossy()).await?;

        let sender = Arc::new(MockSender::new());
        let cancel = CancellationToken::new();
        let (egress, _worker) = EgressQueue::spawn(sender.clone(), self.policy, 64, cancel.clone());

        let mut registry = FlowRegistry::new();
        for flow in self.flows {
            registry.register(flow);
        }
        let selector = self
            .selector
            .unwrap_or_else(|| Arc::new(KeywordSelector::new(DEFAULT_FALLBACK)));

        let store = MemoryObjectStore::new();
        let mut dispatcher = Dispatcher::new(db.clone(), egress, registry, selector);
        if let Some(timeout) = self.idle_timeout {
            dispatcher = dispatcher.with_idle_timeout(timeout);
        }
        if self.with_media {
            let fetcher = HttpFetcher::new(Duration::from_secs(5), 1024 * 1024)?;
            dispatcher = dispatcher.with_media(MediaPipeline::new(
                fetcher,
                Arc::new(store.clone()),
                "test",
            ));
        }

        Ok(TestHarness {
            db,
            dispatcher,
            sender,
            store,
            cancel,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete test environment with a mock provider and temp storage.
pub struct TestHarness {
    /// Database in a temp directory, removed on drop.
    pub db: Database,
    pub dispatcher: Dispatcher,
    /// The provider behind the egress worker.
    pub sender: Arc<MockSender>,
    /// Upload target of the media pipeline.
    pub store: MemoryObjectStore,
    cancel: CancellationToken,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// An inbound text message with a provider id.
    pub fn inbound(identity: &str, provider_id: &str, text: &str) -> InboundMessage {
        InboundMessage::new(
            DedupeKey::from_provider_id(provider_id),
            Identity::new(identity),
            text,
        )
    }

    pub async fn dispatch(&self, message: &InboundMessage) -> Result<TurnReport, ParleyError> {
        self.dispatcher.dispatch(message).await
    }

    /// Dispatches and waits for the turn's replies.
    pub async fn dispatch_and_wait(
        &self,
        message: &InboundMessage,
    ) -> Result<parley_dispatch::TurnOutcome, ParleyError> {
        let report = self.dispatch(message).await?;
        let outcome = report.outcome.clone();
        for result in report.wait_deliveries().await {
            result?;
        }
        Ok(outcome)
    }

    pub async fn open_session(&self, identity: &str) -> Result<Option<Session>, ParleyError> {
        sessions::get_open_session_by_identity(&self.db, &Identity::new(identity)).await
    }

    /// Moves a session's last activity `by` into the past.
    pub async fn backdate_session(&self, session_id: &str, by: Duration) -> Result<(), ParleyError> {
        let delta = chrono::TimeDelta::from_std(by)
            .map_err(|e| ParleyError::Internal(format!("backdate out of range: {e}")))?;
        let updated_at = format_timestamp(Utc::now() - delta);
        let id = session_id.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "UPDATE sessions SET updated_at = ?2 WHERE id = ?1",
                    params![id, updated_at],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    pub async fn latest_outcome(&self, event_id: i64) -> Result<Option<OutcomeKind>, ParleyError> {
        ledger::latest_outcome(&self.db, event_id).await
    }

    pub async fn inbound_count(&self) -> Result<i64, ParleyError> {
        ledger::count_inbound(&self.db).await
    }

    /// Waits (up to five seconds) until `count` replies were delivered.
    pub async fn wait_for_replies(&self, count: usize) -> Vec<SentMessage> {
        self.sender
            .wait_for_delivered(count, Duration::from_secs(5))
            .await
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builder_creates_working_environment() {
        let harness = TestHarness::builder().build().await.unwrap();
        assert_eq!(harness.inbound_count().await.unwrap(), 0);
        assert!(harness.open_session("+5215512345678").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn temp_db_is_unique_per_harness() {
        let h1 = TestHarness::builder().build().await.unwrap();
        let h2 = TestHarness::builder().build().await.unwrap();

        h1.dispatch(&TestHarness::inbound("+5215512345678", "only-h1", "hola"))
            .await
            .unwrap();
        assert_eq!(h1.inbound_count().await.unwrap(), 1);
        assert_eq!(h2.inbound_count().await.unwrap(), 0);
    }
}
