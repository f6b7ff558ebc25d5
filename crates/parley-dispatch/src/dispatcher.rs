// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The transactional envelope around one inbound message.
//!
//! A turn is:
//!
//! 1. register the message in the ingestion ledger (autocommit); stop on a
//!    duplicate,
//! 2. `BEGIN IMMEDIATE` on a pooled connection,
//! 3. close the identity's open session if it has been idle too long,
//! 4. ask the selector what the message means, creating or re-seeding the
//!    session when a flow starts,
//! 5. lock the session and run its flow handler,
//! 6. commit, or roll back on any error,
//! 7. journal the outcome against the ledger row.
//!
//! Replies are queued on the egress worker as the handler produces them and
//! are delivered whether or not the turn commits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use parley_config::ParleyConfig;
use parley_core::{Identity, InboundEvent, InboundMessage, ParleyError};
use parley_egress::{Delivery, EgressQueue, PendingDelivery};
use parley_media::MediaPipeline;
use parley_storage::queries::{ledger, sessions};
use parley_storage::{Database, OutcomeKind, Turn};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::context::TurnContext;
use crate::payload;
use crate::registry::{FLOW_SWITCH_REASON, FlowRegistry, FlowSelection, FlowSelector};

/// Default idle time after which an open session is closed on next touch.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The dedupe key was already in the ledger; nothing else happened.
    Duplicate { event_id: i64 },
    /// The selector chose to ignore the message.
    Ignored { event_id: i64 },
    /// The selector answered without running a flow.
    Replied { event_id: i64 },
    /// The session stopped being open before it could be locked; the
    /// fallback prompt was sent instead.
    LockLost { event_id: i64, session_id: String },
    /// A flow handler ran and the turn committed.
    Processed {
        event_id: i64,
        session_id: String,
        session_open: bool,
    },
}

impl TurnOutcome {
    pub fn event_id(&self) -> i64 {
        match self {
            Self::Duplicate { event_id }
            | Self::Ignored { event_id }
            | Self::Replied { event_id }
            | Self::LockLost { event_id, .. }
            | Self::Processed { event_id, .. } => *event_id,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::LockLost { session_id, .. } | Self::Processed { session_id, .. } => {
                Some(session_id)
            }
            _ => None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Duplicate { .. } => "duplicate",
            Self::Ignored { .. } => "ignored",
            Self::Replied { .. } => "replied",
            Self::LockLost { .. } => "lock_lost",
            Self::Processed { .. } => "processed",
        }
    }

    fn journal_kind(&self) -> Option<OutcomeKind> {
        match self {
            Self::Duplicate { .. } => None,
            Self::Ignored { .. } => Some(OutcomeKind::Ignored),
            Self::LockLost { .. } => Some(OutcomeKind::LockLost),
            Self::Replied { .. } | Self::Processed { .. } => Some(OutcomeKind::Processed),
        }
    }
}

/// A finished turn and the replies it queued.
#[derive(Debug)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    pub deliveries: Vec<PendingDelivery>,
}

impl TurnReport {
    fn new(outcome: TurnOutcome) -> Self {
        Self {
            outcome,
            deliveries: Vec::new(),
        }
    }

    /// Waits for every queued reply of this turn, in queue order.
    pub async fn wait_deliveries(self) -> Vec<Result<Delivery, ParleyError>> {
        let mut results = Vec::with_capacity(self.deliveries.len());
        for pending in self.deliveries {
            results.push(pending.wait().await);
        }
        results
    }
}

/// Runs inbound messages through the ledger, the session store, and the
/// registered flows.
#[derive(Clone)]
pub struct Dispatcher {
    db: Database,
    egress: EgressQueue,
    registry: Arc<FlowRegistry>,
    selector: Arc<dyn FlowSelector>,
    media: Option<MediaPipeline>,
    idle_timeout: Duration,
    default_country_code: Option<String>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("db", &self.db)
            .field("registry", &self.registry)
            .field("media", &self.media.is_some())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        db: Database,
        egress: EgressQueue,
        registry: FlowRegistry,
        selector: Arc<dyn FlowSelector>,
    ) -> Self {
        Self {
            db,
            egress,
            registry: Arc::new(registry),
            selector,
            media: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            default_country_code: None,
        }
    }

    pub fn with_media(mut self, media: MediaPipeline) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_default_country_code(mut self, code: Option<String>) -> Self {
        self.default_country_code = code;
        self
    }

    /// Applies the `[session]` and `[adapter]` settings.
    pub fn configured(self, config: &ParleyConfig) -> Self {
        self.with_idle_timeout(config.session.idle_timeout())
            .with_default_country_code(config.adapter.default_country_code.clone())
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn egress(&self) -> &EgressQueue {
        &self.egress
    }

    /// Runs one turn for `message`.
    ///
    /// Errors raised inside the turn come back as
    /// [`ParleyError::Transaction`] after a full rollback; the ledger row
    /// stays and the failure is journaled against it.
    pub async fn dispatch(&self, message: &InboundMessage) -> Result<TurnReport, ParleyError> {
        let started = Instant::now();
        let registration = ledger::register_inbound(&self.db, message).await?;
        let event = registration.record;

        if !registration.inserted {
            counter!("parley_inbound_total", "result" => "duplicate").increment(1);
            debug!(dedupe_key = %message.dedupe_key, event_id = event.id, "duplicate delivery dropped");
            return Ok(TurnReport::new(TurnOutcome::Duplicate { event_id: event.id }));
        }
        counter!("parley_inbound_total", "result" => "accepted").increment(1);

        let result = self.run_turn(message, &event).await;
        histogram!("parley_turn_duration_seconds").record(started.elapsed().as_secs_f64());

        match result {
            Ok(report) => {
                counter!("parley_turns_total", "outcome" => report.outcome.label()).increment(1);
                if let Some(kind) = report.outcome.journal_kind() {
                    self.journal(event.id, kind, report.outcome.session_id(), None)
                        .await;
                }
                Ok(report)
            }
            Err(e) => {
                counter!("parley_turns_total", "outcome" => "failed").increment(1);
                self.journal(event.id, OutcomeKind::Failed, None, Some(&e))
                    .await;
                Err(e)
            }
        }
    }

    /// Webhook entry point: dispatches `message` and never fails.
    ///
    /// Errors are logged and journaled; the provider should be acknowledged
    /// regardless so it stops redelivering. Messages with neither text nor
    /// media get the fallback prompt without touching the ledger. Delivery
    /// failures of queued replies are logged in the background.
    pub async fn ingest(&self, message: InboundMessage) -> Option<TurnOutcome> {
        if message.is_empty() {
            let prompt = self.selector.fallback_prompt(&message);
            match self.egress.enqueue(&message.identity, &prompt).await {
                Ok(pending) => watch_deliveries(message.identity.clone(), vec![pending]),
                Err(e) => warn!(identity = %message.identity, error = %e, "fallback prompt not queued"),
            }
            return None;
        }

        match self.dispatch(&message).await {
            Ok(report) => {
                watch_deliveries(message.identity.clone(), report.deliveries);
                Some(report.outcome)
            }
            Err(e) => {
                error!(
                    identity = %message.identity,
                    dedupe_key = %message.dedupe_key,
                    error = %e,
                    kind = %e.kind(),
                    "turn failed"
                );
                None
            }
        }
    }

    /// Normalizes a raw provider webhook body and ingests every message in it.
    ///
    /// Returns the outcomes of the messages that were dispatched.
    pub async fn ingest_payload(&self, body: &Value) -> Vec<TurnOutcome> {
        let messages = match payload::normalize(body, self.default_country_code.as_deref()) {
            Ok(messages) => messages,
            Err(reason) => {
                debug!(reason = %reason, "webhook payload skipped");
                return Vec::new();
            }
        };

        let mut outcomes = Vec::with_capacity(messages.len());
        for message in messages {
            if let Some(outcome) = self.ingest(message).await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    async fn journal(
        &self,
        event_id: i64,
        kind: OutcomeKind,
        session_id: Option<&str>,
        error: Option<&ParleyError>,
    ) {
        if let Err(e) = ledger::record_outcome(&self.db, event_id, kind, session_id, error).await {
            warn!(event_id, outcome = %kind, error = %e, "failed to journal turn outcome");
        }
    }

    async fn run_turn(
        &self,
        message: &InboundMessage,
        event: &InboundEvent,
    ) -> Result<TurnReport, ParleyError> {
        let turn = self
            .db
            .begin_turn()
            .await
            .map_err(ParleyError::into_transaction)?;

        let mut deliveries = Vec::new();
        match self.run_in_turn(&turn, message, event, &mut deliveries).await {
            Ok(outcome) => {
                turn.commit().await.map_err(ParleyError::into_transaction)?;
                Ok(TurnReport {
                    outcome,
                    deliveries,
                })
            }
            Err(e) => {
                if let Err(rollback) = turn.rollback().await {
                    warn!(error = %rollback, "rollback failed; connection discarded");
                }
                Err(e.into_transaction())
            }
        }
    }

    async fn run_in_turn(
        &self,
        turn: &Turn,
        message: &InboundMessage,
        event: &InboundEvent,
        deliveries: &mut Vec<PendingDelivery>,
    ) -> Result<TurnOutcome, ParleyError> {
        let identity = &message.identity;
        let event_id = event.id;

        let mut open = sessions::get_open_session_by_identity(turn, identity).await?;
        if let Some(session) = open.take() {
            if sessions::close_if_timed_out(turn, &session, self.idle_timeout, Utc::now()).await? {
                info!(session_id = %session.id, identity = %identity, "idle session closed");
            } else {
                open = Some(session);
            }
        }

        let selection = self.selector.select(message, open.as_ref()).await?;
        debug!(event_id, selection = ?selection, "flow selected");

        let (session, new_session) = match selection {
            FlowSelection::Ignore => return Ok(TurnOutcome::Ignored { event_id }),
            FlowSelection::Reply(text) => {
                self.reply(identity, &text, deliveries).await?;
                return Ok(TurnOutcome::Replied { event_id });
            }
            FlowSelection::Continue => match open {
                Some(session) => (session, false),
                None => {
                    let prompt = self.selector.fallback_prompt(message);
                    self.reply(identity, &prompt, deliveries).await?;
                    return Ok(TurnOutcome::Replied { event_id });
                }
            },
            FlowSelection::Start { flow, step, data } => {
                let session = sessions::create_session(turn, identity, flow, step, &data).await?;
                (session, true)
            }
            FlowSelection::Restart { flow, step, data } => {
                if let Some(previous) = &open {
                    sessions::close_session(turn, &previous.id, Some(FLOW_SWITCH_REASON)).await?;
                    info!(session_id = %previous.id, next = %flow, "open session replaced");
                }
                let session = sessions::create_session(turn, identity, flow, step, &data).await?;
                (session, true)
            }
        };

        let Some(locked) = sessions::lock_session(turn, &session.id).await? else {
            warn!(session_id = %session.id, identity = %identity, "session lock lost");
            let prompt = self.selector.fallback_prompt(message);
            self.reply(identity, &prompt, deliveries).await?;
            return Ok(TurnOutcome::LockLost {
                event_id,
                session_id: session.id,
            });
        };

        let handler = self.registry.get(locked.flow).ok_or_else(|| {
            ParleyError::Flow(format!("no handler registered for flow {}", locked.flow))
        })?;

        let mut ctx = TurnContext::new(
            turn,
            locked,
            message,
            event,
            &self.egress,
            self.media.as_ref(),
            new_session,
        );
        let result = handler.handle(&mut ctx).await;
        let (session, mut queued) = ctx.into_parts();
        // Replies already queued go out even when the handler failed.
        deliveries.append(&mut queued);
        result?;

        debug!(
            session_id = %session.id,
            flow = %session.flow,
            step = session.step,
            open = session.is_open(),
            "flow step handled"
        );
        Ok(TurnOutcome::Processed {
            event_id,
            session_open: session.is_open(),
            session_id: session.id,
        })
    }

    async fn reply(
        &self,
        to: &Identity,
        text: &str,
        deliveries: &mut Vec<PendingDelivery>,
    ) -> Result<(), ParleyError> {
        deliveries.push(self.egress.enqueue(to, text).await?);
        Ok(())
    }
}

/// Logs failed deliveries of `pending` once the egress worker reports them.
fn watch_deliveries(to: Identity, pending: Vec<PendingDelivery>) {
    if pending.is_empty() {
        return;
    }
    tokio::spawn(async move {
        for delivery in pending {
            if let Err(e) = delivery.wait().await {
                warn!(to = %to, error = %e, kind = %e.kind(), "reply not delivered");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parley_core::{DedupeKey, FlowKind, Session, SessionData};
    use parley_egress::EgressPolicy;
    use parley_test_utils::MockSender;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::registry::FlowHandler;

    const FALLBACK: &str = "Escribe MENU";
    const ANA: &str = "+5215512345678";

    struct PaymentSelector;

    #[async_trait]
    impl FlowSelector for PaymentSelector {
        async fn select(
            &self,
            message: &InboundMessage,
            open: Option<&Session>,
        ) -> Result<FlowSelection, ParleyError> {
            Ok(match (message.text.as_str(), open) {
                ("ignorar", _) => FlowSelection::Ignore,
                ("menu", _) => FlowSelection::Reply("1) Pagos 2) Fallas".into()),
                ("fallas", _) => FlowSelection::start(FlowKind::Fault),
                (_, Some(_)) => FlowSelection::Continue,
                (_, None) => FlowSelection::start(FlowKind::Payment),
            })
        }

        fn fallback_prompt(&self, _message: &InboundMessage) -> String {
            FALLBACK.to_string()
        }
    }

    #[derive(Default)]
    struct StepFlow {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl FlowHandler for StepFlow {
        fn kind(&self) -> FlowKind {
            FlowKind::Payment
        }

        async fn handle(&self, ctx: &mut TurnContext<'_>) -> Result<(), ParleyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = ctx.session().step;
            ctx.send(&format!("paso {step}")).await?;
            let data = SessionData::new().with("last", ctx.inbound().text.as_str());
            ctx.update_session(step + 1, Some(&data)).await?;
            if self.fail {
                return Err(ParleyError::Flow("boom".into()));
            }
            Ok(())
        }
    }

    struct Setup {
        dispatcher: Dispatcher,
        sender: Arc<MockSender>,
        cancel: CancellationToken,
        _dir: tempfile::TempDir,
    }

    impl Drop for Setup {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    async fn setup(flow: Arc<StepFlow>) -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("t.db").to_string_lossy())
            .await
            .unwrap();
        let sender = Arc::new(MockSender::new());
        let cancel = CancellationToken::new();
        let policy = EgressPolicy {
            min_interval: Duration::ZERO,
            ..EgressPolicy::default()
        };
        let (egress, _worker) = EgressQueue::spawn(sender.clone(), policy, 16, cancel.clone());
        let registry = FlowRegistry::new().with(flow);
        Setup {
            dispatcher: Dispatcher::new(db, egress, registry, Arc::new(PaymentSelector)),
            sender,
            cancel,
            _dir: dir,
        }
    }

    fn inbound(id: &str, text: &str) -> InboundMessage {
        InboundMessage::new(DedupeKey::from_provider_id(id), Identity::new(ANA), text)
    }

    #[tokio::test]
    async fn first_message_starts_a_flow_and_commits() {
        let flow = Arc::new(StepFlow::default());
        let s = setup(flow.clone()).await;

        let report = s.dispatcher.dispatch(&inbound("m1", "hola")).await.unwrap();
        let TurnOutcome::Processed {
            session_open,
            ref session_id,
            ..
        } = report.outcome
        else {
            panic!("expected processed, got {:?}", report.outcome);
        };
        assert!(session_open);

        let session = sessions::get_session(s.dispatcher.database(), session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.flow, FlowKind::Payment);
        assert_eq!(session.step, 2);
        assert_eq!(session.data.get_str("last"), Some("hola"));

        let results = report.wait_deliveries().await;
        assert!(matches!(results[..], [Ok(Delivery::Sent { attempts: 1 })]));
        assert_eq!(s.sender.texts_to(&Identity::new(ANA)).await, vec!["paso 1"]);
    }

    #[tokio::test]
    async fn duplicate_delivery_runs_once() {
        let flow = Arc::new(StepFlow::default());
        let s = setup(flow.clone()).await;

        let first = s.dispatcher.dispatch(&inbound("dup", "hola")).await.unwrap();
        let second = s.dispatcher.dispatch(&inbound("dup", "hola")).await.unwrap();

        assert!(second.outcome.is_duplicate());
        assert_eq!(second.outcome.event_id(), first.outcome.event_id());
        assert!(second.deliveries.is_empty());
        assert_eq!(flow.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ledger::count_inbound(s.dispatcher.database()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn handler_error_rolls_back_and_journals_failure() {
        let flow = Arc::new(StepFlow {
            fail: true,
            ..StepFlow::default()
        });
        let s = setup(flow).await;
        let db = s.dispatcher.database().clone();

        let err = s.dispatcher.dispatch(&inbound("f1", "hola")).await.unwrap_err();
        assert!(matches!(err, ParleyError::Transaction { .. }));

        // The session created in the turn is gone, the ledger row is not.
        let open = sessions::get_open_session_by_identity(&db, &Identity::new(ANA))
            .await
            .unwrap();
        assert!(open.is_none());
        let event = ledger::get_inbound_by_key(&db, &DedupeKey::from_provider_id("f1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            ledger::latest_outcome(&db, event.id).await.unwrap(),
            Some(OutcomeKind::Failed)
        );

        let failed = ledger::list_failed_events(&db, 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error_kind.as_deref(), Some("TRANSACTION_FAILURE"));
    }

    #[tokio::test]
    async fn reply_and_ignore_leave_sessions_alone() {
        let s = setup(Arc::new(StepFlow::default())).await;
        let db = s.dispatcher.database().clone();

        let menu = s.dispatcher.dispatch(&inbound("r1", "menu")).await.unwrap();
        assert!(matches!(menu.outcome, TurnOutcome::Replied { .. }));
        menu.wait_deliveries().await;

        let ignored = s.dispatcher.dispatch(&inbound("r2", "ignorar")).await.unwrap();
        assert!(matches!(ignored.outcome, TurnOutcome::Ignored { .. }));
        assert_eq!(
            ledger::latest_outcome(&db, ignored.outcome.event_id())
                .await
                .unwrap(),
            Some(OutcomeKind::Ignored)
        );

        assert!(sessions::list_open_sessions(&db).await.unwrap().is_empty());
        assert_eq!(
            s.sender.texts_to(&Identity::new(ANA)).await,
            vec!["1) Pagos 2) Fallas"]
        );
    }

    #[tokio::test]
    async fn missing_handler_fails_the_turn() {
        let s = setup(Arc::new(StepFlow::default())).await;

        let err = s
            .dispatcher
            .dispatch(&inbound("x1", "fallas"))
            .await
            .unwrap_err();
        match err {
            ParleyError::Transaction { source } => assert!(matches!(*source, ParleyError::Flow(_))),
            other => panic!("expected transaction failure, got {other:?}"),
        }
        let open = sessions::get_open_session_by_identity(s.dispatcher.database(), &Identity::new(ANA))
            .await
            .unwrap();
        assert!(open.is_none());
    }

    #[tokio::test]
    async fn empty_message_gets_fallback_without_ledger_row() {
        let s = setup(Arc::new(StepFlow::default())).await;

        let outcome = s.dispatcher.ingest(inbound("e1", "   ")).await;
        assert!(outcome.is_none());

        let delivered = s
            .sender
            .wait_for_delivered(1, Duration::from_secs(5))
            .await;
        assert_eq!(delivered[0].text, FALLBACK);
        assert_eq!(ledger::count_inbound(s.dispatcher.database()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ingest_swallows_turn_failures() {
        let s = setup(Arc::new(StepFlow {
            fail: true,
            ..StepFlow::default()
        }))
        .await;
        assert!(s.dispatcher.ingest(inbound("i1", "hola")).await.is_none());
    }

    #[tokio::test]
    async fn ingest_payload_runs_each_normalized_message() {
        let flow = Arc::new(StepFlow::default());
        let s = setup(flow.clone()).await;
        let body = serde_json::json!({
            "event": "messages.received",
            "data": { "messages": {
                "key": { "id": "wa-1", "remoteJid": "5215512345678@s.whatsapp.net" },
                "messageBody": "hola"
            }}
        });

        let outcomes = s.dispatcher.ingest_payload(&body).await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], TurnOutcome::Processed { .. }));

        let again = s.dispatcher.ingest_payload(&body).await;
        assert!(again[0].is_duplicate());
        assert_eq!(flow.calls.load(Ordering::SeqCst), 1);

        let status = serde_json::json!({ "event": "messages.update", "data": {} });
        assert!(s.dispatcher.ingest_payload(&status).await.is_empty());
    }
}
