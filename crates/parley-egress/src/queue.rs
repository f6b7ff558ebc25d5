// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The single outbound path.
//!
//! One worker task owns the provider client and the time of the last
//! provider call. Requests arrive over a bounded channel in enqueue order
//! and each carries a oneshot for its result. The provider throttles per
//! account, so pacing is global, not per recipient.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parley_config::model::EgressConfig;
use parley_core::{Identity, MessageSender, ParleyError, SendFailure};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shortest wait applied after a throttle response.
const MIN_THROTTLE_WAIT: Duration = Duration::from_secs(1);

/// Pacing and retry rules for the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EgressPolicy {
    /// Minimum spacing between the starts of two provider calls.
    pub min_interval: Duration,
    /// Retries after a throttled attempt; attempts are `max_retries + 1` at most.
    pub max_retries: u32,
    /// Wait used when a throttle response has no hint.
    pub default_retry_after: Duration,
    /// Added to every throttle wait.
    pub retry_grace: Duration,
    /// Longest throttle wait before the grace; provider hints are capped to it.
    pub max_retry_after: Duration,
}

impl EgressPolicy {
    /// Wait after a throttled attempt, given the provider's hint.
    fn throttle_wait(&self, hint: Option<Duration>) -> Duration {
        hint.unwrap_or(self.default_retry_after)
            .min(self.max_retry_after)
            .max(MIN_THROTTLE_WAIT)
            .saturating_add(self.retry_grace)
    }
}

impl Default for EgressPolicy {
    fn default() -> Self {
        Self::from(&EgressConfig::default())
    }
}

impl From<&EgressConfig> for EgressPolicy {
    fn from(config: &EgressConfig) -> Self {
        Self {
            min_interval: config.min_interval(),
            max_retries: config.max_retries,
            default_retry_after: config.default_retry_after(),
            retry_grace: config.retry_grace(),
            max_retry_after: config.max_retry_after(),
        }
    }
}

/// How a request left the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The provider accepted the message after `attempts` calls.
    Sent { attempts: u32 },
    /// Blank text; nothing was sent.
    Skipped,
}

struct OutboundRequest {
    to: Identity,
    text: String,
    enqueued_at: Instant,
    reply: oneshot::Sender<Result<Delivery, ParleyError>>,
}

/// A queued request whose result has not been observed yet.
///
/// Dropping it does not cancel the delivery.
#[derive(Debug)]
pub struct PendingDelivery {
    rx: Option<oneshot::Receiver<Result<Delivery, ParleyError>>>,
}

impl PendingDelivery {
    fn ready() -> Self {
        Self { rx: None }
    }

    /// Waits for the worker to finish with this request.
    pub async fn wait(self) -> Result<Delivery, ParleyError> {
        match self.rx {
            None => Ok(Delivery::Skipped),
            Some(rx) => rx.await.unwrap_or(Err(ParleyError::EgressClosed)),
        }
    }
}

/// Handle to the egress worker. Clones share the same worker.
#[derive(Clone)]
pub struct EgressQueue {
    tx: mpsc::Sender<OutboundRequest>,
}

impl std::fmt::Debug for EgressQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EgressQueue")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl EgressQueue {
    /// Starts the worker. It runs until `cancel` fires or every handle is dropped.
    pub fn spawn(
        sender: Arc<dyn MessageSender>,
        policy: EgressPolicy,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = Worker {
            sender,
            policy,
            last_attempt: None,
        };
        let handle = tokio::spawn(run(worker, rx, cancel));
        (Self { tx }, handle)
    }

    pub fn from_config(
        sender: Arc<dyn MessageSender>,
        config: &EgressConfig,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        Self::spawn(sender, EgressPolicy::from(config), config.queue_capacity, cancel)
    }

    /// Queues `text` for `to` and returns without waiting for delivery.
    ///
    /// Blank text is accepted and completes immediately as
    /// [`Delivery::Skipped`]. Surrounding whitespace is trimmed.
    pub async fn enqueue(&self, to: &Identity, text: &str) -> Result<PendingDelivery, ParleyError> {
        let text = text.trim();
        if text.is_empty() {
            debug!(to = %to, "blank reply skipped");
            return Ok(PendingDelivery::ready());
        }

        let (reply, rx) = oneshot::channel();
        self.tx
            .send(OutboundRequest {
                to: to.clone(),
                text: text.to_string(),
                enqueued_at: Instant::now(),
                reply,
            })
            .await
            .map_err(|_| ParleyError::EgressClosed)?;
        counter!("parley_egress_enqueued_total").increment(1);
        Ok(PendingDelivery { rx: Some(rx) })
    }

    /// Queues `text` for `to` and waits for the outcome.
    pub async fn send(&self, to: &Identity, text: &str) -> Result<Delivery, ParleyError> {
        self.enqueue(to, text).await?.wait().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct Worker {
    sender: Arc<dyn MessageSender>,
    policy: EgressPolicy,
    last_attempt: Option<Instant>,
}

impl Worker {
    /// Sleeps until the minimum interval since the last call has passed,
    /// and until `not_before` if a throttle wait is pending.
    async fn pace(&self, not_before: Option<Instant>) {
        let interval_end = self
            .last_attempt
            .and_then(|t| t.checked_add(self.policy.min_interval));
        let deadline = match (interval_end, not_before) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if let Some(deadline) = deadline {
            tokio::time::sleep_until(deadline).await;
        }
    }

    async fn deliver(&mut self, request: &OutboundRequest) -> Result<Delivery, ParleyError> {
        let mut attempts = 0u32;
        let mut not_before = None;
        loop {
            self.pace(not_before).await;
            attempts += 1;
            self.last_attempt = Some(Instant::now());
            counter!("parley_egress_attempts_total").increment(1);

            match self.sender.send_text(&request.to, &request.text).await {
                Ok(()) => {
                    debug!(
                        to = %request.to,
                        attempts,
                        queued_ms = request.enqueued_at.elapsed().as_millis() as u64,
                        "message delivered"
                    );
                    return Ok(Delivery::Sent { attempts });
                }
                Err(SendFailure::Throttled { retry_after }) => {
                    counter!("parley_egress_throttled_total").increment(1);
                    if attempts > self.policy.max_retries {
                        return Err(ParleyError::SendThrottleExhausted { attempts });
                    }
                    let wait = self.policy.throttle_wait(retry_after);
                    warn!(
                        to = %request.to,
                        attempts,
                        hint_ms = retry_after.map(|d| d.as_millis() as u64),
                        wait_ms = wait.as_millis() as u64,
                        "provider throttled send, backing off"
                    );
                    not_before = Instant::now().checked_add(wait);
                }
                Err(SendFailure::Failed(e)) => return Err(e),
            }
        }
    }
}

async fn run(
    mut worker: Worker,
    mut rx: mpsc::Receiver<OutboundRequest>,
    cancel: CancellationToken,
) {
    info!(
        provider = worker.sender.name(),
        min_interval_ms = worker.policy.min_interval.as_millis() as u64,
        "egress worker started"
    );

    loop {
        let request = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(request) => request,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ParleyError::EgressClosed),
            result = worker.deliver(&request) => result,
        };

        match &result {
            Ok(_) => counter!("parley_egress_sent_total").increment(1),
            Err(e) => {
                counter!("parley_egress_failed_total", "kind" => e.kind().to_string()).increment(1);
                warn!(to = %request.to, error = %e, "outbound message not delivered");
            }
        }
        // The caller may have stopped listening.
        let _ = request.reply.send(result);
    }

    rx.close();
    let mut abandoned = 0usize;
    while let Ok(request) = rx.try_recv() {
        let _ = request.reply.send(Err(ParleyError::EgressClosed));
        abandoned += 1;
    }
    info!(abandoned, "egress worker stopped");
}
