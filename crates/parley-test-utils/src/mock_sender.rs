// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock message sender for deterministic testing.
//!
//! `MockSender` implements `MessageSender`, captures every provider call with
//! its timestamp, and can be scripted to throttle or fail upcoming calls.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_core::{Identity, MessageSender, ParleyError, SendFailure};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// One provider call as the mock saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: Identity,
    pub text: String,
    pub at: Instant,
    /// False when a scripted failure or throttle answered the call.
    pub delivered: bool,
}

#[derive(Debug, Clone)]
enum Scripted {
    Throttle(Option<Duration>),
    Fail(String),
}

/// A mock provider for testing the egress path.
///
/// Calls are answered from the script first (in order) and succeed once it
/// is empty.
#[derive(Default)]
pub struct MockSender {
    calls: Arc<Mutex<Vec<SentMessage>>>,
    script: Arc<Mutex<VecDeque<Scripted>>>,
    notify: Arc<Notify>,
}

impl MockSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next `times` calls with a throttle carrying `retry_after`.
    pub async fn throttle_next(&self, times: usize, retry_after: Option<Duration>) {
        let mut script = self.script.lock().await;
        script.extend(std::iter::repeat_n(Scripted::Throttle(retry_after), times));
    }

    /// Answer the next call with a non-retryable failure.
    pub async fn fail_next(&self, message: &str) {
        self.script
            .lock()
            .await
            .push_back(Scripted::Fail(message.to_string()));
    }

    /// Every call, delivered or not, in call order.
    pub async fn calls(&self) -> Vec<SentMessage> {
        self.calls.lock().await.clone()
    }

    /// Delivered messages only.
    pub async fn delivered(&self) -> Vec<SentMessage> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.delivered)
            .cloned()
            .collect()
    }

    /// Texts delivered to `to`, in order.
    pub async fn texts_to(&self, to: &Identity) -> Vec<String> {
        self.delivered()
            .await
            .into_iter()
            .filter(|c| &c.to == to)
            .map(|c| c.text)
            .collect()
    }

    /// Waits until at least `count` messages were delivered or `timeout` passes.
    /// Returns the delivered messages either way.
    pub async fn wait_for_delivered(&self, count: usize, timeout: Duration) -> Vec<SentMessage> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            let delivered = self.delivered().await;
            if delivered.len() >= count {
                return delivered;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.delivered().await;
            }
        }
    }
}

#[async_trait]
impl MessageSender for MockSender {
    fn name(&self) -> &str {
        "mock-sender"
    }

    async fn send_text(&self, to: &Identity, text: &str) -> Result<(), SendFailure> {
        let scripted = self.script.lock().await.pop_front();
        let delivered = scripted.is_none();
        self.calls.lock().await.push(SentMessage {
            to: to.clone(),
            text: text.to_string(),
            at: Instant::now(),
            delivered,
        });
        self.notify.notify_waiters();

        match scripted {
            None => Ok(()),
            Some(Scripted::Throttle(retry_after)) => Err(SendFailure::Throttled { retry_after }),
            Some(Scripted::Fail(message)) => Err(SendFailure::Failed(ParleyError::Egress {
                message,
                source: None,
            })),
        }
    }
}
