// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound messaging provider trait.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::ParleyError;
use crate::types::Identity;

/// Why a single provider call did not deliver the message.
#[derive(Debug, Error)]
pub enum SendFailure {
    /// The provider asked us to slow down. `retry_after` is its hint, if any.
    #[error("provider throttled the request (retry after {retry_after:?})")]
    Throttled { retry_after: Option<Duration> },

    /// Any other failure. Not retried by the egress queue.
    #[error(transparent)]
    Failed(#[from] ParleyError),
}

/// A provider able to deliver one text message to one identity.
///
/// Implementations perform exactly one request per call; pacing and
/// throttle retries belong to the egress queue.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Delivers `text` to `to`.
    async fn send_text(&self, to: &Identity, text: &str) -> Result<(), SendFailure>;
}
