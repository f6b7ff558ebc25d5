// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound messaging for the Parley conversation engine.
//!
//! [`EgressQueue`] is the only path to the provider: a single worker that
//! delivers replies in enqueue order, keeps a minimum interval between
//! provider calls, and retries throttled sends. [`WasenderClient`] is the
//! HTTP provider behind it.

pub mod client;
pub mod queue;

pub use client::WasenderClient;
pub use queue::{Delivery, EgressPolicy, EgressQueue, PendingDelivery};
