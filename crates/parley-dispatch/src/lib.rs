// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turn dispatch for the Parley conversation engine.
//!
//! The [`Dispatcher`] wraps every inbound message in one transactional turn:
//! ledger registration, session lookup and idle-timeout, flow selection, the
//! flow handler itself, and commit or rollback. Flows plug in through
//! [`FlowHandler`] and [`FlowSelector`]; [`payload`] turns provider webhooks
//! into inbound messages.

pub mod context;
pub mod dispatcher;
pub mod payload;
pub mod registry;

pub use context::TurnContext;
pub use dispatcher::{DEFAULT_IDLE_TIMEOUT, Dispatcher, TurnOutcome, TurnReport};
pub use payload::SkipReason;
pub use registry::{FLOW_SWITCH_REASON, FlowHandler, FlowRegistry, FlowSelection, FlowSelector};
