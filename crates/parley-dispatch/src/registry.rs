// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flow handlers and flow selection.
//!
//! The dispatcher never looks inside a flow. A [`FlowSelector`] decides what
//! an inbound message means for the identity's conversation, and the
//! [`FlowHandler`] registered for the session's [`FlowKind`] runs the step.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{FlowKind, InboundMessage, ParleyError, Session, SessionData};

use crate::context::TurnContext;

/// Close reason recorded when a new flow replaces an open one.
pub const FLOW_SWITCH_REASON: &str = "flow_switch";

/// Runs one step of a multi-step dialogue.
#[async_trait]
pub trait FlowHandler: Send + Sync {
    /// The flow this handler drives.
    fn kind(&self) -> FlowKind;

    /// Handles one inbound message for a locked, open session.
    ///
    /// Writes made through [`TurnContext`] commit or roll back together with
    /// the session changes. Returning an error rolls back the whole turn.
    /// Handlers never commit or roll back themselves.
    async fn handle(&self, ctx: &mut TurnContext<'_>) -> Result<(), ParleyError>;
}

/// What to do with an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowSelection {
    /// Continue the open session. Without one, the fallback prompt is sent.
    Continue,
    /// Start `flow`. An open session is reused and re-seeded.
    Start {
        flow: FlowKind,
        step: i64,
        data: SessionData,
    },
    /// Close the open session (reason [`FLOW_SWITCH_REASON`]) and start `flow`
    /// in a new one.
    Restart {
        flow: FlowKind,
        step: i64,
        data: SessionData,
    },
    /// Answer with `text` and leave the session untouched, e.g. a menu or a
    /// "continue or start over?" prompt.
    Reply(String),
    /// Do nothing.
    Ignore,
}

impl FlowSelection {
    pub fn start(flow: FlowKind) -> Self {
        Self::Start {
            flow,
            step: 1,
            data: SessionData::new(),
        }
    }

    pub fn restart(flow: FlowKind) -> Self {
        Self::Restart {
            flow,
            step: 1,
            data: SessionData::new(),
        }
    }
}

/// Maps an inbound message to a [`FlowSelection`].
///
/// Intent classification, greeting detection, and menu handling live here.
#[async_trait]
pub trait FlowSelector: Send + Sync {
    /// `open` is the identity's open session after the idle-timeout check.
    async fn select(
        &self,
        message: &InboundMessage,
        open: Option<&Session>,
    ) -> Result<FlowSelection, ParleyError>;

    /// Safe default reply: sent for empty messages, lost session locks, and
    /// `Continue` without an open session.
    fn fallback_prompt(&self, message: &InboundMessage) -> String;
}

/// Handlers by flow kind.
#[derive(Default, Clone)]
pub struct FlowRegistry {
    handlers: HashMap<FlowKind, Arc<dyn FlowHandler>>,
}

impl std::fmt::Debug for FlowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRegistry")
            .field("flows", &self.kinds())
            .finish()
    }
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under its own kind, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn FlowHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn with(mut self, handler: Arc<dyn FlowHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, kind: FlowKind) -> Option<Arc<dyn FlowHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Registered kinds in declaration order.
    pub fn kinds(&self) -> Vec<FlowKind> {
        use strum::IntoEnumIterator;
        FlowKind::iter()
            .filter(|k| self.handlers.contains_key(k))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
