// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted flow handler and keyword selector.
//!
//! `ScriptedFlow` performs a fixed list of actions on every turn and records
//! what it saw. `KeywordSelector` maps exact keywords to flows, the way a
//! menu would.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{FlowKind, InboundMessage, ParleyError, Session, SessionData};
use parley_dispatch::{FlowHandler, FlowSelection, FlowSelector, TurnContext};
use tokio::sync::Mutex;

/// One thing a [`ScriptedFlow`] does during a turn.
#[derive(Debug, Clone)]
pub enum FlowAction {
    Reply(String),
    /// Moves to `step`, merging `data`.
    Advance { step: i64, data: Option<SessionData> },
    /// Increments the step by one.
    NextStep,
    Close(Option<String>),
    Fail(String),
}

/// What a [`ScriptedFlow`] saw when it was called.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowCall {
    pub session_id: String,
    pub step: i64,
    pub text: String,
    pub new_session: bool,
}

pub struct ScriptedFlow {
    kind: FlowKind,
    actions: Vec<FlowAction>,
    calls: Arc<Mutex<Vec<FlowCall>>>,
}

impl ScriptedFlow {
    pub fn new(kind: FlowKind) -> Self {
        Self {
            kind,
            actions: Vec::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn then(mut self, action: FlowAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn replying(self, text: &str) -> Self {
        self.then(FlowAction::Reply(text.to_string()))
    }

    pub fn advancing(self, step: i64, data: Option<SessionData>) -> Self {
        self.then(FlowAction::Advance { step, data })
    }

    pub fn stepping(self) -> Self {
        self.then(FlowAction::NextStep)
    }

    pub fn closing(self, reason: Option<&str>) -> Self {
        self.then(FlowAction::Close(reason.map(str::to_string)))
    }

    pub fn failing(self, message: &str) -> Self {
        self.then(FlowAction::Fail(message.to_string()))
    }

    pub async fn calls(&self) -> Vec<FlowCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl FlowHandler for ScriptedFlow {
    fn kind(&self) -> FlowKind {
        self.kind
    }

    async fn handle(&self, ctx: &mut TurnContext<'_>) -> Result<(), ParleyError> {
        self.calls.lock().await.push(FlowCall {
            session_id: ctx.session().id.clone(),
            step: ctx.session().step,
            text: ctx.inbound().text.clone(),
            new_session: ctx.is_new_session(),
        });

        for action in &self.actions {
            match action {
                FlowAction::Reply(text) => ctx.send(text).await?,
                FlowAction::Advance { step, data } => {
                    ctx.update_session(*step, data.as_ref()).await?;
                }
                FlowAction::NextStep => {
                    let next = ctx.session().step + 1;
                    ctx.update_session(next, None).await?;
                }
                FlowAction::Close(reason) => ctx.close_session(reason.as_deref()).await?,
                FlowAction::Fail(message) => return Err(ParleyError::Flow(message.clone())),
            }
        }
        Ok(())
    }
}

/// Selects flows by exact, case-insensitive keyword.
///
/// A keyword for the open session's flow continues it; a keyword for another
/// flow restarts. Anything else continues the open session, which without one
/// sends the fallback prompt.
pub struct KeywordSelector {
    keywords: HashMap<String, FlowKind>,
    replies: HashMap<String, String>,
    ignored: Vec<String>,
    fallback: String,
}

impl KeywordSelector {
    pub fn new(fallback: &str) -> Self {
        Self {
            keywords: HashMap::new(),
            replies: HashMap::new(),
            ignored: Vec::new(),
            fallback: fallback.to_string(),
        }
    }

    pub fn route(mut self, keyword: &str, flow: FlowKind) -> Self {
        self.keywords.insert(keyword.to_lowercase(), flow);
        self
    }

    pub fn reply(mut self, keyword: &str, text: &str) -> Self {
        self.replies.insert(keyword.to_lowercase(), text.to_string());
        self
    }

    pub fn ignore(mut self, keyword: &str) -> Self {
        self.ignored.push(keyword.to_lowercase());
        self
    }
}

#[async_trait]
impl FlowSelector for KeywordSelector {
    async fn select(
        &self,
        message: &InboundMessage,
        open: Option<&Session>,
    ) -> Result<FlowSelection, ParleyError> {
        let word = message.text.trim().to_lowercase();
        if self.ignored.contains(&word) {
            return Ok(FlowSelection::Ignore);
        }
        if let Some(text) = self.replies.get(&word) {
            return Ok(FlowSelection::Reply(text.clone()));
        }
        Ok(match (self.keywords.get(&word), open) {
            (Some(flow), Some(session)) if session.flow == *flow => FlowSelection::Continue,
            (Some(flow), Some(_)) => FlowSelection::restart(*flow),
            (Some(flow), None) => FlowSelection::start(*flow),
            (None, _) => FlowSelection::Continue,
        })
    }

    fn fallback_prompt(&self, _message: &InboundMessage) -> String {
        self.fallback.clone()
    }
}
