// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The view of a turn handed to a flow handler.

use parley_core::{InboundEvent, InboundMessage, ParleyError, Session, SessionData};
use parley_egress::{EgressQueue, PendingDelivery};
use parley_media::{MediaPipeline, ResolvedMedia};
use parley_storage::Turn;
use parley_storage::queries::sessions;
use tracing::debug;

/// Everything a handler may touch during one turn.
///
/// Session changes go through the turn's transaction. Replies are queued
/// immediately and are not withdrawn if the turn later rolls back.
pub struct TurnContext<'a> {
    turn: &'a Turn,
    session: Session,
    message: &'a InboundMessage,
    event: &'a InboundEvent,
    egress: &'a EgressQueue,
    media: Option<&'a MediaPipeline>,
    new_session: bool,
    deliveries: Vec<PendingDelivery>,
}

impl<'a> TurnContext<'a> {
    pub(crate) fn new(
        turn: &'a Turn,
        session: Session,
        message: &'a InboundMessage,
        event: &'a InboundEvent,
        egress: &'a EgressQueue,
        media: Option<&'a MediaPipeline>,
        new_session: bool,
    ) -> Self {
        Self {
            turn,
            session,
            message,
            event,
            egress,
            media,
            new_session,
            deliveries: Vec::new(),
        }
    }

    /// The locked session, as of the last change made through this context.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The normalized inbound message.
    pub fn inbound(&self) -> &InboundMessage {
        self.message
    }

    /// The ledger row recorded for the inbound message.
    pub fn event(&self) -> &InboundEvent {
        self.event
    }

    /// True when this turn created or re-seeded the session.
    pub fn is_new_session(&self) -> bool {
        self.new_session
    }

    /// The turn's transaction, for domain writes that must commit together
    /// with the session.
    pub fn turn(&self) -> &Turn {
        self.turn
    }

    /// Queues a reply to the sender of the inbound message.
    pub async fn send(&mut self, text: &str) -> Result<(), ParleyError> {
        let pending = self.egress.enqueue(&self.message.identity, text).await?;
        self.deliveries.push(pending);
        Ok(())
    }

    /// Moves the session to `step`, merging `data` into the stored data.
    ///
    /// `None` keeps the data as it is. A [`parley_core::DataValue::Null`]
    /// in the patch removes that key.
    pub async fn update_session(
        &mut self,
        step: i64,
        data: Option<&SessionData>,
    ) -> Result<&Session, ParleyError> {
        let updated = sessions::update_session(self.turn, &self.session.id, step, data)
            .await?
            .ok_or_else(|| {
                ParleyError::Flow(format!("session {} is no longer open", self.session.id))
            })?;
        debug!(session_id = %updated.id, step, "session advanced");
        self.session = updated;
        Ok(&self.session)
    }

    /// Closes the session, recording `reason` if given.
    pub async fn close_session(&mut self, reason: Option<&str>) -> Result<(), ParleyError> {
        sessions::close_session(self.turn, &self.session.id, reason).await?;
        if let Some(session) = sessions::get_session(self.turn, &self.session.id).await? {
            self.session = session;
        }
        debug!(session_id = %self.session.id, reason, "session closed by flow");
        Ok(())
    }

    /// The media pipeline, when one is configured.
    pub fn media(&self) -> Option<&MediaPipeline> {
        self.media
    }

    /// Decrypts and republishes the inbound attachment at `index`.
    ///
    /// A [`ParleyError::DecryptionFailed`] concerns only this attachment;
    /// handlers usually ask for it again rather than fail the turn.
    pub async fn resolve_media(
        &self,
        index: usize,
        prefix: &str,
    ) -> Result<ResolvedMedia, ParleyError> {
        let media = self.message.media.get(index).ok_or_else(|| {
            ParleyError::Flow(format!("inbound message has no attachment {index}"))
        })?;
        let pipeline = self
            .media
            .ok_or_else(|| ParleyError::Config("media pipeline is not configured".into()))?;
        pipeline
            .resolve(media, &self.message.identity, prefix)
            .await
    }

    pub(crate) fn into_parts(self) -> (Session, Vec<PendingDelivery>) {
        (self.session, self.deliveries)
    }
}
