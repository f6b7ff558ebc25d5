// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Parley conversation engine.
//!
//! This crate provides the error type, the domain types shared by every other
//! crate (identities, sessions, inbound events, media references), dedupe key
//! computation, and the traits implemented by outbound providers and object
//! storage backends.

pub mod dedupe;
pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use dedupe::DedupeKey;
pub use error::{ErrorKind, ParleyError};
pub use traits::{MessageSender, ObjectStore, SendFailure};
pub use types::{
    DataValue, FlowKind, Identity, InboundEvent, InboundMessage, MediaCategory, MediaRef,
    Session, SessionData, SessionStatus,
};
