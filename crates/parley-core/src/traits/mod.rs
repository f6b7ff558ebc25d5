// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Traits for the external collaborators of the engine.

pub mod object_store;
pub mod sender;

pub use object_store::ObjectStore;
pub use sender::{MessageSender, SendFailure};
