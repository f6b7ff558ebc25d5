// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Parley integration tests.
//!
//! Provides mock collaborators and test harness infrastructure for fast,
//! deterministic, CI-runnable tests without external services.
//!
//! # Components
//!
//! - [`MockSender`] - Mock provider that captures sends and scripts throttles
//! - [`MemoryObjectStore`] - In-memory object store
//! - [`ScriptedFlow`] / [`KeywordSelector`] - Configurable flow and selector
//! - [`TestHarness`] - Temp database, egress worker, and dispatcher

pub mod harness;
pub mod memory_store;
pub mod mock_sender;
pub mod scripted_flow;

pub use harness::{DEFAULT_FALLBACK, TestHarness, TestHarnessBuilder};
pub use memory_store::{MemoryObjectStore, StoredObject};
pub use mock_sender::{MockSender, SentMessage};
pub use scripted_flow::{FlowAction, FlowCall, KeywordSelector, ScriptedFlow};
