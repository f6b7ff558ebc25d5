// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules.

pub mod ledger;
pub mod sessions;
