// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Media pipeline for the Parley conversation engine.
//!
//! Provider media arrives as an AES-256-CBC blob plus a base64 media key.
//! This crate derives the per-category keys, verifies and decrypts the blob,
//! resolves the real content type, and republishes the plaintext to an
//! S3-compatible bucket.

pub mod cipher;
pub mod fetch;
pub mod keys;
pub mod pipeline;
pub mod s3;
pub mod sniff;

pub use fetch::{Fetched, HttpFetcher};
pub use keys::MediaKeys;
pub use pipeline::{MediaPipeline, ResolvedMedia, open_blob};
pub use s3::S3ObjectStore;
pub use sniff::{ContentInfo, resolve_content, sniff};
