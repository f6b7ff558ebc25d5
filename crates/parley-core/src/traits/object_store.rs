// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable object storage trait used by the media pipeline.

use async_trait::async_trait;

use crate::error::ParleyError;

/// Durable blob storage with public URLs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Stores `body` under `key` with an explicit content type.
    ///
    /// Failures are reported as [`ParleyError::StorageUpload`].
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), ParleyError>;

    /// Public URL at which `key` is served.
    fn public_url(&self, key: &str) -> String;
}
