// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory object store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{ObjectStore, ParleyError};
use tokio::sync::Mutex;

/// A stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
}

/// Keeps uploads in memory and serves them from a fake public host.
#[derive(Clone)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
    base_url: String,
    failing: Arc<Mutex<bool>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::with_base_url("https://media.test")
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            base_url: base_url.trim_end_matches('/').to_string(),
            failing: Arc::new(Mutex::new(false)),
        }
    }

    /// Makes every following `put` fail with a retryable upload error.
    pub async fn fail_uploads(&self, failing: bool) {
        *self.failing.lock().await = failing;
    }

    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), ParleyError> {
        if *self.failing.lock().await {
            return Err(ParleyError::StorageUpload {
                message: format!("upload of {key} refused"),
                source: None,
            });
        }
        self.objects.lock().await.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }
}
