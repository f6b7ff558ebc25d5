// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deduplication keys for inbound events.
//!
//! Providers redeliver webhooks. When a delivery carries a stable provider
//! message id the key is `pmid:<id>`; otherwise it is `hash:<sha256>` over a
//! canonical fingerprint of the event so that byte-identical redeliveries
//! collapse onto the same ledger row.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::{Identity, MediaRef};

/// JSON pointers probed, in order, for a provider-side sequence id.
const RAW_ID_POINTERS: &[&str] = &[
    "/messageId",
    "/id",
    "/data/id",
    "/messages/0/id",
    "/messages/0/key/id",
];

/// JSON pointers probed, in order, for a provider-side timestamp.
const RAW_TS_POINTERS: &[&str] = &[
    "/timestamp",
    "/messageTimestamp",
    "/messages/0/messageTimestamp",
    "/messages/0/timestamp",
];

/// Unique key of one logical inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupeKey(String);

impl DedupeKey {
    /// Wraps a key read back from storage.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Key for an event the provider identified itself.
    pub fn from_provider_id(id: &str) -> Self {
        Self(format!("pmid:{}", id.trim()))
    }

    /// Key computed from the event contents.
    pub fn fingerprint(identity: &Identity, body: &str, media: &[MediaRef], raw: &Value) -> Self {
        let canonical = serde_json::json!({
            "identity": identity.as_str(),
            "direction": "inbound",
            "body": normalize_body(body),
            "first_url": media.first().map(|m| m.url.as_str()),
            "media_count": media.len(),
            "raw_id": probe(raw, RAW_ID_POINTERS),
            "ts": probe(raw, RAW_TS_POINTERS),
        });

        let digest = Sha256::digest(canonical.to_string().as_bytes());
        Self(format!("hash:{}", hex::encode(digest)))
    }

    /// Prefers a non-blank provider id and falls back to the content fingerprint.
    pub fn resolve(
        provider_id: Option<&str>,
        identity: &Identity,
        body: &str,
        media: &[MediaRef],
        raw: &Value,
    ) -> Self {
        match provider_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => Self::from_provider_id(id),
            None => Self::fingerprint(identity, body, media, raw),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for keys derived from a provider message id.
    pub fn is_provider_id(&self) -> bool {
        self.0.starts_with("pmid:")
    }
}

impl fmt::Display for DedupeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercases, drops punctuation, and collapses whitespace.
pub fn normalize_body(body: &str) -> String {
    let lowered = body.to_lowercase();
    let kept: String = lowered
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn probe(raw: &Value, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .filter_map(|p| raw.pointer(p))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}
