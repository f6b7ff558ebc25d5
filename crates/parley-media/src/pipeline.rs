// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fetch, decrypt, and republish one media item.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use metrics::counter;
use parley_config::model::MediaConfig;
use parley_core::{Identity, MediaRef, ObjectStore, ParleyError};
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cipher;
use crate::fetch::HttpFetcher;
use crate::keys::MediaKeys;
use crate::sniff::resolve_content;

/// Where a media item ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMedia {
    pub public_url: String,
    pub content_type: String,
    /// Object key inside the bucket.
    pub key: String,
    /// Plaintext size in bytes.
    pub size: usize,
}

/// Turns provider-hosted media references into durable public URLs.
#[derive(Clone)]
pub struct MediaPipeline {
    fetcher: HttpFetcher,
    store: Arc<dyn ObjectStore>,
    folder: String,
}

impl std::fmt::Debug for MediaPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaPipeline")
            .field("store", &self.store.name())
            .field("folder", &self.folder)
            .finish()
    }
}

/// Plaintext bytes of a media blob.
///
/// Encrypted media is checked against its declared category first: an
/// image container holding a `video/*` mimetype is rejected as
/// [`ParleyError::DecryptionFailed`] before any key is derived. Media
/// without a key is returned unchanged.
pub fn open_blob(media: &MediaRef, blob: Vec<u8>) -> Result<Vec<u8>, ParleyError> {
    let Some(crypto_key) = media.crypto_key.as_deref() else {
        return Ok(blob);
    };
    if !media.category.accepts_mimetype(media.mimetype.as_deref()) {
        return Err(ParleyError::DecryptionFailed(format!(
            "declared category {} does not match mimetype {}",
            media.category,
            media.mimetype.as_deref().unwrap_or_default()
        )));
    }
    let keys = MediaKeys::from_base64(crypto_key, media.category)?;
    cipher::decrypt(&blob, &keys)
}

fn sanitize(segment: &str) -> String {
    let mut out = String::new();
    for c in segment.trim().to_lowercase().chars() {
        let c = if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    let out: String = out.chars().take(40).collect();
    match out.trim_matches('_') {
        "" => "file".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// Builds `{folder}/{date}/{owner hash}/{prefix}_{random}{ext}`.
///
/// The owner is hashed so identities never appear in public URLs.
pub fn object_key(
    folder: &str,
    date: NaiveDate,
    owner: &Identity,
    prefix: &str,
    extension: &str,
) -> String {
    let owner_hash = hex::encode(Sha256::digest(owner.as_str().as_bytes()));
    let suffix: [u8; 6] = rand::thread_rng().r#gen();
    format!(
        "{}/{}/{}/{}_{}{}",
        folder.trim_matches('/'),
        date.format("%Y-%m-%d"),
        &owner_hash[..16],
        sanitize(prefix),
        hex::encode(suffix),
        extension
    )
}

impl MediaPipeline {
    pub fn new(fetcher: HttpFetcher, store: Arc<dyn ObjectStore>, folder: impl Into<String>) -> Self {
        Self {
            fetcher,
            store,
            folder: folder.into(),
        }
    }

    pub fn from_config(config: &MediaConfig, store: Arc<dyn ObjectStore>) -> Result<Self, ParleyError> {
        Ok(Self::new(
            HttpFetcher::from_config(config)?,
            store,
            config.default_folder.clone(),
        ))
    }

    /// Downloads, decrypts, and republishes `media` for `owner`.
    ///
    /// `prefix` names the file inside the owner's namespace (e.g. `"ine_front"`).
    pub async fn resolve(
        &self,
        media: &MediaRef,
        owner: &Identity,
        prefix: &str,
    ) -> Result<ResolvedMedia, ParleyError> {
        let fetched = self.fetcher.fetch(&media.url).await?;
        self.resolve_bytes(media, fetched.bytes, fetched.content_type.as_deref(), owner, prefix)
            .await
    }

    /// Same as [`resolve`](Self::resolve) for a blob already in hand.
    pub async fn resolve_bytes(
        &self,
        media: &MediaRef,
        blob: Vec<u8>,
        served_type: Option<&str>,
        owner: &Identity,
        prefix: &str,
    ) -> Result<ResolvedMedia, ParleyError> {
        let category = media.category.to_string();
        let plaintext = match open_blob(media, blob) {
            Ok(p) => p,
            Err(e) => {
                warn!(category = %category, url = %media.url, error = %e, "media could not be opened");
                counter!("parley_media_failures_total", "kind" => e.kind().to_string()).increment(1);
                return Err(e);
            }
        };

        // Served type describes the ciphertext for encrypted media.
        let served_type = if media.crypto_key.is_some() { None } else { served_type };
        let content = resolve_content(media.mimetype.as_deref(), served_type, &plaintext, &media.url);
        let key = object_key(
            &self.folder,
            Utc::now().date_naive(),
            owner,
            prefix,
            &content.extension,
        );

        let size = plaintext.len();
        if let Err(e) = self.store.put(&key, plaintext, &content.content_type).await {
            counter!("parley_media_failures_total", "kind" => e.kind().to_string()).increment(1);
            return Err(e);
        }

        counter!("parley_media_resolved_total", "category" => category.clone()).increment(1);
        debug!(category = %category, key = %key, size, content_type = %content.content_type, "media republished");
        Ok(ResolvedMedia {
            public_url: self.store.public_url(&key),
            content_type: content.content_type,
            key,
            size,
        })
    }
}
