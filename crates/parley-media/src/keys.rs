// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Media key expansion.
//!
//! A 32-byte media key is expanded with HKDF-SHA256 (empty salt, a
//! category-specific info label) into 112 bytes, sliced as:
//!
//! | bytes    | use                  |
//! |----------|----------------------|
//! | 0..16    | AES-CBC IV           |
//! | 16..48   | AES-256 key          |
//! | 48..80   | HMAC-SHA256 key      |
//! | 80..112  | reference key (unused) |

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hkdf::Hkdf;
use parley_core::{MediaCategory, ParleyError};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Length of the expanded key material.
pub const EXPANDED_LEN: usize = 112;

/// Required media key length.
pub const MEDIA_KEY_LEN: usize = 32;

/// HKDF info label for a media category.
pub fn hkdf_info(category: MediaCategory) -> &'static [u8] {
    match category {
        MediaCategory::Image => b"WhatsApp Image Keys",
        MediaCategory::Video => b"WhatsApp Video Keys",
        MediaCategory::Audio => b"WhatsApp Audio Keys",
        MediaCategory::Document => b"WhatsApp Document Keys",
    }
}

/// HKDF-SHA256 with an empty salt, filling `okm`.
pub(crate) fn expand(ikm: &[u8], info: &[u8], okm: &mut [u8]) -> Result<(), ParleyError> {
    Hkdf::<Sha256>::new(None, ikm)
        .expand(info, okm)
        .map_err(|_| ParleyError::DecryptionFailed("HKDF output length out of range".into()))
}

/// Key material derived for one media item.
pub struct MediaKeys {
    material: Zeroizing<[u8; EXPANDED_LEN]>,
}

impl std::fmt::Debug for MediaKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaKeys").field("material", &"[REDACTED]").finish()
    }
}

impl MediaKeys {
    /// Derives keys from raw media key bytes.
    pub fn derive(media_key: &[u8], category: MediaCategory) -> Result<Self, ParleyError> {
        if media_key.len() != MEDIA_KEY_LEN {
            return Err(ParleyError::DecryptionFailed(format!(
                "media key must be {MEDIA_KEY_LEN} bytes, got {}",
                media_key.len()
            )));
        }
        let mut material = Zeroizing::new([0u8; EXPANDED_LEN]);
        expand(media_key, hkdf_info(category), &mut material[..])?;
        Ok(Self { material })
    }

    /// Derives keys from a base64 media key as delivered by the provider.
    pub fn from_base64(media_key: &str, category: MediaCategory) -> Result<Self, ParleyError> {
        let raw = Zeroizing::new(
            STANDARD
                .decode(media_key.trim())
                .map_err(|e| ParleyError::DecryptionFailed(format!("media key is not base64: {e}")))?,
        );
        Self::derive(&raw, category)
    }

    pub fn iv(&self) -> &[u8] {
        &self.material[0..16]
    }

    pub fn cipher_key(&self) -> &[u8] {
        &self.material[16..48]
    }

    pub fn mac_key(&self) -> &[u8] {
        &self.material[48..80]
    }

    pub fn ref_key(&self) -> &[u8] {
        &self.material[80..112]
    }
}
