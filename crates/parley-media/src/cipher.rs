// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encrypted media blob format.
//!
//! A blob is `AES-256-CBC(PKCS#7, plaintext) || mac`, where `mac` is the
//! first 10 bytes of `HMAC-SHA256(mac_key, iv || ciphertext)`. The MAC is
//! checked before anything is decrypted.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use parley_core::ParleyError;
use sha2::Sha256;

use crate::keys::MediaKeys;

/// Length of the truncated MAC appended to every blob.
pub const MAC_LEN: usize = 10;

const BLOCK_LEN: usize = 16;

type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

fn mac_for(keys: &MediaKeys) -> Result<HmacSha256, ParleyError> {
    let mut mac = HmacSha256::new_from_slice(keys.mac_key())
        .map_err(|_| ParleyError::DecryptionFailed("invalid MAC key".into()))?;
    mac.update(keys.iv());
    Ok(mac)
}

/// Verifies and decrypts a media blob.
///
/// Every failure (short blob, misaligned ciphertext, MAC mismatch, bad
/// padding) is reported as [`ParleyError::DecryptionFailed`].
pub fn decrypt(blob: &[u8], keys: &MediaKeys) -> Result<Vec<u8>, ParleyError> {
    if blob.len() <= MAC_LEN {
        return Err(ParleyError::DecryptionFailed(format!(
            "blob of {} bytes is too short",
            blob.len()
        )));
    }
    let (ciphertext, tag) = blob.split_at(blob.len() - MAC_LEN);
    if ciphertext.len() % BLOCK_LEN != 0 {
        return Err(ParleyError::DecryptionFailed(format!(
            "ciphertext length {} is not a multiple of {BLOCK_LEN}",
            ciphertext.len()
        )));
    }

    let mut mac = mac_for(keys)?;
    mac.update(ciphertext);
    mac.verify_truncated_left(tag)
        .map_err(|_| ParleyError::DecryptionFailed("MAC mismatch: wrong key, category, or corrupted media".into()))?;

    Aes256CbcDec::new_from_slices(keys.cipher_key(), keys.iv())
        .map_err(|_| ParleyError::DecryptionFailed("invalid cipher key or IV length".into()))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| ParleyError::DecryptionFailed("invalid padding".into()))
}

/// Produces a blob in the provider's format. Used to build fixtures.
pub fn encrypt(plaintext: &[u8], keys: &MediaKeys) -> Result<Vec<u8>, ParleyError> {
    let mut blob = Aes256CbcEnc::new_from_slices(keys.cipher_key(), keys.iv())
        .map_err(|_| ParleyError::Internal("invalid cipher key or IV length".into()))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut mac = mac_for(keys)?;
    mac.update(&blob);
    let tag = mac.finalize().into_bytes();
    blob.extend_from_slice(&tag[..MAC_LEN]);
    Ok(blob)
}
