// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content type resolution for decrypted media.

use parley_core::types::is_generic_mimetype;

pub const OCTET_STREAM: &str = "application/octet-stream";

const FALLBACK_EXTENSION: &str = ".bin";

/// Content type and storage extension chosen for a media item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentInfo {
    pub content_type: String,
    /// Leading dot included, e.g. `".pdf"`.
    pub extension: String,
}

/// Detects a mimetype from magic bytes.
pub fn sniff(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"%PDF") {
        Some("application/pdf")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("image/png")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if bytes.starts_with(b"OggS") {
        Some("audio/ogg")
    } else if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
        Some("video/mp4")
    } else {
        None
    }
}

/// Storage extension for a mimetype, if it is one we name.
pub fn extension_for_mime(mimetype: &str) -> Option<&'static str> {
    let m = mimetype.to_ascii_lowercase();
    let ext = if m.contains("jpeg") || m.contains("jpg") {
        ".jpg"
    } else if m.contains("png") {
        ".png"
    } else if m.contains("pdf") {
        ".pdf"
    } else if m.contains("webp") {
        ".webp"
    } else if m.contains("ogg") || m.contains("opus") {
        ".ogg"
    } else if m.contains("mp4") {
        ".mp4"
    } else if m.contains("mpeg") && m.starts_with("audio") {
        ".mp3"
    } else {
        return None;
    };
    Some(ext)
}

/// Extension of the URL path, skipping provider `.enc` suffixes and anything
/// longer than five characters after the dot.
pub fn extension_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let last = path.rsplit('/').next().unwrap_or_default();
    let dot = last.rfind('.')?;
    let ext = &last[dot..];
    if ext.len() < 2 || ext.len() > 6 || ext.eq_ignore_ascii_case(".enc") {
        return None;
    }
    if !ext[1..].chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn specific(mimetype: Option<&str>) -> Option<&str> {
    mimetype
        .map(str::trim)
        .filter(|m| !m.is_empty() && !is_generic_mimetype(m))
}

/// Picks the content type and extension for plaintext media.
///
/// A specific declared mimetype wins. A generic or missing one defers to the
/// magic bytes, then to the `Content-Type` the download was served with.
/// The extension follows the chosen type, then the URL, then `.bin`.
pub fn resolve_content(
    declared: Option<&str>,
    served: Option<&str>,
    bytes: &[u8],
    url: &str,
) -> ContentInfo {
    let content_type = specific(declared)
        .or_else(|| sniff(bytes))
        .or_else(|| specific(served))
        .unwrap_or(OCTET_STREAM);

    let extension = extension_for_mime(content_type)
        .map(str::to_string)
        .or_else(|| extension_from_url(url))
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string());

    ContentInfo {
        content_type: content_type.to_string(),
        extension,
    }
}
