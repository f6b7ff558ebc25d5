// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WasenderAPI webhook normalization.
//!
//! Turns a `messages.received` webhook body into [`InboundMessage`]s. This is
//! the only place that reads provider JSON; the rest of the engine sees
//! normalized identities, text, and media references.

use parley_core::{DedupeKey, Identity, InboundMessage, MediaCategory, MediaRef};
use serde_json::Value;
use tracing::debug;

const MESSAGE_EVENTS: &[&str] = &["messages.received", "messages.upsert"];

/// Suffixes of WhatsApp addresses.
const JID_SUFFIXES: &[&str] = &["@s.whatsapp.net", "@c.us", "@g.us", "@lid"];

const SENDER_POINTERS: &[&str] = &[
    "/key/cleanedSenderPn",
    "/key/senderPn",
    "/key/remoteJid",
    "/remoteJid",
    "/key/participant",
    "/from",
];

const PROVIDER_ID_POINTERS: &[&str] = &["/key/id", "/id"];

const TEXT_POINTERS: &[&str] = &[
    "/messageBody",
    "/message/conversation",
    "/message/extendedTextMessage/text",
    "/message/buttonsResponseMessage/selectedDisplayText",
    "/message/buttonsResponseMessage/selectedButtonId",
    "/message/listResponseMessage/title",
    "/message/listResponseMessage/singleSelectReply/selectedRowId",
    "/text/body",
    "/body",
];

const MEDIA_CONTAINERS: &[(&str, MediaCategory)] = &[
    ("/message/imageMessage", MediaCategory::Image),
    ("/message/videoMessage", MediaCategory::Video),
    ("/message/audioMessage", MediaCategory::Audio),
    ("/message/documentMessage", MediaCategory::Document),
    (
        "/message/documentWithCaptionMessage/message/documentMessage",
        MediaCategory::Document,
    ),
];

/// Why a webhook produced no messages.
#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
pub enum SkipReason {
    /// Not a message event (status updates, `webhook.test`, ...).
    #[strum(to_string = "event {0} is not a message")]
    NotAMessage(String),
    /// The body has no message object.
    #[strum(to_string = "payload has no message")]
    Empty,
}

fn non_blank(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn first_at(node: &Value, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .filter_map(|p| node.pointer(p))
        .find_map(non_blank)
}

/// Removes a WhatsApp address suffix, keeping the local part.
pub fn strip_jid(address: &str) -> &str {
    let trimmed = address.trim();
    JID_SUFFIXES
        .iter()
        .find_map(|suffix| {
            let cut = trimmed.len().checked_sub(suffix.len())?;
            let (head, tail) = trimmed.split_at_checked(cut)?;
            tail.eq_ignore_ascii_case(suffix).then_some(head)
        })
        .unwrap_or(trimmed)
}

fn is_from_me(node: &Value) -> bool {
    ["/key/fromMe", "/fromMe"]
        .iter()
        .find_map(|p| node.pointer(p).and_then(Value::as_bool))
        .unwrap_or(false)
}

fn media_refs(node: &Value) -> (Vec<MediaRef>, Option<String>) {
    let mut media = Vec::new();
    let mut caption = None;
    for (pointer, category) in MEDIA_CONTAINERS {
        let Some(container) = node.pointer(pointer) else {
            continue;
        };
        let Some(url) = container.get("url").and_then(non_blank) else {
            continue;
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            continue;
        }
        if caption.is_none() {
            caption = container.get("caption").and_then(non_blank);
        }
        media.push(MediaRef {
            url,
            crypto_key: container.get("mediaKey").and_then(non_blank),
            mimetype: container.get("mimetype").and_then(non_blank),
            file_name: container.get("fileName").and_then(non_blank),
            category: *category,
        });
    }
    (media, caption)
}

/// Message objects in a webhook body: `data.messages` (object or array),
/// then the older `data.message`.
fn message_nodes(body: &Value) -> Vec<&Value> {
    match body.pointer("/data/messages").or_else(|| body.pointer("/data/message")) {
        Some(Value::Array(items)) => items.iter().filter(|v| v.is_object()).collect(),
        Some(node @ Value::Object(_)) => vec![node],
        _ => Vec::new(),
    }
}

/// Normalizes one message object. `None` for own messages and unusable senders.
pub fn normalize_message(node: &Value, default_country_code: Option<&str>) -> Option<InboundMessage> {
    if is_from_me(node) {
        debug!("own outbound message skipped");
        return None;
    }

    let Some(identity) = first_at(node, SENDER_POINTERS)
        .and_then(|raw| Identity::normalize(strip_jid(&raw), default_country_code))
    else {
        debug!("message without a usable sender skipped");
        return None;
    };

    let (media, caption) = media_refs(node);
    let text = first_at(node, TEXT_POINTERS).or(caption).unwrap_or_default();
    let provider_id = first_at(node, PROVIDER_ID_POINTERS);
    let dedupe_key = DedupeKey::resolve(provider_id.as_deref(), &identity, &text, &media, node);

    let mut message = InboundMessage::new(dedupe_key, identity, text).with_raw(node.clone());
    message.media = media;
    if let Some(name) = node.get("pushName").and_then(non_blank) {
        message = message.with_profile_name(name);
    }
    Some(message)
}

/// Normalizes a webhook body into inbound messages.
pub fn normalize(
    body: &Value,
    default_country_code: Option<&str>,
) -> Result<Vec<InboundMessage>, SkipReason> {
    let event = body.get("event").and_then(Value::as_str).unwrap_or_default();
    if !MESSAGE_EVENTS.contains(&event) {
        return Err(SkipReason::NotAMessage(event.to_string()));
    }

    let nodes = message_nodes(body);
    if nodes.is_empty() {
        return Err(SkipReason::Empty);
    }
    Ok(nodes
        .into_iter()
        .filter_map(|node| normalize_message(node, default_country_code))
        .collect())
}
