// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across the Parley workspace.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::dedupe::DedupeKey;

/// A conversation participant, always stored in `+<digits>` E.164 form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wraps an already-normalized identity. No validation is performed.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Normalizes a provider address (`5215512345678@s.whatsapp.net`,
    /// `+52 55 1234 5678`, ...) into E.164.
    ///
    /// Bare 10-digit national numbers get `default_country_code` prepended when
    /// one is configured. Returns `None` for anything that is not 8 to 15 digits.
    pub fn normalize(raw: &str, default_country_code: Option<&str>) -> Option<Self> {
        let local = raw.split('@').next().unwrap_or(raw);
        let local = local.split(':').next().unwrap_or(local);
        let digits: String = local.chars().filter(|c| c.is_ascii_digit()).collect();

        let digits = match default_country_code {
            Some(cc) if digits.len() == 10 => format!("{cc}{digits}"),
            _ => digits,
        };

        if !(8..=15).contains(&digits.len()) {
            return None;
        }
        Some(Self(format!("+{digits}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identity without the leading `+`, as some provider endpoints expect it.
    pub fn digits(&self) -> &str {
        self.0.trim_start_matches('+')
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The dialogue a session is running.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowKind {
    Contract,
    Payment,
    Fault,
    Faq,
}

/// Lifecycle state of a [`Session`]. `Closed` is terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Open,
    Closed,
}

/// A scalar stored in a session's data bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    /// Clears the key when merged into existing data.
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl DataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// JSON has no NaN or infinity; such floats are kept as their text form
    /// instead of serializing to `null`, which would delete the key on merge.
    fn into_storable(self) -> Self {
        match self {
            Self::Float(f) if !f.is_finite() => Self::Text(f.to_string()),
            other => other,
        }
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for DataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for DataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for DataValue {
    fn from(value: f64) -> Self {
        Self::Float(value).into_storable()
    }
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Ordered key/value state collected by a dialogue across steps.
///
/// Updates are applied with [`SessionData::merge`]: keys in the patch overwrite,
/// keys absent from the patch survive, and a [`DataValue::Null`] removes its key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionData(BTreeMap<String, DataValue>);

impl SessionData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<DataValue>) {
        self.0.insert(key.into(), value.into().into_storable());
    }

    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(DataValue::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DataValue)> {
        self.0.iter()
    }

    /// Applies `patch` on top of this mapping.
    pub fn merge(&mut self, patch: &SessionData) {
        for (key, value) in &patch.0 {
            if value.is_null() {
                self.0.remove(key);
            } else {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    /// Returns a copy of this mapping with `patch` applied.
    pub fn merged(&self, patch: &SessionData) -> SessionData {
        let mut out = self.clone();
        out.merge(patch);
        out
    }
}

impl<K, V> FromIterator<(K, V)> for SessionData
where
    K: Into<String>,
    V: Into<DataValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into().into_storable()))
                .collect(),
        )
    }
}

/// One conversation with one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub identity: Identity,
    pub flow: FlowKind,
    pub step: i64,
    pub data: SessionData,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<String>,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }

    /// True when the session has not been touched for at least `timeout` as of `now`.
    pub fn is_idle_at(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(self.updated_at) >= timeout
    }
}

/// Media container kinds. Each one uses its own key-derivation label.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MediaCategory {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaCategory {
    /// Category implied by a mimetype's top-level type, if it names one.
    pub fn for_mimetype(mimetype: &str) -> Option<Self> {
        let top = mimetype.split('/').next().unwrap_or_default().trim();
        match top.to_ascii_lowercase().as_str() {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }

    /// Whether content of `mimetype` may legitimately arrive in this container.
    ///
    /// Documents can carry anything; other containers must agree with the
    /// mimetype unless the mimetype is missing or generic.
    pub fn accepts_mimetype(&self, mimetype: Option<&str>) -> bool {
        if *self == Self::Document {
            return true;
        }
        match mimetype.map(str::trim) {
            None | Some("") => true,
            Some(m) if is_generic_mimetype(m) => true,
            Some(m) => Self::for_mimetype(m) == Some(*self),
        }
    }
}

/// True for mimetypes that say nothing about the content.
pub fn is_generic_mimetype(mimetype: &str) -> bool {
    let base = mimetype.split(';').next().unwrap_or_default().trim();
    base.is_empty()
        || base.eq_ignore_ascii_case("application/octet-stream")
        || base.eq_ignore_ascii_case("binary/octet-stream")
}

/// A pointer to provider-hosted media attached to an inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    /// Base64 media key. `None` for media served in plaintext.
    pub crypto_key: Option<String>,
    pub mimetype: Option<String>,
    pub file_name: Option<String>,
    pub category: MediaCategory,
}

/// An inbound message as normalized by a provider adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub dedupe_key: DedupeKey,
    pub identity: Identity,
    pub text: String,
    pub media: Vec<MediaRef>,
    pub profile_name: Option<String>,
    pub raw: serde_json::Value,
}

impl InboundMessage {
    pub fn new(dedupe_key: DedupeKey, identity: Identity, text: impl Into<String>) -> Self {
        Self {
            dedupe_key,
            identity,
            text: text.into(),
            media: Vec::new(),
            profile_name: None,
            raw: serde_json::Value::Null,
        }
    }

    pub fn with_media(mut self, media: MediaRef) -> Self {
        self.media.push(media);
        self
    }

    pub fn with_profile_name(mut self, name: impl Into<String>) -> Self {
        self.profile_name = Some(name.into());
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = raw;
        self
    }

    /// True when there is nothing for a dialogue to react to.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.media.is_empty()
    }
}

/// A row of the ingestion ledger. Never updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub id: i64,
    pub dedupe_key: DedupeKey,
    pub identity: Identity,
    pub body: String,
    pub media: Vec<MediaRef>,
    pub raw: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn identity_from_whatsapp_jid() {
        let id = Identity::normalize("5215512345678@s.whatsapp.net", None).unwrap();
        assert_eq!(id.as_str(), "+5215512345678");
        assert_eq!(id.digits(), "5215512345678");
    }

    #[test]
    fn identity_strips_device_suffix_and_formatting() {
        let id = Identity::normalize("5215512345678:17@s.whatsapp.net", None).unwrap();
        assert_eq!(id.as_str(), "+5215512345678");
        let id = Identity::normalize("+52 (55) 1234-5678", None).unwrap();
        assert_eq!(id.as_str(), "+525512345678");
    }

    #[test]
    fn identity_applies_default_country_code_to_national_numbers() {
        let id = Identity::normalize("5512345678", Some("52")).unwrap();
        assert_eq!(id.as_str(), "+525512345678");
        let id = Identity::normalize("5512345678", None).unwrap();
        assert_eq!(id.as_str(), "+5512345678");
    }

    #[test]
    fn identity_rejects_short_and_overlong_numbers() {
        assert!(Identity::normalize("12345", None).is_none());
        assert!(Identity::normalize("1234567890123456", None).is_none());
        assert!(Identity::normalize("status@broadcast", None).is_none());
    }

    #[test]
    fn flow_kind_string_forms() {
        assert_eq!(FlowKind::Payment.to_string(), "PAYMENT");
        assert_eq!(FlowKind::from_str("FAQ").unwrap(), FlowKind::Faq);
        assert_eq!(
            serde_json::to_string(&FlowKind::Contract).unwrap(),
            "\"CONTRACT\""
        );
    }

    #[test]
    fn merge_preserves_untouched_keys() {
        let mut data = SessionData::new().with("nombre", "Ana");
        data.merge(&SessionData::new().with("mes", "enero").with("monto", "500"));

        assert_eq!(data.len(), 3);
        assert_eq!(data.get_str("nombre"), Some("Ana"));
        assert_eq!(data.get_str("mes"), Some("enero"));
        assert_eq!(data.get_str("monto"), Some("500"));
    }

    #[test]
    fn merge_null_clears_key() {
        let mut data = SessionData::new().with("nombre", "Ana").with("tmp", 3_i64);
        data.merge(&SessionData::new().with("tmp", DataValue::Null));
        assert!(!data.contains_key("tmp"));
        assert_eq!(data.get_str("nombre"), Some("Ana"));
    }

    #[test]
    fn non_finite_floats_survive_json_and_merge() {
        let patch = SessionData::new()
            .with("ratio", f64::NAN)
            .with("tope", f64::INFINITY)
            .with("monto", 512.5);
        assert_eq!(patch.get_str("ratio"), Some("NaN"));
        assert_eq!(patch.get_str("tope"), Some("inf"));
        assert_eq!(patch.get("monto"), Some(&DataValue::Float(512.5)));

        let mut explicit = SessionData::new();
        explicit.set("ratio", DataValue::Float(f64::NEG_INFINITY));
        assert_eq!(explicit.get_str("ratio"), Some("-inf"));

        let json = serde_json::to_string(&patch).unwrap();
        assert!(!json.contains("null"));
        let back: SessionData = serde_json::from_str(&json).unwrap();

        let mut data = SessionData::new().with("nombre", "Ana");
        data.merge(&back);
        assert_eq!(data.len(), 4);
        assert_eq!(data.get_str("ratio"), Some("NaN"));
    }

    #[test]
    fn session_data_json_is_a_flat_object() {
        let data = SessionData::new()
            .with("a", "x")
            .with("b", 2_i64)
            .with("c", true);
        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(json, r#"{"a":"x","b":2,"c":true}"#);
        let back: SessionData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn media_category_checks_mimetype() {
        assert!(MediaCategory::Image.accepts_mimetype(Some("image/jpeg")));
        assert!(!MediaCategory::Image.accepts_mimetype(Some("application/pdf")));
        assert!(MediaCategory::Image.accepts_mimetype(Some("application/octet-stream")));
        assert!(MediaCategory::Audio.accepts_mimetype(Some("audio/ogg; codecs=opus")));
        assert!(MediaCategory::Document.accepts_mimetype(Some("image/png")));
        assert!(MediaCategory::Video.accepts_mimetype(None));
    }

    #[test]
    fn idle_check_uses_updated_at() {
        let t0 = DateTime::parse_from_rfc3339("2026-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let session = Session {
            id: "s".into(),
            identity: Identity::new("+5215512345678"),
            flow: FlowKind::Payment,
            step: 1,
            data: SessionData::new(),
            status: SessionStatus::Open,
            created_at: t0,
            updated_at: t0,
            closed_at: None,
            close_reason: None,
        };
        let twenty = Duration::from_secs(20 * 60);
        assert!(!session.is_idle_at(t0 + TimeDelta::minutes(19), twenty));
        assert!(session.is_idle_at(t0 + TimeDelta::minutes(20), twenty));
        assert!(session.is_idle_at(t0 + TimeDelta::minutes(25), twenty));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn merge_never_drops_keys_absent_from_patch(
                base in proptest::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{0,8}", 0..8),
                patch in proptest::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{0,8}", 0..8),
            ) {
                let base_data: SessionData = base.clone().into_iter().collect();
                let patch_data: SessionData = patch.clone().into_iter().collect();
                let merged = base_data.merged(&patch_data);
                for (k, v) in &base {
                    let expected = patch.get(k).unwrap_or(v);
                    prop_assert_eq!(merged.get_str(k), Some(expected.as_str()));
                }
                for (k, v) in &patch {
                    prop_assert_eq!(merged.get_str(k), Some(v.as_str()));
                }
            }
        }
    }
}
