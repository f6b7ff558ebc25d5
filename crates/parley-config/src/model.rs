// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Parley conversation engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so that a misspelled key
//! fails startup with a suggestion instead of being silently ignored.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Parley configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ParleyConfig {
    /// Process-wide settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// SQLite settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Conversation session settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Outbound provider and pacing settings.
    #[serde(default)]
    pub egress: EgressConfig,

    /// Media download limits and upload layout.
    #[serde(default)]
    pub media: MediaConfig,

    /// S3-compatible object storage credentials.
    #[serde(default)]
    pub object_store: ObjectStoreConfig,

    /// Inbound payload normalization settings.
    #[serde(default)]
    pub adapter: AdapterConfig,
}

impl ParleyConfig {
    /// Renders the effective configuration as TOML with credentials masked.
    pub fn to_redacted_toml(&self) -> Result<String, toml::ser::Error> {
        let mut copy = self.clone();
        if copy.egress.token.is_some() {
            copy.egress.token = Some(REDACTED.to_string());
        }
        if copy.object_store.secret_access_key.is_some() {
            copy.object_store.secret_access_key = Some(REDACTED.to_string());
        }
        toml::to_string_pretty(&copy)
    }
}

const REDACTED: &str = "********";

/// Process-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Name used in logs.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Default tracing level when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_service_name() -> String {
    "parley".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// SQLite settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL mode.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,

    /// How long a connection waits for the write lock before failing.
    ///
    /// A turn holds the write lock while its handler runs, media work included,
    /// so this must exceed the media fetch and upload timeouts.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Number of dedicated connections available to concurrent turns.
    #[serde(default = "default_turn_pool_size")]
    pub turn_pool_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
            busy_timeout_ms: default_busy_timeout_ms(),
            turn_pool_size: default_turn_pool_size(),
        }
    }
}

impl StorageConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("parley").join("parley.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("parley.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

fn default_busy_timeout_ms() -> u64 {
    90_000
}

fn default_turn_pool_size() -> usize {
    4
}

/// Conversation session settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Minutes without activity after which an open session is closed on next touch.
    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: default_idle_timeout_minutes(),
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_minutes * 60)
    }
}

fn default_idle_timeout_minutes() -> u64 {
    20
}

/// Outbound provider and pacing settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EgressConfig {
    /// Provider API base URL.
    #[serde(default = "default_egress_base_url")]
    pub base_url: String,

    /// Bearer token for the provider API.
    #[serde(default)]
    pub token: Option<String>,

    /// Minimum spacing between two provider calls, across all identities.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Retries after a throttled attempt before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Wait applied when a throttle response carries no hint.
    #[serde(default = "default_retry_after_secs")]
    pub default_retry_after_secs: u64,

    /// Extra wait added on top of every throttle hint.
    #[serde(default = "default_retry_grace_ms")]
    pub retry_grace_ms: u64,

    /// Longest throttle wait honoured; larger provider hints are capped here.
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,

    /// Timeout of a single provider request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Requests that may wait in the queue before `send` applies backpressure.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            base_url: default_egress_base_url(),
            token: None,
            min_interval_ms: default_min_interval_ms(),
            max_retries: default_max_retries(),
            default_retry_after_secs: default_retry_after_secs(),
            retry_grace_ms: default_retry_grace_ms(),
            max_retry_after_secs: default_max_retry_after_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl EgressConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }

    pub fn retry_grace(&self) -> Duration {
        Duration::from_millis(self.retry_grace_ms)
    }

    pub fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_egress_base_url() -> String {
    "https://www.wasenderapi.com".to_string()
}

fn default_min_interval_ms() -> u64 {
    5_200
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_after_secs() -> u64 {
    5
}

fn default_retry_grace_ms() -> u64 {
    250
}

fn default_max_retry_after_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_queue_capacity() -> usize {
    256
}

/// Media download limits and upload layout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MediaConfig {
    /// Timeout of a media download.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Largest media blob accepted, in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    /// Top-level folder of uploaded objects.
    #[serde(default = "default_folder")]
    pub default_folder: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_bytes: default_max_bytes(),
            default_folder: default_folder(),
        }
    }
}

impl MediaConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_max_bytes() -> u64 {
    20 * 1024 * 1024
}

fn default_folder() -> String {
    "uploads".to_string()
}

/// S3-compatible object storage credentials.
///
/// Either every connection field is set or none is; validation enforces this.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectStoreConfig {
    /// Endpoint URL, e.g. `https://<account>.r2.cloudflarestorage.com`.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub bucket: Option<String>,

    /// Signing region. R2 uses `auto`.
    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Base of the public URL returned for uploaded objects.
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Timeout of a single upload.
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            bucket: None,
            region: default_region(),
            access_key_id: None,
            secret_access_key: None,
            public_base_url: None,
            upload_timeout_secs: default_upload_timeout_secs(),
        }
    }
}

impl ObjectStoreConfig {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    /// True when any connection field is set.
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
            || self.bucket.is_some()
            || self.access_key_id.is_some()
            || self.secret_access_key.is_some()
            || self.public_base_url.is_some()
    }
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_upload_timeout_secs() -> u64 {
    30
}

/// Inbound payload normalization settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AdapterConfig {
    /// Country calling code (digits only) prepended to bare 10-digit numbers.
    #[serde(default)]
    pub default_country_code: Option<String>,
}
