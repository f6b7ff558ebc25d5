// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Lookup order: `./parley.toml` > `~/.config/parley/parley.toml` >
//! `/etc/parley/parley.toml`, with `PARLEY_*` environment variables on top.

#![allow(clippy::result_large_err)] // figment::Error is external

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use tracing::debug;

use crate::model::ParleyConfig;

/// Config sections, longest first so prefixes never shadow each other.
const SECTIONS: &[&str] = &[
    "object_store",
    "service",
    "storage",
    "session",
    "adapter",
    "egress",
    "media",
];

const SYSTEM_CONFIG: &str = "/etc/parley/parley.toml";
const LOCAL_CONFIG: &str = "parley.toml";

/// Path of the per-user config file, if the platform has a config dir.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("parley").join("parley.toml"))
}

/// Load configuration from the standard hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/parley/parley.toml`
/// 3. `~/.config/parley/parley.toml`
/// 4. `./parley.toml`
/// 5. `PARLEY_*` environment variables
pub fn load_config() -> Result<ParleyConfig, figment::Error> {
    build_figment().extract()
}

/// Build the layered Figment without extracting it.
pub fn build_figment() -> Figment {
    let mut figment = Figment::new()
        .merge(Serialized::defaults(ParleyConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG));
    if let Some(user) = user_config_path() {
        figment = figment.merge(Toml::file(user));
    }
    figment.merge(Toml::file(LOCAL_CONFIG)).merge(env_provider())
}

/// Load configuration from a single TOML string (no files, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<ParleyConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ParleyConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from an explicit file with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<ParleyConfig, figment::Error> {
    debug!(path = %path.display(), "loading configuration file");
    Figment::new()
        .merge(Serialized::defaults(ParleyConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Paths consulted by [`load_config`], in merge order.
pub fn standard_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(SYSTEM_CONFIG)];
    paths.extend(user_config_path());
    paths.push(PathBuf::from(LOCAL_CONFIG));
    paths
}

/// Maps a lowercased, prefix-stripped env var name onto a dotted config path.
///
/// Only the section boundary becomes a dot, so `object_store_secret_access_key`
/// maps to `object_store.secret_access_key`. Names outside every section are
/// returned unchanged and rejected later as unknown top-level keys.
pub fn env_key_to_path(key: &str) -> String {
    for section in SECTIONS {
        if let Some(field) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
            .filter(|field| !field.is_empty())
        {
            return format!("{section}.{field}");
        }
    }
    key.to_string()
}

fn env_provider() -> Env {
    Env::prefixed("PARLEY_").map(|key| env_key_to_path(key.as_str()).into())
}
