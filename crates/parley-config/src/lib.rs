// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration system for the Parley conversation engine.
//!
//! TOML files are merged over compiled defaults, overridden by `PARLEY_*`
//! environment variables, rejected on unknown keys, and validated
//! semantically. Failures are returned as miette diagnostics.
//!
//! ```no_run
//! use parley_config::load_and_validate;
//!
//! let config = load_and_validate().expect("config errors");
//! println!("database: {}", config.storage.database_path);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

use std::path::Path;

pub use diagnostic::{ConfigError, render_errors};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::ParleyConfig;

/// Loads configuration from the standard hierarchy and validates it.
pub fn load_and_validate() -> Result<ParleyConfig, Vec<ConfigError>> {
    finish(loader::load_config(), collect_sources(&loader::standard_paths()))
}

/// Loads configuration from an explicit file (plus env overrides) and validates it.
pub fn load_and_validate_path(path: &Path) -> Result<ParleyConfig, Vec<ConfigError>> {
    finish(
        loader::load_config_from_path(path),
        collect_sources(&[path.to_path_buf()]),
    )
}

/// Loads configuration from a TOML string and validates it.
pub fn load_and_validate_str(toml_content: &str) -> Result<ParleyConfig, Vec<ConfigError>> {
    finish(
        loader::load_config_from_str(toml_content),
        vec![("<inline>".to_string(), toml_content.to_string())],
    )
}

fn finish(
    loaded: Result<ParleyConfig, figment::Error>,
    sources: Vec<(String, String)>,
) -> Result<ParleyConfig, Vec<ConfigError>> {
    match loaded {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => Err(diagnostic::figment_to_config_errors(err, &sources)),
    }
}

fn collect_sources(paths: &[std::path::PathBuf]) -> Vec<(String, String)> {
    paths
        .iter()
        .filter_map(|path| {
            let content = std::fs::read_to_string(path).ok()?;
            let display = std::fs::canonicalize(path)
                .unwrap_or_else(|_| path.clone())
                .display()
                .to_string();
            Some((display, content))
        })
        .collect()
}
