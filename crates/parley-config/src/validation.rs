// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation.
//!
//! Checks constraints serde cannot express and reports every violation at once.

use crate::diagnostic::ConfigError;
use crate::model::ParleyConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for `egress.max_retry_after_secs`.
const MAX_RETRY_AFTER_CAP_SECS: u64 = 3_600;

/// Validates a deserialized configuration, collecting all errors.
pub fn validate_config(config: &ParleyConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if !LOG_LEVELS.contains(&config.service.log_level.as_str()) {
        errors.push(ConfigError::validation(format!(
            "service.log_level must be one of {}, got `{}`",
            LOG_LEVELS.join(", "),
            config.service.log_level
        )));
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::validation("storage.database_path must not be empty"));
    }

    if config.storage.turn_pool_size == 0 {
        errors.push(ConfigError::validation("storage.turn_pool_size must be at least 1"));
    }

    // A turn keeps the write lock through media work, so waiters must outlast it.
    let media_budget_ms = (config.media.fetch_timeout_secs
        + config.object_store.upload_timeout_secs)
        .saturating_mul(1_000);
    if config.storage.busy_timeout_ms <= media_budget_ms {
        errors.push(ConfigError::validation(format!(
            "storage.busy_timeout_ms ({}) must exceed media.fetch_timeout_secs + \
             object_store.upload_timeout_secs ({media_budget_ms} ms)",
            config.storage.busy_timeout_ms
        )));
    }

    if config.session.idle_timeout_minutes == 0 {
        errors.push(ConfigError::validation(
            "session.idle_timeout_minutes must be at least 1",
        ));
    }

    validate_url("egress.base_url", &config.egress.base_url, &mut errors);

    if let Some(token) = &config.egress.token
        && token.trim().is_empty()
    {
        errors.push(ConfigError::validation("egress.token must not be blank when set"));
    }

    if config.egress.max_retries > 10 {
        errors.push(ConfigError::validation(format!(
            "egress.max_retries must be at most 10, got {}",
            config.egress.max_retries
        )));
    }

    if config.egress.max_retry_after_secs == 0
        || config.egress.max_retry_after_secs > MAX_RETRY_AFTER_CAP_SECS
    {
        errors.push(ConfigError::validation(format!(
            "egress.max_retry_after_secs must be between 1 and {MAX_RETRY_AFTER_CAP_SECS}, got {}",
            config.egress.max_retry_after_secs
        )));
    }

    if config.egress.default_retry_after_secs > config.egress.max_retry_after_secs {
        errors.push(ConfigError::validation(format!(
            "egress.default_retry_after_secs ({}) must not exceed egress.max_retry_after_secs ({})",
            config.egress.default_retry_after_secs, config.egress.max_retry_after_secs
        )));
    }

    if config.egress.request_timeout_secs == 0 {
        errors.push(ConfigError::validation(
            "egress.request_timeout_secs must be at least 1",
        ));
    }

    if config.egress.queue_capacity == 0 {
        errors.push(ConfigError::validation("egress.queue_capacity must be at least 1"));
    }

    if config.media.max_bytes == 0 {
        errors.push(ConfigError::validation("media.max_bytes must be positive"));
    }

    if config.media.default_folder.trim_matches('/').is_empty() {
        errors.push(ConfigError::validation("media.default_folder must not be empty"));
    }

    let store = &config.object_store;
    if store.is_configured() {
        let required = [
            ("object_store.endpoint", &store.endpoint),
            ("object_store.bucket", &store.bucket),
            ("object_store.access_key_id", &store.access_key_id),
            ("object_store.secret_access_key", &store.secret_access_key),
            ("object_store.public_base_url", &store.public_base_url),
        ];
        for (key, value) in required {
            if value.as_deref().is_none_or(|v| v.trim().is_empty()) {
                errors.push(ConfigError::validation(format!(
                    "{key} is required once object storage is configured"
                )));
            }
        }
        if let Some(endpoint) = &store.endpoint {
            validate_url("object_store.endpoint", endpoint, &mut errors);
        }
        if let Some(public) = &store.public_base_url {
            validate_url("object_store.public_base_url", public, &mut errors);
        }
    }

    if let Some(cc) = &config.adapter.default_country_code
        && (cc.is_empty() || cc.len() > 3 || !cc.chars().all(|c| c.is_ascii_digit()))
    {
        errors.push(ConfigError::validation(format!(
            "adapter.default_country_code must be 1-3 digits without `+`, got `{cc}`"
        )));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_url(key: &str, value: &str, errors: &mut Vec<ConfigError>) {
    let value = value.trim();
    if !(value.starts_with("https://") || value.starts_with("http://")) {
        errors.push(ConfigError::validation(format!(
            "{key} must be an http(s) URL, got `{value}`"
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&ParleyConfig::default()).is_ok());
    }

    #[test]
    fn all_errors_are_collected() {
        let mut config = ParleyConfig::default();
        config.storage.turn_pool_size = 0;
        config.egress.queue_capacity = 0;
        config.egress.base_url = "ftp://nope".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn busy_timeout_must_cover_media_work() {
        let mut config = ParleyConfig::default();
        config.storage.busy_timeout_ms = 5_000;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors[0].to_string().contains("busy_timeout_ms"));
    }

    #[test]
    fn partial_object_store_is_rejected() {
        let mut config = ParleyConfig::default();
        config.object_store.bucket = Some("media".into());
        let errors = validate_config(&config).unwrap_err();
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        assert!(messages.iter().any(|m| m.contains("object_store.endpoint")));
        assert!(messages.iter().any(|m| m.contains("object_store.secret_access_key")));
        assert!(!messages.iter().any(|m| m.contains("object_store.bucket")));
    }

    #[test]
    fn throttle_cap_is_bounded() {
        let mut config = ParleyConfig::default();
        config.egress.max_retry_after_secs = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.to_string().contains("max_retry_after_secs")));

        config.egress.max_retry_after_secs = 86_400;
        assert!(validate_config(&config).is_err());

        config.egress.max_retry_after_secs = 3;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors[0].to_string().contains("default_retry_after_secs"));
    }

    #[test]
    fn country_code_must_be_digits() {
        let mut config = ParleyConfig::default();
        config.adapter.default_country_code = Some("+52".into());
        assert!(validate_config(&config).is_err());
        config.adapter.default_country_code = Some("52".into());
        assert!(validate_config(&config).is_ok());
    }
}
