// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as non-empty paths, ordered time windows, and non-zero intervals.

use crate::diagnostic::ConfigError;
use crate::model::FlowlineConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &FlowlineConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    let engine = &config.engine;
    if engine.idle_window_mins == 0 {
        fail("engine.idle_window_mins must be at least 1".to_string());
    }
    if engine.hop_limit == 0 {
        fail("engine.hop_limit must be at least 1".to_string());
    }
    if engine.fallback_text.trim().is_empty() {
        fail("engine.fallback_text must not be empty".to_string());
    }
    if engine.api_timeout_secs == 0 {
        fail("engine.api_timeout_secs must be at least 1".to_string());
    }
    if engine.feedback_prompt_after_mins >= engine.idle_window_mins {
        fail(format!(
            "engine.feedback_prompt_after_mins ({}) must be shorter than engine.idle_window_mins ({})",
            engine.feedback_prompt_after_mins, engine.idle_window_mins
        ));
    }

    let delivery = &config.delivery;
    if delivery.max_retries == 0 {
        fail("delivery.max_retries must be at least 1".to_string());
    }
    if delivery.batch_size == 0 {
        fail("delivery.batch_size must be at least 1".to_string());
    }
    if delivery.backoff_base_secs == 0 {
        fail("delivery.backoff_base_secs must be at least 1".to_string());
    }
    if delivery.backoff_cap_secs < delivery.backoff_base_secs {
        fail(format!(
            "delivery.backoff_cap_secs ({}) must not be below delivery.backoff_base_secs ({})",
            delivery.backoff_cap_secs, delivery.backoff_base_secs
        ));
    }
    if delivery.send_timeout_secs == 0 {
        fail("delivery.send_timeout_secs must be at least 1".to_string());
    }
    if delivery.lease_secs <= delivery.send_timeout_secs {
        fail(format!(
            "delivery.lease_secs ({}) must exceed delivery.send_timeout_secs ({})",
            delivery.lease_secs, delivery.send_timeout_secs
        ));
    }

    for (name, value) in [
        ("expiry_interval_secs", config.jobs.expiry_interval_secs),
        ("retry_interval_secs", config.jobs.retry_interval_secs),
        ("campaign_interval_secs", config.jobs.campaign_interval_secs),
        ("feedback_interval_secs", config.jobs.feedback_interval_secs),
    ] {
        if value == 0 {
            fail(format!("jobs.{name} must be at least 1"));
        }
    }

    if config.gateway.host.trim().is_empty() {
        fail("gateway.host must not be empty".to_string());
    }

    if config.whatsapp.access_token.is_some() != config.whatsapp.phone_number_id.is_some() {
        fail("whatsapp.access_token and whatsapp.phone_number_id must be set together".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_error(errors: &[ConfigError], needle: &str) -> bool {
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains(needle)))
    }

    #[test]
    fn default_config_validates() {
        let config = FlowlineConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_database_path_fails_validation() {
        let mut config = FlowlineConfig::default();
        config.storage.database_path = "".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "database_path"));
    }

    #[test]
    fn zero_hop_limit_fails_validation() {
        let mut config = FlowlineConfig::default();
        config.engine.hop_limit = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "hop_limit"));
    }

    #[test]
    fn feedback_window_must_precede_expiry() {
        let mut config = FlowlineConfig::default();
        config.engine.feedback_prompt_after_mins = 120;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "feedback_prompt_after_mins"));
    }

    #[test]
    fn backoff_cap_below_base_fails() {
        let mut config = FlowlineConfig::default();
        config.delivery.backoff_base_secs = 600;
        config.delivery.backoff_cap_secs = 60;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "backoff_cap_secs"));
    }

    #[test]
    fn collects_every_error() {
        let mut config = FlowlineConfig::default();
        config.delivery.max_retries = 0;
        config.jobs.retry_interval_secs = 0;
        config.whatsapp.access_token = Some("token".into());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
