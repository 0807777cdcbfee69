// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./flowline.toml` > `~/.config/flowline/flowline.toml` >
//! `/etc/flowline/flowline.toml` with environment variable overrides via `FLOWLINE_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::FlowlineConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/flowline/flowline.toml` (system-wide)
/// 3. `~/.config/flowline/flowline.toml` (user XDG config)
/// 4. `./flowline.toml` (local directory)
/// 5. `FLOWLINE_*` environment variables
pub fn load_config() -> Result<FlowlineConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used by tests.
pub fn load_config_from_str(toml_content: &str) -> Result<FlowlineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FlowlineConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<FlowlineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FlowlineConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used for XDG config loading.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(FlowlineConfig::default()))
        .merge(Toml::file("/etc/flowline/flowline.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("flowline/flowline.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("flowline.toml"))
        .merge(env_provider())
}

/// Map `FLOWLINE_<SECTION>_<KEY>` to `section.key`.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names contain
/// underscores: `FLOWLINE_DELIVERY_MAX_RETRIES` must become
/// `delivery.max_retries`, not `delivery.max.retries`.
fn env_provider() -> Env {
    Env::prefixed("FLOWLINE_").map(|key| {
        let key_str = key.as_str();
        let mapped = [
            "service", "storage", "engine", "delivery", "jobs", "whatsapp", "gateway",
        ]
        .iter()
        .find_map(|section| {
            key_str
                .strip_prefix(section)
                .and_then(|rest| rest.strip_prefix('_'))
                .map(|rest| format!("{section}.{rest}"))
        })
        .unwrap_or_else(|| key_str.to_string());
        mapped.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn env_overrides_nested_keys() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("FLOWLINE_DELIVERY_MAX_RETRIES", "7");
            jail.set_env("FLOWLINE_WHATSAPP_VERIFY_TOKEN", "hub-secret");
            let config: FlowlineConfig = Figment::new()
                .merge(Serialized::defaults(FlowlineConfig::default()))
                .merge(env_provider())
                .extract()?;
            assert_eq!(config.delivery.max_retries, 7);
            assert_eq!(config.whatsapp.verify_token.as_deref(), Some("hub-secret"));
            Ok(())
        });
    }
}
