// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Flowline engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Flowline configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FlowlineConfig {
    /// Service identity and logging.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Flow execution and session lifecycle settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Delivery retry and backoff settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Scheduled job intervals.
    #[serde(default)]
    pub jobs: JobsConfig,

    /// WhatsApp Cloud API credentials.
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,

    /// HTTP gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Display name used in logs and health output.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
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
    "flowline".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("flowline").join("flowline.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("flowline.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Flow execution and session lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Minutes of inactivity after which an ACTIVE session expires.
    #[serde(default = "default_idle_window_mins")]
    pub idle_window_mins: u64,

    /// Maximum automatic node transitions within one turn.
    #[serde(default = "default_hop_limit")]
    pub hop_limit: u32,

    /// Reply used when no keyword matches and no session is active, or when
    /// a flow has no usable fallback node.
    #[serde(default = "default_fallback_text")]
    pub fallback_text: String,

    /// Timeout for external API steps, in seconds.
    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,

    /// Minutes of inactivity before a feedback nudge is sent.
    #[serde(default = "default_feedback_prompt_after_mins")]
    pub feedback_prompt_after_mins: u64,

    /// Minutes after a nudge with no reply before the session is discarded.
    #[serde(default = "default_feedback_discard_after_mins")]
    pub feedback_discard_after_mins: u64,

    /// Text of the feedback nudge.
    #[serde(default = "default_feedback_text")]
    pub feedback_text: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_window_mins: default_idle_window_mins(),
            hop_limit: default_hop_limit(),
            fallback_text: default_fallback_text(),
            api_timeout_secs: default_api_timeout_secs(),
            feedback_prompt_after_mins: default_feedback_prompt_after_mins(),
            feedback_discard_after_mins: default_feedback_discard_after_mins(),
            feedback_text: default_feedback_text(),
        }
    }
}

fn default_idle_window_mins() -> u64 {
    120
}

fn default_hop_limit() -> u32 {
    10
}

fn default_fallback_text() -> String {
    "Sorry, I didn't catch that. Reply with a keyword to get started.".to_string()
}

fn default_api_timeout_secs() -> u64 {
    10
}

fn default_feedback_prompt_after_mins() -> u64 {
    60
}

fn default_feedback_discard_after_mins() -> u64 {
    30
}

fn default_feedback_text() -> String {
    "Are you still there? Reply to continue where you left off.".to_string()
}

/// Delivery retry and backoff configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DeliveryConfig {
    /// Failed attempts after which a delivery is dead-lettered.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Maximum attempts picked up per retry scan.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Backoff after the first failure, in seconds. Doubles per failure.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Upper bound on a single backoff delay, in seconds.
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,

    /// Timeout for one provider send, in seconds.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// How long a `retrying` lease is honoured before it is reclaimed.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            batch_size: default_batch_size(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            lease_secs: default_lease_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}

fn default_batch_size() -> u32 {
    50
}

fn default_backoff_base_secs() -> u64 {
    120
}

fn default_backoff_cap_secs() -> u64 {
    3600
}

fn default_send_timeout_secs() -> u64 {
    15
}

fn default_lease_secs() -> u64 {
    120
}

/// Scheduled job configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct JobsConfig {
    /// Run the background jobs inside `flowline serve`.
    #[serde(default = "default_jobs_enabled")]
    pub enabled: bool,

    #[serde(default = "default_expiry_interval_secs")]
    pub expiry_interval_secs: u64,

    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,

    #[serde(default = "default_campaign_interval_secs")]
    pub campaign_interval_secs: u64,

    #[serde(default = "default_feedback_interval_secs")]
    pub feedback_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: default_jobs_enabled(),
            expiry_interval_secs: default_expiry_interval_secs(),
            retry_interval_secs: default_retry_interval_secs(),
            campaign_interval_secs: default_campaign_interval_secs(),
            feedback_interval_secs: default_feedback_interval_secs(),
        }
    }
}

fn default_jobs_enabled() -> bool {
    true
}

fn default_expiry_interval_secs() -> u64 {
    60
}

fn default_retry_interval_secs() -> u64 {
    60
}

fn default_campaign_interval_secs() -> u64 {
    60
}

fn default_feedback_interval_secs() -> u64 {
    300
}

/// WhatsApp Cloud API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WhatsAppConfig {
    /// Permanent or system-user access token.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Sending phone number id.
    #[serde(default)]
    pub phone_number_id: Option<String>,

    /// App secret for `X-Hub-Signature-256` verification. Unset skips the check.
    #[serde(default)]
    pub app_secret: Option<String>,

    /// Token echoed back during webhook verification.
    #[serde(default)]
    pub verify_token: Option<String>,

    /// Graph API base URL, including the version segment.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            phone_number_id: None,
            app_secret: None,
            verify_token: None,
            api_base_url: default_api_base_url(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://graph.facebook.com/v21.0".to_string()
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Serve the webhook and operator routes.
    #[serde(default = "default_gateway_enabled")]
    pub enabled: bool,

    #[serde(default = "default_gateway_host")]
    pub host: String,

    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bearer token for operator routes. Unset rejects them all.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: default_gateway_enabled(),
            host: default_gateway_host(),
            port: default_gateway_port(),
            bearer_token: None,
        }
    }
}

fn default_gateway_enabled() -> bool {
    true
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    8080
}
