// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP gateway for Flowline.
//!
//! Receives WhatsApp webhooks and feeds them to the [`FlowEngine`], and
//! exposes bearer-protected operator routes for session pause, resume and
//! cancel.
//!
//! [`FlowEngine`]: flowline_engine::FlowEngine

pub mod auth;
pub mod handlers;
pub mod server;

use flowline_config::model::{GatewayConfig, WhatsAppConfig};

pub use auth::AuthConfig;
pub use server::{router, start_server, GatewayState, ServerConfig, WebhookConfig};

impl From<&GatewayConfig> for ServerConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
        }
    }
}

impl From<&WhatsAppConfig> for WebhookConfig {
    fn from(config: &WhatsAppConfig) -> Self {
        Self {
            app_secret: config.app_secret.clone(),
            verify_token: config.verify_token.clone(),
            phone_number_id: config.phone_number_id.clone(),
        }
    }
}
