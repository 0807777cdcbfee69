// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound sends through the WhatsApp Cloud API.

use async_trait::async_trait;
use flowline_config::model::WhatsAppConfig;
use flowline_core::types::{
    AdapterType, DeliveryFailure, DeliveryReceipt, HealthStatus, OutboundPayload,
};
use flowline_core::{FlowlineError, MessagingProvider, PluginAdapter};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// Sends text and template messages from one business phone number.
///
/// One HTTP request per call. Failures are classified for the dispatcher:
/// network errors, 408, 429 and 5xx are transient, every other rejection
/// is permanent.
#[derive(Debug, Clone)]
pub struct WhatsAppProvider {
    client: reqwest::Client,
    messages_url: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

impl WhatsAppProvider {
    pub fn new(config: &WhatsAppConfig) -> Result<Self, FlowlineError> {
        let access_token = config
            .access_token
            .clone()
            .ok_or_else(|| FlowlineError::Config("whatsapp.access_token is not set".into()))?;
        let phone_number_id = config
            .phone_number_id
            .as_deref()
            .ok_or_else(|| FlowlineError::Config("whatsapp.phone_number_id is not set".into()))?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| FlowlineError::Provider {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            messages_url: format!(
                "{}/{phone_number_id}/messages",
                config.api_base_url.trim_end_matches('/')
            ),
            access_token,
        })
    }
}

/// Cloud API request body for one payload.
fn request_body(recipient: &str, payload: &OutboundPayload) -> Value {
    match payload {
        OutboundPayload::Text { body } => json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": recipient,
            "type": "text",
            "text": { "preview_url": false, "body": body },
        }),
        OutboundPayload::Template {
            name,
            language,
            params,
        } => {
            let mut template = json!({
                "name": name,
                "language": { "code": language },
            });
            if !params.is_empty() {
                let parameters: Vec<Value> = params
                    .iter()
                    .map(|p| json!({ "type": "text", "text": p }))
                    .collect();
                template["components"] = json!([{ "type": "body", "parameters": parameters }]);
            }
            json!({
                "messaging_product": "whatsapp",
                "to": recipient,
                "type": "template",
                "template": template,
            })
        }
    }
}

fn classify(status: StatusCode, body: &str) -> DeliveryFailure {
    let message = format!("HTTP {}: {}", status.as_u16(), body.trim());
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        DeliveryFailure::transient(message)
    } else {
        DeliveryFailure::permanent(message)
    }
}

#[async_trait]
impl PluginAdapter for WhatsAppProvider {
    fn name(&self) -> &str {
        "whatsapp"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Provider
    }

    async fn health_check(&self) -> Result<HealthStatus, FlowlineError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), FlowlineError> {
        Ok(())
    }
}

#[async_trait]
impl MessagingProvider for WhatsAppProvider {
    async fn send(
        &self,
        recipient: &str,
        payload: &OutboundPayload,
    ) -> Result<DeliveryReceipt, DeliveryFailure> {
        let response = self
            .client
            .post(&self.messages_url)
            .bearer_auth(&self.access_token)
            .json(&request_body(recipient, payload))
            .send()
            .await
            .map_err(|e| DeliveryFailure::transient(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify(status, &body));
        }

        let provider_message_id = serde_json::from_str::<SendResponse>(&body)
            .ok()
            .and_then(|r| r.messages.into_iter().next())
            .map(|m| m.id);
        debug!(recipient, ?provider_message_id, "whatsapp message accepted");
        Ok(DeliveryReceipt {
            provider_message_id,
        })
    }
}
