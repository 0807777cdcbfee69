// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock messaging provider for deterministic testing.
//!
//! `MockProvider` implements `MessagingProvider` with scripted send outcomes,
//! enabling fast, CI-runnable tests without WhatsApp API calls.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use flowline_core::types::{
    AdapterType, DeliveryFailure, DeliveryReceipt, HealthStatus, OutboundPayload,
};
use flowline_core::{FlowlineError, MessagingProvider, PluginAdapter};

type Outcome = Result<DeliveryReceipt, DeliveryFailure>;

/// A mock provider that records every send.
///
/// Outcomes are popped from a FIFO queue. When the queue is empty the send
/// succeeds with a generated provider message id.
pub struct MockProvider {
    outcomes: Mutex<VecDeque<Outcome>>,
    sent: Mutex<Vec<(String, OutboundPayload)>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Queue the result of a future send.
    pub fn push_outcome(&self, outcome: Outcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(outcome);
    }

    /// Every `(recipient, payload)` passed to `send`, failures included.
    pub fn sent(&self) -> Vec<(String, OutboundPayload)> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Text bodies sent to one recipient, in order.
    pub fn texts_to(&self, recipient: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| to == recipient)
            .filter_map(|(_, payload)| match payload {
                OutboundPayload::Text { body } => Some(body),
                OutboundPayload::Template { .. } => None,
            })
            .collect()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockProvider {
    fn name(&self) -> &str {
        "mock-provider"
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
impl MessagingProvider for MockProvider {
    async fn send(
        &self,
        recipient: &str,
        payload: &OutboundPayload,
    ) -> Result<DeliveryReceipt, DeliveryFailure> {
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((recipient.to_string(), payload.clone()));
        let scripted = self
            .outcomes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        scripted.unwrap_or_else(|| {
            Ok(DeliveryReceipt {
                provider_message_id: Some(format!("wamid.{}", uuid::Uuid::new_v4().simple())),
            })
        })
    }
}
