// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Messaging provider trait for outbound delivery.

use async_trait::async_trait;

use crate::traits::adapter::PluginAdapter;
use crate::types::{DeliveryFailure, DeliveryReceipt, OutboundPayload};

/// Sends outbound payloads to a messaging network.
///
/// Implementations classify every failure as transient or permanent; the
/// dispatcher owns retries, so a provider makes exactly one attempt per call.
#[async_trait]
pub trait MessagingProvider: PluginAdapter {
    async fn send(
        &self,
        recipient: &str,
        payload: &OutboundPayload,
    ) -> Result<DeliveryReceipt, DeliveryFailure>;
}
