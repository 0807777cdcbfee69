// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WhatsApp Cloud API adapter for Flowline.
//!
//! [`WhatsAppProvider`] implements `MessagingProvider` for outbound sends.
//! The [`webhook`] module verifies and parses inbound webhook deliveries.

pub mod provider;
pub mod webhook;

pub use provider::WhatsAppProvider;
pub use webhook::{parse_webhook, verify_signature, verify_subscription, SIGNATURE_HEADER};
