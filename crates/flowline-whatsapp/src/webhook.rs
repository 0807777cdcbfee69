// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound webhook handling: signature check, subscription handshake, and
//! extraction of text-bearing messages.

use chrono::DateTime;
use flowline_core::format_ts;
use flowline_core::types::InboundMessage;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

/// Header carrying the `sha256=<hex>` body signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    #[serde(default)]
    value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    metadata: Option<Metadata>,
    /// Absent on delivery status callbacks.
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(default)]
    phone_number_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: String,
    from: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<TextBody>,
    #[serde(default)]
    button: Option<ButtonBody>,
    #[serde(default)]
    interactive: Option<Interactive>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    body: String,
}

#[derive(Debug, Deserialize)]
struct ButtonBody {
    text: String,
}

#[derive(Debug, Deserialize)]
struct Interactive {
    #[serde(default)]
    button_reply: Option<Reply>,
    #[serde(default)]
    list_reply: Option<Reply>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    title: String,
}

impl RawMessage {
    /// Text of the message, if it carries any we can route on.
    fn text(&self) -> Option<String> {
        let text = match self.kind.as_str() {
            "text" => self.text.as_ref().map(|t| t.body.as_str()),
            "button" => self.button.as_ref().map(|b| b.text.as_str()),
            "interactive" => self.interactive.as_ref().and_then(|i| {
                i.button_reply
                    .as_ref()
                    .or(i.list_reply.as_ref())
                    .map(|r| r.title.as_str())
            }),
            _ => None,
        }?;
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// Extract inbound messages from a webhook body.
///
/// Status callbacks and media without text are skipped. When
/// `phone_number_id` is set, changes addressed to other numbers are skipped.
pub fn parse_webhook(
    body: &[u8],
    phone_number_id: Option<&str>,
) -> Result<Vec<InboundMessage>, serde_json::Error> {
    let envelope: Envelope = serde_json::from_slice(body)?;
    let mut out = Vec::new();

    for change in envelope.entry.into_iter().flat_map(|e| e.changes) {
        let target = change
            .value
            .metadata
            .as_ref()
            .and_then(|m| m.phone_number_id.as_deref());
        if let (Some(expected), Some(actual)) = (phone_number_id, target) {
            if expected != actual {
                debug!(expected, actual, "webhook change for another number skipped");
                continue;
            }
        }

        for message in change.value.messages {
            let Some(text) = message.text() else {
                debug!(provider_message_id = %message.id, kind = %message.kind, "non-text message skipped");
                continue;
            };
            let received_at = message
                .timestamp
                .as_deref()
                .and_then(|t| t.parse::<i64>().ok())
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .map(format_ts);
            out.push(InboundMessage {
                provider_message_id: message.id,
                contact_id: message.from,
                text,
                received_at,
            });
        }
    }

    Ok(out)
}

/// Check an `X-Hub-Signature-256` header against the raw body.
pub fn verify_signature(app_secret: &str, header: Option<&str>, body: &[u8]) -> bool {
    let Some(signature) = header.map(str::trim) else {
        return false;
    };
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Answer the `hub.mode=subscribe` handshake. Returns the challenge to echo
/// when the token matches.
pub fn verify_subscription<'a>(
    expected_token: Option<&str>,
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&'a str>,
) -> Option<&'a str> {
    match (expected_token, mode, token, challenge) {
        (Some(expected), Some("subscribe"), Some(token), Some(challenge))
            if !expected.is_empty() && expected == token =>
        {
            Some(challenge)
        }
        _ => None,
    }
}

/// `sha256=<hex>` signature of `body`, as the provider would send it.
pub fn sign(app_secret: &str, body: &[u8]) -> String {
    let mut mac = match Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length.
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
