// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the webhook and operator routes.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use flowline_core::types::Session;
use flowline_core::FlowlineError;
use flowline_whatsapp::{parse_webhook, verify_signature, verify_subscription, SIGNATURE_HEADER};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::server::GatewayState;

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Acknowledgement for POST /webhook.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    /// Text-bearing messages found in the payload.
    pub received: usize,
    /// Messages whose turn completed (duplicates included).
    pub processed: usize,
    pub failed: usize,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Map engine errors onto operator-facing status codes.
fn engine_error(e: FlowlineError) -> Response {
    let status = match &e {
        FlowlineError::NotFound { .. } => StatusCode::NOT_FOUND,
        FlowlineError::InvalidTransition { .. } | FlowlineError::Conflict(_) => StatusCode::CONFLICT,
        _ => {
            error!(error = %e, "operator request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, e.to_string())
}

/// GET /health
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /webhook
///
/// Subscription handshake: echoes `hub.challenge` when `hub.verify_token`
/// matches the configured token.
pub async fn verify_webhook(
    State(state): State<GatewayState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let challenge = verify_subscription(
        state.webhook.verify_token.as_deref(),
        params.get("hub.mode").map(String::as_str),
        params.get("hub.verify_token").map(String::as_str),
        params.get("hub.challenge").map(String::as_str),
    );
    match challenge {
        Some(challenge) => (StatusCode::OK, challenge.to_string()).into_response(),
        None => {
            warn!("webhook verification rejected");
            error_response(StatusCode::FORBIDDEN, "invalid webhook verification token")
        }
    }
}

/// POST /webhook
///
/// A bad signature is the only rejection. Anything else is acknowledged
/// with 200; per-message failures are logged and counted.
pub async fn receive_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = state.webhook.app_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if !verify_signature(secret, signature, &body) {
            warn!("webhook signature mismatch");
            return error_response(StatusCode::UNAUTHORIZED, "invalid webhook signature");
        }
    }

    let messages = match parse_webhook(&body, state.webhook.phone_number_id.as_deref()) {
        Ok(messages) => messages,
        Err(e) => {
            warn!(error = %e, "unparseable webhook body ignored");
            Vec::new()
        }
    };

    let mut ack = WebhookAck {
        received: messages.len(),
        processed: 0,
        failed: 0,
    };
    for msg in &messages {
        match state.engine.handle_inbound(msg).await {
            Ok(report) => {
                ack.processed += 1;
                debug!(
                    provider_message_id = %msg.provider_message_id,
                    kind = ?report.kind,
                    session_id = ?report.session_id,
                    "inbound turn handled"
                );
            }
            Err(e) => {
                ack.failed += 1;
                error!(
                    provider_message_id = %msg.provider_message_id,
                    contact_id = %msg.contact_id,
                    error = %e,
                    "inbound turn failed"
                );
            }
        }
    }

    (StatusCode::OK, Json(ack)).into_response()
}

fn session_response(result: Result<Session, FlowlineError>) -> Response {
    match result {
        Ok(session) => (StatusCode::OK, Json(session)).into_response(),
        Err(e) => engine_error(e),
    }
}

/// GET /v1/sessions/{id}
pub async fn get_session(State(state): State<GatewayState>, Path(id): Path<String>) -> Response {
    session_response(state.lifecycle.get(&id).await)
}

/// POST /v1/sessions/{id}/pause
pub async fn pause_session(State(state): State<GatewayState>, Path(id): Path<String>) -> Response {
    session_response(state.lifecycle.pause(&id).await)
}

/// POST /v1/sessions/{id}/resume
pub async fn resume_session(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Response {
    session_response(state.lifecycle.resume(&id).await)
}

/// POST /v1/sessions/{id}/cancel
pub async fn cancel_session(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Response {
    session_response(state.lifecycle.cancel(&id).await)
}
