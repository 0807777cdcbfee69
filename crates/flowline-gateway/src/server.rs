// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use flowline_core::FlowlineError;
use flowline_engine::{FlowEngine, SessionLifecycle};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{auth_middleware, AuthConfig};
use crate::handlers;

/// WhatsApp webhook settings.
#[derive(Clone, Default)]
pub struct WebhookConfig {
    /// HMAC key for `X-Hub-Signature-256`. `None` skips the check.
    pub app_secret: Option<String>,
    /// Token expected in the subscription handshake.
    pub verify_token: Option<String>,
    /// Only accept changes addressed to this number.
    pub phone_number_id: Option<String>,
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("app_secret", &self.app_secret.as_ref().map(|_| "[redacted]"))
            .field("verify_token", &self.verify_token.as_ref().map(|_| "[redacted]"))
            .field("phone_number_id", &self.phone_number_id)
            .finish()
    }
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub engine: Arc<FlowEngine>,
    pub lifecycle: Arc<SessionLifecycle>,
    pub webhook: WebhookConfig,
    /// Authentication for the operator routes.
    pub auth: AuthConfig,
    /// Process start time for uptime reporting.
    pub start_time: std::time::Instant,
}

/// Gateway server configuration (mirrors GatewayConfig from flowline-config).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Build the application router.
///
/// - GET /health (public)
/// - GET, POST /webhook (signature-checked, not bearer-authenticated)
/// - GET /v1/sessions/{id}, POST /v1/sessions/{id}/{pause|resume|cancel} (bearer)
pub fn router(state: GatewayState) -> Router {
    let auth_state = state.auth.clone();

    let public_routes = Router::new()
        .route("/health", get(handlers::get_health))
        .route(
            "/webhook",
            get(handlers::verify_webhook).post(handlers::receive_webhook),
        )
        .with_state(state.clone());

    let api_routes = Router::new()
        .route("/v1/sessions/{id}", get(handlers::get_session))
        .route("/v1/sessions/{id}/pause", post(handlers::pause_session))
        .route("/v1/sessions/{id}/resume", post(handlers::resume_session))
        .route("/v1/sessions/{id}/cancel", post(handlers::cancel_session))
        .route_layer(axum_middleware::from_fn_with_state(
            auth_state,
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve until `cancel` fires, then finish in-flight requests.
pub async fn start_server(
    config: &ServerConfig,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), FlowlineError> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| FlowlineError::Provider {
            message: format!("failed to bind gateway to {addr}: {e}"),
            source: Some(Box::new(e)),
        })?;

    tracing::info!("Gateway server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| FlowlineError::Provider {
            message: format!("gateway server error: {e}"),
            source: Some(Box::new(e)),
        })?;

    tracing::info!("Gateway server stopped");
    Ok(())
}
