// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Flowline engine.

use thiserror::Error;

/// The primary error type used across all Flowline adapter traits and core operations.
#[derive(Debug, Error)]
pub enum FlowlineError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A flow graph is malformed or references a node that does not exist.
    #[error("flow `{flow_id}` is invalid: {message}")]
    FlowDefinition { flow_id: String, message: String },

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A state machine rejected the requested transition.
    #[error("invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// A write collided with a uniqueness rule or a concurrent writer.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Messaging provider or external API errors.
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for FlowlineError {
    fn from(e: serde_json::Error) -> Self {
        FlowlineError::Storage {
            source: Box::new(e),
        }
    }
}
