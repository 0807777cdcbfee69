// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Flowline engine.
//!
//! This crate provides the foundational trait definitions, error types, flow
//! graph model, and common types used throughout the Flowline workspace.

pub mod clock;
pub mod error;
pub mod flow;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use clock::{format_ts, parse_ts, Clock, SystemClock};
pub use error::FlowlineError;
pub use flow::{normalize_input, FlowDefinition, FlowNode, NodeKind};
pub use types::{AdapterType, DeliveryStatus, HealthStatus, SessionStatus};

// Re-export all adapter traits at crate root.
pub use traits::{ApiCaller, MessagingProvider, PluginAdapter, StorageAdapter};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flowline_error_has_all_variants() {
        let _config = FlowlineError::Config("test".into());
        let _storage = FlowlineError::Storage {
            source: Box::new(std::io::Error::other("test")),
        };
        let _flow = FlowlineError::FlowDefinition {
            flow_id: "f".into(),
            message: "test".into(),
        };
        let _not_found = FlowlineError::NotFound {
            entity: "session",
            id: "s".into(),
        };
        let _transition = FlowlineError::InvalidTransition {
            entity: "session",
            from: "EXPIRED".into(),
            to: "ACTIVE".into(),
        };
        let _conflict = FlowlineError::Conflict("test".into());
        let _provider = FlowlineError::Provider {
            message: "test".into(),
            source: None,
        };
        let _timeout = FlowlineError::Timeout {
            duration: std::time::Duration::from_secs(30),
        };
        let _internal = FlowlineError::Internal("test".into());
    }

    #[test]
    fn adapter_type_round_trips() {
        use std::str::FromStr;

        for variant in [
            AdapterType::Provider,
            AdapterType::Storage,
            AdapterType::ApiCaller,
        ] {
            let s = variant.to_string();
            assert_eq!(AdapterType::from_str(&s).unwrap(), variant);
        }
    }

    #[test]
    fn health_status_variants() {
        let healthy = HealthStatus::Healthy;
        let degraded = HealthStatus::Degraded("slow".into());
        let unhealthy = HealthStatus::Unhealthy("down".into());

        assert_eq!(healthy, HealthStatus::Healthy);
        assert_ne!(degraded, healthy);
        assert_ne!(unhealthy, healthy);
    }

    #[test]
    fn all_trait_modules_are_exported() {
        fn _assert_plugin_adapter<T: PluginAdapter>() {}
        fn _assert_provider<T: MessagingProvider>() {}
        fn _assert_api_caller<T: ApiCaller>() {}
        fn _assert_storage_adapter<T: StorageAdapter>() {}
    }
}
