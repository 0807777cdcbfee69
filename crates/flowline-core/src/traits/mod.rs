// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter trait definitions.
//!
//! All adapters extend the [`PluginAdapter`] base trait and use
//! `#[async_trait]` for dynamic dispatch compatibility.

pub mod adapter;
pub mod api;
pub mod provider;
pub mod storage;

pub use adapter::PluginAdapter;
pub use api::{ApiCaller, ApiRequest, ApiResponse};
pub use provider::MessagingProvider;
pub use storage::StorageAdapter;
