// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! External API step trait.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::FlowlineError;
use crate::traits::adapter::PluginAdapter;

/// A resolved call for one `api` node execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: String,
    pub url: String,
    pub params: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// Raw response of an external call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs the HTTP call behind an `api` flow node.
#[async_trait]
pub trait ApiCaller: PluginAdapter {
    async fn call(&self, request: &ApiRequest) -> Result<ApiResponse, FlowlineError>;
}
