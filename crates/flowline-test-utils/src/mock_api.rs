// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock API caller for `api` flow nodes.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use flowline_core::traits::{ApiRequest, ApiResponse};
use flowline_core::types::{AdapterType, HealthStatus};
use flowline_core::{ApiCaller, FlowlineError, PluginAdapter};

/// Records every request and answers from a FIFO script. An empty script
/// answers `200 {}`.
pub struct MockApiCaller {
    responses: Mutex<VecDeque<Result<ApiResponse, FlowlineError>>>,
    calls: Mutex<Vec<ApiRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl MockApiCaller {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        }
    }

    pub fn push_status(&self, status: u16, body: &str) {
        self.push(Ok(ApiResponse {
            status,
            body: body.to_string(),
        }));
    }

    pub fn push(&self, response: Result<ApiResponse, FlowlineError>) {
        self.responses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(response);
    }

    /// Hold every call for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(|p| p.into_inner()) = Some(delay);
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl Default for MockApiCaller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockApiCaller {
    fn name(&self) -> &str {
        "mock-api"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::ApiCaller
    }

    async fn health_check(&self) -> Result<HealthStatus, FlowlineError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), FlowlineError> {
        Ok(())
    }
}

#[async_trait]
impl ApiCaller for MockApiCaller {
    async fn call(&self, request: &ApiRequest) -> Result<ApiResponse, FlowlineError> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request.clone());
        let delay = *self.delay.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self
            .responses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        scripted.unwrap_or_else(|| {
            Ok(ApiResponse {
                status: 200,
                body: "{}".to_string(),
            })
        })
    }
}
