// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP implementation of [`ApiCaller`] for `api` flow nodes.

use async_trait::async_trait;
use flowline_core::traits::{ApiRequest, ApiResponse};
use flowline_core::{AdapterType, ApiCaller, FlowlineError, HealthStatus, PluginAdapter};
use reqwest::{Method, Url};
use tracing::debug;

/// Calls node-configured endpoints. `GET` and `DELETE` send parameters as
/// a query string; other methods send them as a JSON object.
#[derive(Debug, Clone)]
pub struct HttpApiCaller {
    client: reqwest::Client,
}

impl HttpApiCaller {
    pub fn new() -> Result<Self, FlowlineError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| FlowlineError::Provider {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PluginAdapter for HttpApiCaller {
    fn name(&self) -> &str {
        "http-api"
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
impl ApiCaller for HttpApiCaller {
    async fn call(&self, request: &ApiRequest) -> Result<ApiResponse, FlowlineError> {
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes()).map_err(
            |e| FlowlineError::Provider {
                message: format!("invalid HTTP method `{}`", request.method),
                source: Some(Box::new(e)),
            },
        )?;

        let mut url = Url::parse(&request.url).map_err(|e| FlowlineError::Provider {
            message: format!("invalid API url `{}`", request.url),
            source: Some(Box::new(e)),
        })?;
        let in_query = method == Method::GET || method == Method::DELETE;
        if in_query && !request.params.is_empty() {
            url.query_pairs_mut().extend_pairs(request.params.iter());
        }

        let builder = self
            .client
            .request(method, url)
            .timeout(request.timeout);
        let builder = if in_query {
            builder
        } else {
            builder.json(&request.params)
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                FlowlineError::Timeout {
                    duration: request.timeout,
                }
            } else {
                FlowlineError::Provider {
                    message: format!("API request to {} failed: {e}", request.url),
                    source: Some(Box::new(e)),
                }
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        debug!(url = %request.url, status, "api step response");
        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(method: &str, url: String) -> ApiRequest {
        ApiRequest {
            method: method.into(),
            url,
            params: BTreeMap::from([("phone".to_string(), "15550001".to_string())]),
            timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn get_sends_query_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/points"))
            .and(query_param("phone", "15550001"))
            .respond_with(ResponseTemplate::new(200).set_body_string("42"))
            .mount(&server)
            .await;

        let caller = HttpApiCaller::new().unwrap();
        let resp = caller
            .call(&request("get", format!("{}/points", server.uri())))
            .await
            .unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.body, "42");
    }

    #[tokio::test]
    async fn post_sends_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/optin"))
            .and(body_json(serde_json::json!({"phone": "15550001"})))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let caller = HttpApiCaller::new().unwrap();
        let resp = caller
            .call(&request("POST", format!("{}/optin", server.uri())))
            .await
            .unwrap();
        assert_eq!(resp.status, 201);
    }

    #[tokio::test]
    async fn non_2xx_is_returned_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let caller = HttpApiCaller::new().unwrap();
        let resp = caller.call(&request("GET", server.uri())).await.unwrap();
        assert!(!resp.is_success());
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let caller = HttpApiCaller::new().unwrap();
        let mut req = request("GET", server.uri());
        req.timeout = Duration::from_millis(200);
        let err = caller.call(&req).await.unwrap_err();
        assert!(matches!(err, FlowlineError::Timeout { .. }));
    }
}
