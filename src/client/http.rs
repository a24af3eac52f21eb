//! HTTP implementation of the remote client facade.
//!
//! Operations are sent as `POST {endpoint}/{operation}` with a JSON body and
//! answered with a JSON object. Failures are classified from the HTTP status
//! and, when present, the `code` field of the error body.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{ClientError, ConvergeError, Result};

use super::facade::RemoteClient;
use super::limiter::RateLimiter;
use super::types::{attributes_from_json, attributes_to_json, Attributes, Operation};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default sustained request rate.
const DEFAULT_REQUESTS_PER_SECOND: u32 = 10;

/// Default burst size.
const DEFAULT_BURST: u32 = 20;

/// HTTP control-plane client.
///
/// Cloning is cheap; clones share the connection pool and rate limiter.
#[derive(Debug, Clone)]
pub struct HttpClient {
    /// HTTP client.
    client: Client,
    /// Base URL of the control plane.
    endpoint: String,
    /// Bearer token.
    api_token: Option<String>,
    /// Shared rate limiter.
    limiter: Arc<RateLimiter>,
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    endpoint: String,
    api_token: Option<String>,
    timeout: Duration,
    requests_per_second: u32,
    burst: u32,
}

/// Error body returned by the control plane.
#[derive(Debug, Deserialize, Default)]
struct ErrorBody {
    #[serde(default, alias = "__type", alias = "error")]
    code: Option<String>,
    #[serde(default, alias = "Message")]
    message: Option<String>,
}

impl HttpClient {
    /// Starts building a client for the given endpoint.
    #[must_use]
    pub fn builder(endpoint: impl Into<String>) -> HttpClientBuilder {
        HttpClientBuilder {
            endpoint: endpoint.into(),
            api_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            burst: DEFAULT_BURST,
        }
    }

    /// Returns the configured endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Classifies a non-success response.
    fn classify(operation: &str, status: StatusCode, retry_after: Option<u64>, body: &str) -> ClientError {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
        let message = parsed
            .message
            .clone()
            .unwrap_or_else(|| body.trim().to_string());
        let operation = operation.to_string();

        // Provider error codes take precedence over the HTTP status.
        if let Some(code) = parsed.code.as_deref() {
            let code = code.rsplit('#').next().unwrap_or(code);
            match code {
                "ThrottlingException" | "TooManyRequestsException" | "RequestLimitExceeded" => {
                    return ClientError::Throttled {
                        operation,
                        message,
                        retry_after_secs: retry_after,
                    };
                }
                "ResourceNotFoundException" | "NotFoundException" => {
                    return ClientError::NotFound { operation, message };
                }
                "ConflictException" | "ResourceInUseException" | "ConcurrentModificationException" => {
                    return ClientError::Conflict { operation, message };
                }
                "ValidationException" | "InvalidParameterException" => {
                    return ClientError::InvalidInput { operation, message };
                }
                _ => {}
            }
        }

        match status.as_u16() {
            429 => ClientError::Throttled {
                operation,
                message,
                retry_after_secs: retry_after,
            },
            404 => ClientError::NotFound { operation, message },
            409 => ClientError::Conflict { operation, message },
            400 | 422 => ClientError::InvalidInput { operation, message },
            401 | 403 => ClientError::Fatal {
                operation,
                message: format!("authentication failed: {message}"),
            },
            500..=599 => ClientError::Transient { operation, message },
            _ => ClientError::Fatal { operation, message },
        }
    }
}

impl HttpClientBuilder {
    /// Sets the bearer token.
    #[must_use]
    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the rate limit.
    #[must_use]
    pub const fn rate_limit(mut self, requests_per_second: u32, burst: u32) -> Self {
        self.requests_per_second = requests_per_second;
        self.burst = burst;
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn build(self) -> Result<HttpClient> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ConvergeError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(HttpClient {
            client,
            endpoint: self.endpoint.trim_end_matches('/').to_string(),
            api_token: self.api_token,
            limiter: Arc::new(RateLimiter::new(self.requests_per_second, self.burst)),
        })
    }
}

#[async_trait]
impl RemoteClient for HttpClient {
    async fn invoke(
        &self,
        operation: &Operation,
        request: Attributes,
    ) -> std::result::Result<Attributes, ClientError> {
        self.limiter.acquire().await;

        let url = format!("{}/{}", self.endpoint, operation.name);
        if operation.is_mutation() {
            debug!("Invoking {} ({}) at {url}", operation.name, operation.kind);
        } else {
            trace!("Invoking {} ({}) at {url}", operation.name, operation.kind);
        }

        let mut builder = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&attributes_to_json(&request));

        if let Some(token) = &self.api_token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = builder.send().await.map_err(|e| {
            ClientError::transient(&operation.name, format!("Request failed: {e}"))
        })?;

        let status = response.status();
        debug!("{} returned {}", operation.name, status.as_u16());

        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify(&operation.name, status, retry_after, &body));
        }

        let body = response.text().await.map_err(|e| {
            ClientError::transient(&operation.name, format!("Failed to read response: {e}"))
        })?;

        if body.trim().is_empty() {
            return Ok(Attributes::new());
        }

        let json: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            ClientError::fatal(&operation.name, format!("Invalid response body: {e}"))
        })?;

        Ok(attributes_from_json(&json))
    }

    fn backend_type(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::types::{AttrValue, OperationKind};
    use wiremock::matchers::{header as header_match, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpClient {
        HttpClient::builder(server.uri())
            .api_token("secret")
            .rate_limit(100, 100)
            .build()
            .expect("client builds")
    }

    fn describe() -> Operation {
        Operation::new(OperationKind::Describe, "DescribeTable")
    }

    #[tokio::test]
    async fn test_success_returns_attributes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/DescribeTable"))
            .and(header_match("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "arn": "arn:table/orders",
                "status": "ACTIVE",
                "item_count": 7
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut request = Attributes::new();
        request.insert(String::from("arn"), AttrValue::from("arn:table/orders"));

        let response = client.invoke(&describe(), request).await.expect("call succeeds");
        assert_eq!(response["status"], AttrValue::from("ACTIVE"));
        assert_eq!(response["item_count"], AttrValue::Int(7));
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start().await;
        let cases = [
            ("/Throttle", ResponseTemplate::new(429).insert_header("retry-after", "7")),
            ("/Missing", ResponseTemplate::new(404)),
            ("/Busy", ResponseTemplate::new(409)),
            ("/Invalid", ResponseTemplate::new(422)),
            ("/Denied", ResponseTemplate::new(403)),
            ("/Broken", ResponseTemplate::new(503)),
        ];
        for (route, template) in cases {
            Mock::given(method("POST"))
                .and(path(route))
                .respond_with(template)
                .mount(&server)
                .await;
        }

        let client = client_for(&server);
        let call = |name: &'static str| {
            let client = client.clone();
            async move {
                client
                    .invoke(&Operation::new(OperationKind::Describe, name), Attributes::new())
                    .await
                    .expect_err("call fails")
            }
        };

        assert_eq!(
            call("Throttle").await,
            ClientError::Throttled {
                operation: String::from("Throttle"),
                message: String::new(),
                retry_after_secs: Some(7),
            }
        );
        assert!(matches!(call("Missing").await, ClientError::NotFound { .. }));
        assert!(matches!(call("Busy").await, ClientError::Conflict { .. }));
        assert!(matches!(call("Invalid").await, ClientError::InvalidInput { .. }));
        assert!(matches!(call("Denied").await, ClientError::Fatal { .. }));
        assert!(matches!(call("Broken").await, ClientError::Transient { .. }));
    }

    #[tokio::test]
    async fn test_error_code_overrides_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/DescribeTable"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "__type": "com.amazonaws.dynamodb#ResourceNotFoundException",
                "message": "Requested resource not found"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .invoke(&describe(), Attributes::new())
            .await
            .expect_err("call fails");

        assert_eq!(
            err,
            ClientError::NotFound {
                operation: String::from("DescribeTable"),
                message: String::from("Requested resource not found"),
            }
        );
    }

    #[tokio::test]
    async fn test_connection_failure_is_transient() {
        let client = HttpClient::builder("http://127.0.0.1:9")
            .timeout(Duration::from_millis(200))
            .build()
            .expect("client builds");

        let err = client
            .invoke(&describe(), Attributes::new())
            .await
            .expect_err("call fails");
        assert!(err.is_transient());
    }
}
