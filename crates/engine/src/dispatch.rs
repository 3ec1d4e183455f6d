//! Outbound dispatch to providers.
//!
//! The engine talks to providers only through the [`Dispatcher`] trait. The
//! production implementation, [`HttpDispatcher`], posts the request payload
//! as JSON to the provider endpoint with the provider's auth scheme.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

use switchyard_common::{AuthType, Capability, ErrorClass, ProviderInstance, Region, RequestUnits};

// ============================================================================
// Request / Response
// ============================================================================

/// An inbound request to be routed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub capability: Capability,

    /// Region the caller wants to be served from
    #[serde(default)]
    pub region: Option<Region>,

    /// Usage estimate used for cost filtering
    #[serde(default)]
    pub units: RequestUnits,

    /// Opaque body forwarded to the provider
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Health probe; may reach half-open providers
    #[serde(default)]
    pub probe: bool,
}

impl GatewayRequest {
    pub fn new(capability: impl Into<Capability>, payload: serde_json::Value) -> Self {
        Self {
            capability: capability.into(),
            region: None,
            units: RequestUnits::default(),
            payload,
            probe: false,
        }
    }

    pub fn with_region(mut self, region: impl Into<Region>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_units(mut self, units: RequestUnits) -> Self {
        self.units = units;
        self
    }

    /// Probe request for `capability`.
    pub fn probe(capability: impl Into<Capability>) -> Self {
        Self {
            probe: true,
            ..Self::new(capability, serde_json::Value::Null)
        }
    }
}

/// A provider's answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl DispatchResponse {
    pub fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// A failed dispatch attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("provider was removed while the request was in flight")]
    ProviderRemoved,

    #[error("provider rate limit exhausted")]
    RateLimited,

    #[error("circuit no longer admits requests")]
    CircuitOpen,

    #[error("credential variable '{0}' is not set")]
    MissingCredential(String),

    #[error("dispatch cancelled")]
    Cancelled,
}

impl DispatchError {
    /// Class recorded on the health sample.
    pub fn class(&self) -> ErrorClass {
        match self {
            DispatchError::Timeout(_) | DispatchError::Cancelled => ErrorClass::Timeout,
            DispatchError::Network(_) | DispatchError::MissingCredential(_) => ErrorClass::Network,
            DispatchError::Status(_) => ErrorClass::UpstreamStatus,
            DispatchError::ProviderRemoved | DispatchError::CircuitOpen => {
                ErrorClass::ProviderRemoved
            }
            DispatchError::RateLimited => ErrorClass::RateLimited,
        }
    }

    /// Whether the failure reflects on the provider's health. Failures that
    /// happened before anything was sent do not.
    pub fn counts_against_provider(&self) -> bool {
        matches!(
            self,
            DispatchError::Timeout(_)
                | DispatchError::Network(_)
                | DispatchError::Status(_)
                | DispatchError::MissingCredential(_)
        )
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Sends requests to providers.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Forward `request` to `provider`. Non-2xx answers are errors.
    async fn dispatch(
        &self,
        provider: &ProviderInstance,
        request: &GatewayRequest,
    ) -> Result<DispatchResponse, DispatchError>;

    /// Lightweight health probe. Defaults to dispatching an empty probe
    /// request.
    async fn probe(&self, provider: &ProviderInstance) -> Result<DispatchResponse, DispatchError> {
        let request = GatewayRequest::probe(provider.capability.clone());
        self.dispatch(provider, &request).await
    }
}

/// HTTP dispatcher built on `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new(connect_timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("switchyard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DispatchError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn authorize(
        &self,
        builder: reqwest::RequestBuilder,
        provider: &ProviderInstance,
    ) -> Result<reqwest::RequestBuilder, DispatchError> {
        if provider.auth == AuthType::None {
            return Ok(builder);
        }
        let credential = credential(provider)?;
        Ok(match &provider.auth {
            AuthType::None => builder,
            AuthType::Bearer => builder.header(AUTHORIZATION, format!("Bearer {}", credential)),
            AuthType::ApiKeyHeader { header } => builder.header(header.as_str(), credential),
            AuthType::Basic => builder.header(
                AUTHORIZATION,
                format!("Basic {}", STANDARD.encode(credential.as_bytes())),
            ),
        })
    }

    async fn send(
        &self,
        provider: &ProviderInstance,
        builder: reqwest::RequestBuilder,
    ) -> Result<DispatchResponse, DispatchError> {
        let response = self
            .authorize(builder, provider)?
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        trace!(provider = %provider.id, status = status.as_u16(), "Provider responded");
        if !status.is_success() {
            debug!(provider = %provider.id, status = status.as_u16(), "Provider returned error status");
            return Err(DispatchError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        Ok(DispatchResponse {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(
        &self,
        provider: &ProviderInstance,
        request: &GatewayRequest,
    ) -> Result<DispatchResponse, DispatchError> {
        let builder = self.client.post(&provider.endpoint).json(&request.payload);
        self.send(provider, builder).await
    }

    async fn probe(&self, provider: &ProviderInstance) -> Result<DispatchResponse, DispatchError> {
        match &provider.probe_path {
            Some(path) => {
                let url = join_url(&provider.endpoint, path);
                self.send(provider, self.client.get(url)).await
            }
            None => {
                let request = GatewayRequest::probe(provider.capability.clone());
                self.dispatch(provider, &request).await
            }
        }
    }
}

fn credential(provider: &ProviderInstance) -> Result<String, DispatchError> {
    let var = provider
        .credential_env
        .as_deref()
        .ok_or_else(|| DispatchError::MissingCredential(format!("{}: no credential_env", provider.id)))?;
    std::env::var(var).map_err(|_| DispatchError::MissingCredential(var.to_string()))
}

fn map_reqwest_error(err: reqwest::Error) -> DispatchError {
    if let Some(status) = err.status() {
        DispatchError::Status(status.as_u16())
    } else {
        DispatchError::Network(err.to_string())
    }
}

/// Origin of `endpoint` joined with an absolute probe path.
fn join_url(endpoint: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    match endpoint.find("://") {
        Some(scheme_end) => {
            let rest = &endpoint[scheme_end + 3..];
            let origin_len = rest.find('/').map_or(endpoint.len(), |i| scheme_end + 3 + i);
            format!("{}/{}", &endpoint[..origin_len], path)
        }
        None => format!("{}/{}", endpoint.trim_end_matches('/'), path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchyard_common::CostRate;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(endpoint: String, auth: AuthType, env: Option<&str>) -> ProviderInstance {
        let mut p = ProviderInstance::new("p1", "chat", endpoint, CostRate::per_request(0.01));
        p.auth = auth;
        p.credential_env = env.map(str::to_string);
        p
    }

    fn dispatcher() -> HttpDispatcher {
        HttpDispatcher::new(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://api.example.com/v1/chat", "/health"),
            "https://api.example.com/health"
        );
        assert_eq!(join_url("http://127.0.0.1:9000", "status"), "http://127.0.0.1:9000/status");
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(DispatchError::Status(503).class(), ErrorClass::UpstreamStatus);
        assert_eq!(DispatchError::Timeout(Duration::from_secs(1)).class(), ErrorClass::Timeout);
        assert!(!DispatchError::RateLimited.counts_against_provider());
        assert!(!DispatchError::ProviderRemoved.counts_against_provider());
        assert!(DispatchError::Network("reset".into()).counts_against_provider());
    }

    #[tokio::test]
    async fn test_bearer_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_json(json!({"prompt": "hi"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "hello"})))
            .mount(&server)
            .await;

        std::env::set_var("SWITCHYARD_TEST_BEARER", "sk-test");
        let p = provider(
            format!("{}/v1/chat", server.uri()),
            AuthType::Bearer,
            Some("SWITCHYARD_TEST_BEARER"),
        );
        let request = GatewayRequest::new("chat", json!({"prompt": "hi"}));

        let response = dispatcher().dispatch(&p, &request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, json!({"answer": "hello"}));
    }

    #[tokio::test]
    async fn test_basic_and_header_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .and(header("x-api-key", "k-123"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        std::env::set_var("SWITCHYARD_TEST_BASIC", "user:pass");
        let basic = provider(server.uri(), AuthType::Basic, Some("SWITCHYARD_TEST_BASIC"));
        let response = dispatcher()
            .dispatch(&basic, &GatewayRequest::new("chat", json!({})))
            .await
            .unwrap();
        assert_eq!(response.body, serde_json::Value::Null);

        std::env::set_var("SWITCHYARD_TEST_HEADER", "k-123");
        let mut keyed = provider(
            format!("{}/v1/messages", server.uri()),
            AuthType::ApiKeyHeader {
                header: "x-api-key".to_string(),
            },
            Some("SWITCHYARD_TEST_HEADER"),
        );
        keyed.probe_path = Some("/health".to_string());
        let response = dispatcher().probe(&keyed).await.unwrap();
        assert_eq!(response.body, json!("ok"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let p = provider(server.uri(), AuthType::None, None);
        let err = dispatcher()
            .dispatch(&p, &GatewayRequest::new("chat", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::Status(503));
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let p = provider(
            "http://127.0.0.1:9".to_string(),
            AuthType::Bearer,
            Some("SWITCHYARD_TEST_UNSET_VARIABLE"),
        );
        let err = dispatcher()
            .dispatch(&p, &GatewayRequest::new("chat", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::MissingCredential(_)));
    }
}
