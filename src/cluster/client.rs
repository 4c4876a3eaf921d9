//! Cluster API client
//!
//! One request, one classified answer. The client never retries, sleeps or
//! logs; callers decide what a failure means for them. Transport failures
//! (no HTTP response at all) come back on the `Err` side so there is no
//! status code to misread.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Method;
use thiserror::Error;

use crate::context::Context;

/// Timeout for request/response calls. Log streams are not bounded.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for establishing a connection, streams included
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The request never produced an HTTP response (or its body could not be read)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("HTTP error talking to {url}: {message}")]
    Http { url: String, message: String },

    #[error("Failed to set up HTTP client: {0}")]
    Setup(String),
}

impl TransportError {
    fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let url = url.to_string();
        if err.is_timeout() {
            TransportError::Timeout { url }
        } else if err.is_connect() {
            TransportError::Connect {
                url,
                message: err.to_string(),
            }
        } else {
            TransportError::Http {
                url,
                message: err.to_string(),
            }
        }
    }
}

/// Body of a streaming response, chunk by chunk
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Classified answer from the cluster
#[derive(Debug)]
pub enum Outcome<T> {
    /// 2xx
    Success { status: u16, payload: T },
    /// 404
    NotFound,
    /// Any other status, with the raw body for diagnostics
    Failure { status: u16, body: Bytes },
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Status code the cluster answered with
    pub fn status(&self) -> u16 {
        match self {
            Outcome::Success { status, .. } | Outcome::Failure { status, .. } => *status,
            Outcome::NotFound => 404,
        }
    }
}

impl Outcome<Bytes> {
    /// Classify a complete response
    pub fn from_response(status: u16, body: Bytes) -> Self {
        match status {
            404 => Outcome::NotFound,
            200..=299 => Outcome::Success {
                status,
                payload: body,
            },
            _ => Outcome::Failure { status, body },
        }
    }
}

/// Seam between the controller/streamer and the wire (allows mocking in tests)
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Execute a single request/response exchange
    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<Outcome<Bytes>, TransportError>;

    /// Open a streaming GET; on success the payload is the open body
    async fn stream(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Outcome<ByteStream>, TransportError>;
}

// ============================================================================
// Resource paths
// ============================================================================

/// Where the ReplicaSet collection and pod logs live on the API server
#[derive(Debug, Clone, PartialEq)]
pub struct ApiPaths {
    api_version: String,
    namespace: String,
}

impl ApiPaths {
    pub fn new(api_version: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            namespace: namespace.into(),
        }
    }

    pub fn from_context(context: &Context) -> Self {
        Self::new(&context.api_version, &context.namespace)
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `/apis/{version}/namespaces/{ns}/replicasets`
    pub fn collection(&self) -> String {
        format!(
            "/apis/{}/namespaces/{}/replicasets",
            self.api_version.trim_matches('/'),
            self.namespace
        )
    }

    pub fn item(&self, name: &str) -> String {
        format!("{}/{}", self.collection(), name)
    }

    pub fn scale(&self, name: &str) -> String {
        format!("{}/scale", self.item(name))
    }

    /// `/api/v1/namespaces/{ns}/pods/{pod}/log`
    pub fn pod_log(namespace: &str, pod: &str) -> String {
        format!("/api/v1/namespaces/{}/pods/{}/log", namespace, pod)
    }
}

// ============================================================================
// I/O implementation (real HTTP client)
// ============================================================================

#[derive(Clone)]
pub struct ClusterClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    request_timeout: Duration,
}

impl ClusterClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Create from a resolved context
    pub fn from_context(context: &Context) -> Result<Self, TransportError> {
        let mut client = Self::new(&context.url)?;
        if let Some(ref token) = context.token {
            client = client.with_token(token);
        }
        Ok(client)
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(
        &self,
        method: Method,
        url: &str,
        query: &[(String, String)],
    ) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json, */*");
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(ref token) = self.token {
            req = req.header(reqwest::header::AUTHORIZATION, format!("Bearer {}", token));
        }
        req
    }
}

#[async_trait]
impl ClusterApi for ClusterClient {
    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<Outcome<Bytes>, TransportError> {
        let url = format!("{}{}", self.base_url, path);

        let mut req = self
            .build_request(method, &url, query)
            .timeout(self.request_timeout);
        if let Some(body) = body {
            req = req
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = req
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&url, e))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(&url, e))?;

        Ok(Outcome::from_response(status, body))
    }

    async fn stream(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Outcome<ByteStream>, TransportError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .build_request(Method::GET, &url, query)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&url, e))?;

        let status = response.status();
        if status.is_success() {
            let chunks = response
                .bytes_stream()
                .map(move |chunk| chunk.map_err(|e| TransportError::from_reqwest(&url, e)))
                .boxed();
            return Ok(Outcome::Success {
                status: status.as_u16(),
                payload: chunks,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(&url, e))?;

        Ok(match Outcome::from_response(status.as_u16(), body) {
            Outcome::NotFound => Outcome::NotFound,
            Outcome::Failure { status, body } => Outcome::Failure { status, body },
            // 2xx was handled above
            Outcome::Success { status, payload } => Outcome::Failure {
                status,
                body: payload,
            },
        })
    }
}
