//! The HTTP exchange the dispatcher invokes but does not implement.
//!
//! [`Transport`] is the seam: given a [`RequestDescriptor`] it performs one
//! network exchange and returns the status and raw body, or fails. The
//! dispatcher owns attempt counting (always one), JSON decoding, and outcome
//! classification.
//!
//! [`HttpTransport`] is the bundled implementation on top of `reqwest`, with
//! the fixed connect/read timeouts and user agent from [`NetConfig`].

use crate::{Method, NetConfig, RequestDescriptor, Result};
use async_trait::async_trait;
use reqwest::StatusCode;

/// Status line and body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: String,
}

/// Performs a single request/response exchange.
///
/// # Errors
///
/// Implementations return [`crate::Error::Transport`] for connection, timeout,
/// and protocol-level failures. A response with a failure status is **not** an
/// error at this layer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &RequestDescriptor) -> Result<TransportResponse>;
}

/// A [`Transport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds the underlying client.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Transport`] if the client (TLS backend,
    /// resolver) cannot be initialised.
    pub fn new(config: &NetConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &RequestDescriptor) -> Result<TransportResponse> {
        let method = match request.method() {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };

        let mut builder = self.client.request(method, request.url().clone());
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body() {
            builder = builder.body(body.to_owned());
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        Ok(TransportResponse { status, body })
    }
}
