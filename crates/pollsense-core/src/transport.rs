//! HTTP transport.
//!
//! [`HttpTransport`] is the seam between the fetch cycle and the network.
//! [`ReqwestTransport`] is the production implementation; tests plug in
//! their own.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use thiserror::Error;
use tracing::trace;

use crate::config::{FetchConfig, RequestBody};
use crate::response::RawResponse;

/// Why a request produced no response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection error: {0}")]
    Connection(String),

    /// The request could not be built
    #[error("Request error: {0}")]
    Request(String),

    /// The body could not be read
    #[error("Body error: {0}")]
    Body(String),
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Issues one request per call.
///
/// Implementations return any HTTP status as a response; only the absence of
/// a response is an error.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn fetch(&self, config: &FetchConfig) -> TransportResult<RawResponse>;
}

/// Transport backed by shared reqwest clients.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    /// Used for targets that disable certificate verification
    insecure_client: Client,
}

impl ReqwestTransport {
    pub fn new() -> TransportResult<Self> {
        let build = |verify: bool| {
            Client::builder()
                .user_agent(concat!("pollsense/", env!("CARGO_PKG_VERSION")))
                .danger_accept_invalid_certs(!verify)
                .build()
                .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {}", e)))
        };
        Ok(Self {
            client: build(true)?,
            insecure_client: build(false)?,
        })
    }

    fn client_for(&self, config: &FetchConfig) -> &Client {
        if config.verify_ssl {
            &self.client
        } else {
            &self.insecure_client
        }
    }

    fn map_error(error: reqwest::Error, timeout: Duration) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(timeout)
        } else if error.is_builder() {
            TransportError::Request(error.to_string())
        } else if error.is_body() || error.is_decode() {
            TransportError::Body(error.to_string())
        } else {
            TransportError::Connection(error.to_string())
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn fetch(&self, config: &FetchConfig) -> TransportResult<RawResponse> {
        let method = Method::from_bytes(config.method.as_str().as_bytes())
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let mut request = self
            .client_for(config)
            .request(method, &config.url)
            .timeout(config.timeout);

        for (key, value) in &config.headers {
            request = request.header(key, value);
        }
        if !config.params.is_empty() {
            request = request.query(&config.params);
        }
        match &config.body {
            Some(RequestBody::Json(body)) => request = request.json(body),
            Some(RequestBody::Raw(body)) => request = request.body(body.clone()),
            None => {}
        }

        let response = request
            .send()
            .await
            .map_err(|e| Self::map_error(e, config.timeout))?;

        let status = response.status().as_u16();
        let mut raw = RawResponse::new(status, String::new());
        for (name, value) in response.headers() {
            raw.headers.insert(
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }

        raw.text = response
            .text()
            .await
            .map_err(|e| Self::map_error(e, config.timeout))?;

        trace!(
            target_name = %config.name,
            status,
            bytes = raw.text.len(),
            "response received"
        );
        Ok(raw)
    }
}
