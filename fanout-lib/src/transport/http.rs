//! HTTP transport backed by `reqwest`.
//!
//! reqwest opens connections on demand and has no hard cap on their number,
//! so the connection count is bounded by the dispatcher's gate. The idle pool
//! is sized to the same value so every admitted request can reuse a
//! keep-alive connection instead of dialing a new one.

use crate::error::FanoutError;
use crate::transport::{Transport, TransportError};
use crate::types::{DispatchConfig, Method, Payload, RawResponse, RequestDescriptor};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

/// Transport that performs real HTTP calls.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    /// Shared client; cloning is cheap and shares the connection pool
    client: reqwest::Client,
    /// Connection budget this transport was built for
    max_connections: usize,
}

impl HttpTransport {
    /// Build a transport whose pool and default headers follow `config`.
    pub fn new(config: &DispatchConfig) -> Result<Self, FanoutError> {
        let headers = build_header_map(config)?;

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_concurrency)
            .default_headers(headers)
            .user_agent(concat!("fanout/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FanoutError::client(e.to_string()))?;

        Ok(Self {
            client,
            max_connections: config.max_concurrency,
        })
    }

    /// Wrap an existing client (custom TLS, auth, proxies, ...).
    ///
    /// `max_connections` must match the dispatcher's `max_concurrency`.
    pub fn with_client(client: reqwest::Client, max_connections: usize) -> Self {
        Self {
            client,
            max_connections,
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method().into(), request.url())
            .timeout(timeout);

        if request.method().sends_body() {
            builder = match request.body() {
                Some(Payload::Json(value)) => builder.json(value),
                Some(Payload::Bytes(bytes)) => builder.body(bytes.clone()),
                None => builder,
            };
        }

        let response = builder.send().await?;

        let url = response.url().to_string();
        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        let mut raw = RawResponse::new(url, status).with_body(body.to_vec());
        for (name, value) in headers {
            raw = raw.with_header(name, value);
        }
        Ok(raw)
    }

    fn connection_limit(&self) -> Option<usize> {
        Some(self.max_connections)
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
            Method::Patch => reqwest::Method::PATCH,
            Method::Options => reqwest::Method::OPTIONS,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}

fn build_header_map(config: &DispatchConfig) -> Result<HeaderMap, FanoutError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| FanoutError::config(format!("Invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value.trim()).map_err(|e| {
            FanoutError::config(format!(
                "Invalid value for header '{}': {}",
                name.as_str(),
                e
            ))
        })?;
        headers.insert(name, value);
    }
    Ok(headers)
}
