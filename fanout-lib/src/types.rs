//! Core data types for request dispatch.
//!
//! This module defines the request descriptors handed to the dispatcher,
//! the raw response returned by a transport, and the dispatch configuration.

use crate::error::FanoutError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default number of simultaneously in-flight requests.
pub const DEFAULT_MAX_CONCURRENCY: usize = 100;

/// Upper bound for `max_concurrency`.
pub const MAX_CONCURRENCY: usize = 1000;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of retries after a timeout.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Patch,
    Options,
}

impl Method {
    /// All supported methods, in display order.
    pub const ALL: [Method; 7] = [
        Method::Get,
        Method::Options,
        Method::Head,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Patch => "PATCH",
            Method::Options => "OPTIONS",
        }
    }

    /// Whether a payload is sent as the request body for this method.
    pub fn sends_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }

    /// Comma-separated list of supported method names.
    pub fn supported() -> String {
        Self::ALL
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for Method {
    type Err = FanoutError;

    /// Parse a method name, ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|method| method.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| FanoutError::invalid_method(s))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Sent as `application/json`
    Json(serde_json::Value),
    /// Sent verbatim
    Bytes(Vec<u8>),
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

/// One logical HTTP request with a stable position in the input.
///
/// Descriptors are immutable once built; the dispatcher only reads them.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    index: usize,
    method: Method,
    url: String,
    body: Option<Payload>,
}

impl RequestDescriptor {
    pub fn new<U: Into<String>>(index: usize, method: Method, url: U) -> Self {
        Self {
            index,
            method,
            url: url.into(),
            body: None,
        }
    }

    /// Attach a request body.
    pub fn with_body(mut self, body: Payload) -> Self {
        self.body = Some(body);
        self
    }

    /// 0-based position of this request in the input.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> Option<&Payload> {
        self.body.as_ref()
    }
}

/// Response as handed back by a transport, before any transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl RawResponse {
    pub fn new<U: Into<String>>(url: U, status: u16) -> Self {
        Self {
            url: url.into(),
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Build a `200 OK` response carrying a JSON body.
    pub fn json_body<U: Into<String>>(url: U, value: &serde_json::Value) -> Self {
        Self::new(url, 200)
            .with_header("content-type", "application/json")
            .with_body(value.to_string().into_bytes())
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Final URL of the response.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// True for 2xx and 3xx statuses.
    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    /// Look up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Configuration for one dispatcher.
///
/// The same `max_concurrency` sizes both the concurrency gate and the
/// transport's connection pool, so holding a permit means a connection
/// slot is actually obtainable and the per-request timeout only measures
/// time spent waiting on the server.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Maximum number of simultaneously in-flight requests
    /// Default: 100, Range: 1-1000
    pub max_concurrency: usize,

    /// Timeout for each attempt of a request
    /// Default: 10 seconds
    pub timeout: Duration,

    /// How many times a timed-out request is re-issued
    /// Default: 3 (0 disables retries)
    pub max_retries_on_timeout: u32,

    /// Pause before re-issuing a timed-out request
    /// Default: none (immediate retry)
    pub retry_delay: Duration,

    /// Concatenate list-shaped results into one sequence
    /// Default: false
    pub flatten: bool,

    /// Treat HTTP statuses >= 400 as request failures
    /// Default: true
    pub raise_for_status: bool,

    /// Headers sent with every request by the HTTP transport
    pub headers: HashMap<String, String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
            max_retries_on_timeout: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::ZERO,
            flatten: false,
            raise_for_status: true,
            headers: HashMap::new(),
        }
    }
}

impl DispatchConfig {
    /// Set the concurrency bound. Out-of-range values are rejected by
    /// [`DispatchConfig::validate`], not clamped.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries_on_timeout = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_flatten(mut self, flatten: bool) -> Self {
        self.flatten = flatten;
        self
    }

    pub fn with_raise_for_status(mut self, enabled: bool) -> Self {
        self.raise_for_status = enabled;
        self
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Reject settings that would make a dispatch meaningless.
    pub fn validate(&self) -> Result<(), FanoutError> {
        if self.max_concurrency == 0 || self.max_concurrency > MAX_CONCURRENCY {
            return Err(FanoutError::config(format!(
                "max_concurrency must be between 1 and {}, got {}",
                MAX_CONCURRENCY, self.max_concurrency
            )));
        }

        if self.timeout.is_zero() {
            return Err(FanoutError::config("timeout must be greater than zero"));
        }

        if self.headers.keys().any(|name| name.trim().is_empty()) {
            return Err(FanoutError::config("header names cannot be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_parsing_is_case_insensitive() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("Post".parse::<Method>().unwrap(), Method::Post);
        assert_eq!(" OPTIONS ".parse::<Method>().unwrap(), Method::Options);
        assert!("foobar".parse::<Method>().is_err());
        assert!("".parse::<Method>().is_err());
    }

    #[test]
    fn test_only_post_put_patch_send_a_body() {
        let with_body: Vec<Method> = Method::ALL
            .iter()
            .copied()
            .filter(Method::sends_body)
            .collect();
        assert_eq!(with_body, vec![Method::Post, Method::Put, Method::Patch]);
    }

    #[test]
    fn test_raw_response_accessors() {
        let response = RawResponse::json_body("http://test.com/get", &json!({"i": 1}))
            .with_header("X-Total", "7");

        assert_eq!(response.status(), 200);
        assert!(response.is_success());
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.header("x-total"), Some("7"));
        assert_eq!(response.text(), r#"{"i":1}"#);
        assert_eq!(response.json::<serde_json::Value>().unwrap(), json!({"i": 1}));
    }

    #[test]
    fn test_default_config() {
        let config = DispatchConfig::default();
        assert_eq!(config.max_concurrency, 100);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.max_retries_on_timeout, 3);
        assert!(!config.flatten);
        assert!(config.raise_for_status);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_bad_values() {
        assert!(DispatchConfig::default()
            .with_max_concurrency(0)
            .validate()
            .is_err());
        assert!(DispatchConfig::default()
            .with_max_concurrency(MAX_CONCURRENCY + 1)
            .validate()
            .is_err());
        assert!(DispatchConfig::default()
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(DispatchConfig::default()
            .with_header(" ", "x")
            .validate()
            .is_err());
        assert!(DispatchConfig::default()
            .with_max_retries(0)
            .validate()
            .is_ok());
    }
}
