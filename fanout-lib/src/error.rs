//! Error handling for dispatch operations.
//!
//! Failures live at two levels. [`FanoutError`] covers call-level problems
//! (bad configuration, malformed URLs, misaligned payloads) that stop a
//! dispatch before any request is issued. [`RequestError`] describes the
//! terminal failure of one request and is stored in that request's result
//! slot without affecting its siblings. [`DispatchError`] is what the
//! top-level `dispatch` call returns when either of those happened.

use crate::dispatcher::Results;
use crate::types::Method;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Call-level error type.
///
/// Any of these is raised before a single request goes out on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FanoutError {
    /// Invalid settings (concurrency out of range, zero timeout, ...)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// HTTP method name not in the supported set
    #[error("The method '{method}' is not a supported HTTP method. Supported methods: {}", Method::supported())]
    InvalidMethod { method: String },

    /// URL that cannot be parsed after joining with the base URL
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Paths and payloads cannot be paired one-to-one
    #[error("The number of paths does not match the number of payloads: {paths} != {payloads}")]
    PayloadMismatch { paths: usize, payloads: usize },

    /// File I/O errors when reading URL lists, payloads or config files
    #[error("File error at '{path}': {message}")]
    File { path: String, message: String },

    /// The HTTP client could not be constructed
    #[error("Failed to create HTTP client: {message}")]
    Client { message: String },

    /// Broken internal invariant
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl FanoutError {
    /// Create a new configuration error.
    pub fn config<M: Into<String>>(message: M) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new invalid method error.
    pub fn invalid_method<M: Into<String>>(method: M) -> Self {
        Self::InvalidMethod {
            method: method.into(),
        }
    }

    /// Create a new invalid URL error.
    pub fn invalid_url<U: Into<String>, R: Into<String>>(url: U, reason: R) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a new file error.
    pub fn file_error<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::File {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new client construction error.
    pub fn client<M: Into<String>>(message: M) -> Self {
        Self::Client {
            message: message.into(),
        }
    }

    /// Create a new internal error.
    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Why a single request ended in failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Every attempt timed out and the retry budget is spent
    #[error("timed out after {after:?}")]
    Timeout {
        #[serde(rename = "after_ms", serialize_with = "serialize_millis")]
        after: Duration,
    },

    /// Connection refused/reset, DNS failure, malformed response, ...
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The server answered with a status >= 400 and `raise_for_status` is on
    #[error("HTTP status {status}")]
    HttpStatus { status: u16 },

    /// The response handler rejected the response
    #[error("response could not be decoded: {message}")]
    ResponseDecode { message: String },

    /// Flattening was requested but the value is not a sequence
    #[error("value is not a sequence and cannot be flattened")]
    NotFlattenable,

    /// The concurrency gate was closed before the request got a permit
    #[error("concurrency gate closed before the request was sent")]
    GateClosed,
}

fn serialize_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
}

impl ErrorKind {
    /// Only timeouts are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Short, stable name of the error class, used in logs and summaries.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "Timeout",
            Self::Transport { .. } => "TransportError",
            Self::HttpStatus { .. } => "HttpStatusError",
            Self::ResponseDecode { .. } => "ResponseDecodeError",
            Self::NotFlattenable => "NotFlattenable",
            Self::GateClosed => "GateClosed",
        }
    }
}

/// Terminal failure of one request, including all of its retries.
///
/// Carries enough context (method, URL, attempt count) for a caller to
/// decide what to re-issue.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{method} {url} failed after {attempts} attempt(s): {kind}")]
pub struct RequestError {
    /// Position of the request in the original input
    pub index: usize,
    /// HTTP method of the request
    pub method: Method,
    /// Fully joined target URL
    pub url: String,
    /// Number of network calls made for this request
    pub attempts: u32,
    /// What went wrong
    pub kind: ErrorKind,
}

impl RequestError {
    pub fn new<U: Into<String>>(
        index: usize,
        method: Method,
        url: U,
        attempts: u32,
        kind: ErrorKind,
    ) -> Self {
        Self {
            index,
            method,
            url: url.into(),
            attempts,
            kind,
        }
    }

    /// Check if the request ran out of retries on timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout { .. })
    }
}

/// Error returned by the top-level dispatch call.
///
/// `Incomplete` still hands back the full ordered buffer so the caller can
/// tell exactly which requests succeeded.
#[derive(Debug)]
pub enum DispatchError<T> {
    /// Rejected before any request was issued
    Config(FanoutError),

    /// All requests ran, at least one slot holds a failure
    Incomplete { failed: usize, results: Results<T> },
}

impl<T> DispatchError<T> {
    /// Borrow the result buffer, if the dispatch got as far as running.
    pub fn results(&self) -> Option<&Results<T>> {
        match self {
            Self::Config(_) => None,
            Self::Incomplete { results, .. } => Some(results),
        }
    }

    /// Take the result buffer, if the dispatch got as far as running.
    pub fn into_results(self) -> Option<Results<T>> {
        match self {
            Self::Config(_) => None,
            Self::Incomplete { results, .. } => Some(results),
        }
    }

    /// Number of failed slots (zero for configuration errors).
    pub fn failed(&self) -> usize {
        match self {
            Self::Config(_) => 0,
            Self::Incomplete { failed, .. } => *failed,
        }
    }
}

impl<T> From<FanoutError> for DispatchError<T> {
    fn from(err: FanoutError) -> Self {
        Self::Config(err)
    }
}

impl<T> fmt::Display for DispatchError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{}", err),
            Self::Incomplete { failed, results } => write!(
                f,
                "{} of {} request(s) failed",
                failed,
                results.requests()
            ),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for DispatchError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Incomplete { .. } => None,
        }
    }
}
