//! Transport collaborators.
//!
//! The dispatcher never speaks HTTP itself. It hands each descriptor to a
//! [`Transport`], which performs exactly one network call and reports either
//! a raw response or a classified failure.

use crate::types::{RawResponse, RequestDescriptor};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// reqwest-backed HTTP transport
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::HttpTransport;

/// Failure of a single network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The call did not complete in time. The only retryable class.
    #[error("request timed out")]
    Timeout,

    /// Connection refused, reset, DNS failure
    #[error("connection failed: {0}")]
    Connect(String),

    /// Anything else (malformed response, body read failure, ...)
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Performs one HTTP call.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and wait at most `timeout` for the response.
    async fn send(
        &self,
        request: &RequestDescriptor,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError>;

    /// Maximum simultaneous connections, if the transport enforces one.
    ///
    /// When reported, it has to match the dispatcher's `max_concurrency`.
    fn connection_limit(&self) -> Option<usize> {
        None
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(
        &self,
        request: &RequestDescriptor,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        (**self).send(request, timeout).await
    }

    fn connection_limit(&self) -> Option<usize> {
        (**self).connection_limit()
    }
}
