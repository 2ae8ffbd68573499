//! Request descriptor construction.
//!
//! This module expands a base URL, a list of paths or URLs and optional
//! payloads into one [`RequestDescriptor`] per request, indexed in input
//! order. All shape checks happen here so the dispatcher only ever sees a
//! dense, ready-to-send list.

use crate::error::FanoutError;
use crate::types::{Method, Payload, RequestDescriptor};
use tracing::info;

/// Request bodies for a batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payloads {
    /// No bodies
    #[default]
    None,
    /// The same body for every request
    Shared(Payload),
    /// One body per request, in request order
    PerRequest(Vec<Payload>),
}

impl Payloads {
    /// Interpret a JSON document as payloads.
    ///
    /// An array supplies one payload per request, `null` means no payload,
    /// anything else is shared by every request.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Payloads::None,
            serde_json::Value::Array(items) => {
                Payloads::PerRequest(items.into_iter().map(Payload::Json).collect())
            }
            other => Payloads::Shared(Payload::Json(other)),
        }
    }

    pub fn is_none(&self) -> bool {
        match self {
            Payloads::None => true,
            Payloads::Shared(_) => false,
            Payloads::PerRequest(items) => items.is_empty(),
        }
    }
}

/// Builds indexed descriptors for one batch.
///
/// # Example
///
/// ```rust
/// use fanout_lib::{Method, Payloads, RequestBuilder};
/// use serde_json::json;
///
/// let descriptors = RequestBuilder::new(Method::Post)
///     .base_url("https://api.example.com")
///     .url("/items")
///     .payloads(Payloads::from_json(json!([{"id": 1}, {"id": 2}])))
///     .build()
///     .unwrap();
///
/// assert_eq!(descriptors.len(), 2);
/// assert_eq!(descriptors[1].url(), "https://api.example.com/items");
/// ```
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    base_url: Option<String>,
    urls: Vec<String>,
    payloads: Payloads,
}

impl RequestBuilder {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            base_url: None,
            urls: Vec::new(),
            payloads: Payloads::None,
        }
    }

    /// Prefix applied to every relative path.
    pub fn base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn url<S: Into<String>>(mut self, url: S) -> Self {
        self.urls.push(url.into());
        self
    }

    pub fn urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.urls.extend(urls.into_iter().map(Into::into));
        self
    }

    pub fn payloads(mut self, payloads: Payloads) -> Self {
        self.payloads = payloads;
        self
    }

    /// Expand into descriptors.
    ///
    /// Pairing rules:
    /// - no payloads: one request per URL
    /// - a single payload: shared by every URL
    /// - one URL and several payloads: the URL is reused for each payload
    /// - otherwise the counts have to match
    ///
    /// Bodies are only attached for methods that send one.
    ///
    /// # Errors
    ///
    /// `PayloadMismatch` when URLs and payloads cannot be paired and
    /// `InvalidUrl` when a joined URL does not parse.
    pub fn build(&self) -> Result<Vec<RequestDescriptor>, FanoutError> {
        let targets = self
            .urls
            .iter()
            .map(|path| join_url(self.base_url.as_deref(), path))
            .collect::<Result<Vec<_>, _>>()?;

        let pairs: Vec<(String, Option<Payload>)> = match &self.payloads {
            payloads if payloads.is_none() => targets.into_iter().map(|t| (t, None)).collect(),
            Payloads::Shared(payload) => targets
                .into_iter()
                .map(|t| (t, Some(payload.clone())))
                .collect(),
            Payloads::PerRequest(items) if items.len() == 1 => targets
                .into_iter()
                .map(|t| (t, Some(items[0].clone())))
                .collect(),
            Payloads::PerRequest(items) if targets.len() == 1 => {
                info!(
                    "Using path '{}' for all {} payloads",
                    self.urls[0],
                    items.len()
                );
                items
                    .iter()
                    .map(|payload| (targets[0].clone(), Some(payload.clone())))
                    .collect()
            }
            Payloads::PerRequest(items) if items.len() == targets.len() => targets
                .into_iter()
                .zip(items.iter().cloned().map(Some))
                .collect(),
            Payloads::PerRequest(items) => {
                return Err(FanoutError::PayloadMismatch {
                    paths: targets.len(),
                    payloads: items.len(),
                })
            }
            Payloads::None => Vec::new(),
        };

        let sends_body = self.method.sends_body();
        Ok(pairs
            .into_iter()
            .enumerate()
            .map(|(index, (url, payload))| {
                let descriptor = RequestDescriptor::new(index, self.method, url);
                match payload {
                    Some(body) if sends_body => descriptor.with_body(body),
                    _ => descriptor,
                }
            })
            .collect())
    }
}

/// Join `path` onto `base`.
///
/// Absolute URLs are returned unchanged. Otherwise exactly one `/` separates
/// the base and the path. The result must parse as a URL.
pub fn join_url(base: Option<&str>, path: &str) -> Result<String, FanoutError> {
    let path = path.trim();

    let joined = match base.map(str::trim).filter(|b| !b.is_empty()) {
        Some(_) if is_absolute(path) => path.to_string(),
        Some(base) if path.is_empty() => base.to_string(),
        Some(base) => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        ),
        None => path.to_string(),
    };

    url::Url::parse(&joined).map_err(|e| FanoutError::invalid_url(&joined, e.to_string()))?;
    Ok(joined)
}

fn is_absolute(path: &str) -> bool {
    path.split_once("://")
        .map(|(scheme, _)| {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        })
        .unwrap_or(false)
}

/// Parse a URL list file: one entry per line, blank lines and `#` comments
/// are skipped.
pub fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
