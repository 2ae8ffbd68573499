//! High-level batch API.
//!
//! [`Fanout`] bundles descriptor building, transport construction and
//! dispatch behind one builder for callers that just want "these URLs,
//! this method, give me the results in order".

use crate::builder::{Payloads, RequestBuilder};
use crate::dispatcher::{Dispatcher, Results};
use crate::error::{DispatchError, FanoutError};
use crate::progress::{NoProgress, ProgressSink};
use crate::transform::{Json, ResponseHandler};
use crate::transport::Transport;
use crate::types::{DispatchConfig, Method, RequestDescriptor};
use std::sync::Arc;
use std::time::Duration;

/// One batch of requests, ready to run.
///
/// # Example
///
/// ```rust,no_run
/// use fanout_lib::{Fanout, Method, Payloads};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let results = Fanout::new((1..=100).map(|i| format!("/posts/{}", i)))
///         .base_url("https://jsonplaceholder.typicode.com")
///         .concurrency(50)
///         .run()
///         .await?;
///     println!("{} posts", results.len());
///
///     let created = Fanout::new(["/posts"])
///         .method(Method::Post)
///         .base_url("https://jsonplaceholder.typicode.com")
///         .payloads(Payloads::from_json(json!([{"title": "a"}, {"title": "b"}])))
///         .run()
///         .await?;
///     println!("{:?}", created.into_values()?);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Fanout {
    urls: Vec<String>,
    method: Method,
    base_url: Option<String>,
    payloads: Payloads,
    config: DispatchConfig,
    transport: Option<Arc<dyn Transport>>,
}

impl Fanout {
    /// Start a GET batch over `urls` with default settings.
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            method: Method::Get,
            base_url: None,
            payloads: Payloads::None,
            config: DispatchConfig::default(),
            transport: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn payloads(mut self, payloads: Payloads) -> Self {
        self.payloads = payloads;
        self
    }

    pub fn header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.config = self.config.with_header(name, value);
        self
    }

    pub fn concurrency(mut self, max_concurrency: usize) -> Self {
        self.config.max_concurrency = max_concurrency;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.config.max_retries_on_timeout = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn flatten(mut self, flatten: bool) -> Self {
        self.config.flatten = flatten;
        self
    }

    pub fn raise_for_status(mut self, enabled: bool) -> Self {
        self.config.raise_for_status = enabled;
        self
    }

    /// Replace every dispatch setting at once.
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom transport instead of the default HTTP one.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn dispatch_config(&self) -> &DispatchConfig {
        &self.config
    }

    /// The descriptors this batch will send.
    pub fn descriptors(&self) -> Result<Vec<RequestDescriptor>, FanoutError> {
        let mut builder = RequestBuilder::new(self.method)
            .urls(self.urls.iter().cloned())
            .payloads(self.payloads.clone());
        if let Some(base_url) = &self.base_url {
            builder = builder.base_url(base_url.clone());
        }
        builder.build()
    }

    /// Build the dispatcher this batch runs on.
    pub fn dispatcher(&self) -> Result<Dispatcher, FanoutError> {
        match &self.transport {
            Some(transport) => Dispatcher::new(self.config.clone(), transport.clone()),
            None => default_dispatcher(self.config.clone()),
        }
    }

    /// Run the batch, decoding every response as JSON.
    pub async fn run(&self) -> Result<Results<serde_json::Value>, DispatchError<serde_json::Value>> {
        self.run_with(&Json, &NoProgress).await
    }

    /// Run the batch with a custom handler and progress sink.
    pub async fn run_with<H, P>(
        &self,
        handler: &H,
        progress: &P,
    ) -> Result<Results<H::Output>, DispatchError<H::Output>>
    where
        H: ResponseHandler + ?Sized,
        P: ProgressSink + ?Sized,
    {
        let descriptors = self.descriptors()?;
        let dispatcher = self.dispatcher()?;
        dispatcher
            .dispatch_with_progress(&descriptors, handler, progress)
            .await
    }
}

impl std::fmt::Debug for Fanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fanout")
            .field("urls", &self.urls.len())
            .field("method", &self.method)
            .field("base_url", &self.base_url)
            .field("config", &self.config)
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}

#[cfg(feature = "http")]
fn default_dispatcher(config: DispatchConfig) -> Result<Dispatcher, FanoutError> {
    Dispatcher::http(config)
}

#[cfg(not(feature = "http"))]
fn default_dispatcher(_config: DispatchConfig) -> Result<Dispatcher, FanoutError> {
    Err(FanoutError::config(
        "no transport configured and the `http` feature is disabled",
    ))
}

/// Send `method` requests to every URL and return the JSON bodies in order.
pub async fn fanout<I, S>(
    urls: I,
    method: Method,
) -> Result<Results<serde_json::Value>, DispatchError<serde_json::Value>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Fanout::new(urls).method(method).run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use crate::types::{Payload, RawResponse};
    use async_trait::async_trait;
    use serde_json::json;

    /// Echoes the request URL and body back as JSON.
    struct Echo;

    #[async_trait]
    impl Transport for Echo {
        async fn send(
            &self,
            request: &RequestDescriptor,
            _timeout: Duration,
        ) -> Result<RawResponse, TransportError> {
            let body = match request.body() {
                Some(Payload::Json(value)) => value.clone(),
                _ => serde_json::Value::Null,
            };
            Ok(RawResponse::json_body(
                request.url(),
                &json!({"url": request.url(), "body": body}),
            ))
        }
    }

    #[tokio::test]
    async fn test_run_over_custom_transport() {
        let results = Fanout::new(["/a", "/b"])
            .base_url("http://test.com")
            .method(Method::Post)
            .payloads(Payloads::from_json(json!({"shared": true})))
            .transport(Arc::new(Echo))
            .run()
            .await
            .unwrap();

        let values = results.into_values().unwrap();
        assert_eq!(values[0]["url"], "http://test.com/a");
        assert_eq!(values[1]["url"], "http://test.com/b");
        assert_eq!(values[1]["body"], json!({"shared": true}));
    }

    #[tokio::test]
    async fn test_run_with_a_typed_handler() {
        #[derive(Debug, serde::Deserialize)]
        struct Echoed {
            url: String,
        }

        let handler = crate::transform::JsonAs::<Echoed>::new();
        let results = Fanout::new(["/a", "/b"])
            .base_url("http://test.com")
            .transport(Arc::new(Echo))
            .run_with(&handler, &NoProgress)
            .await
            .unwrap();

        let urls: Vec<String> = results.into_iter().map(|e| e.unwrap().url).collect();
        assert_eq!(urls, vec!["http://test.com/a", "http://test.com/b"]);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_dispatch() {
        let result = Fanout::new(["http://test.com"])
            .concurrency(0)
            .transport(Arc::new(Echo))
            .run()
            .await;

        assert!(matches!(
            result,
            Err(DispatchError::Config(FanoutError::Config { .. }))
        ));
    }

    #[test]
    fn test_descriptors_follow_builder_rules() {
        let batch = Fanout::new(["/post"])
            .base_url("http://test.com")
            .method(Method::Put)
            .payloads(Payloads::from_json(json!([1, 2, 3])));

        let descriptors = batch.descriptors().unwrap();
        assert_eq!(descriptors.len(), 3);
        assert!(descriptors.iter().all(|d| d.method() == Method::Put));
    }
}
