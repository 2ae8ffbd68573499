//! # Fanout Library
//!
//! Dispatch large batches of HTTP requests concurrently under a bounded
//! concurrency limit and get the results back in request order.
//!
//! Each request holds one permit of a shared concurrency gate while it runs,
//! timed-out attempts are retried under the same permit, and every terminal
//! outcome lands in the slot of the request that produced it. A failed
//! request never aborts its siblings; the dispatch reports the failures once
//! everything has finished.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fanout_lib::{fanout, Method};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let urls = (1..=10).map(|i| format!("https://jsonplaceholder.typicode.com/posts/{}", i));
//!     let results = fanout(urls, Method::Get).await?;
//!
//!     for post in results.successes() {
//!         println!("{}", post["title"]);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Bounded concurrency**: at most `max_concurrency` requests in flight
//! - **Ordered results**: completion order never reorders the output
//! - **Timeout retries**: only timeouts are retried, up to a fixed budget
//! - **Pluggable handling**: JSON, typed JSON, text, status or any closure
//! - **Flattening**: concatenate list-shaped responses into one sequence
//! - **Pluggable transport**: reqwest by default, any [`Transport`] otherwise

// Re-export main public API types and functions
// This makes them available as fanout_lib::TypeName
pub use batch::{fanout, Fanout};
pub use builder::{join_url, parse_url_list, Payloads, RequestBuilder};
pub use config::{
    load_env_config, parse_duration, ConfigManager, DefaultsConfig, EnvConfig, FileConfig,
};
pub use dispatcher::{Dispatcher, Outcome, Results};
pub use error::{DispatchError, ErrorKind, FanoutError, RequestError};
pub use executor::{ExecutionOutcome, RequestExecutor};
pub use gate::{ConcurrencyGate, GateClosed, GatePermit};
pub use progress::{CountingProgress, NoProgress, ProgressSink};
pub use transform::{
    flatten_outcomes, handler_fn, FnHandler, Json, JsonAs, Raw, ResponseHandler, Status, Text,
};
pub use transport::{Transport, TransportError};
pub use types::{
    DispatchConfig, Method, Payload, RawResponse, RequestDescriptor, DEFAULT_MAX_CONCURRENCY,
    DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT, MAX_CONCURRENCY,
};

#[cfg(feature = "http")]
pub use transport::HttpTransport;

// Public modules
pub mod transport;

// Internal modules - their public items are re-exported above
mod batch;
mod builder;
mod config;
mod dispatcher;
mod error;
mod executor;
mod gate;
mod progress;
mod transform;
mod types;

// Type alias for convenience
pub type Result<T> = std::result::Result<T, FanoutError>;

// Library version and metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
