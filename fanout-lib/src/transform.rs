//! Response transforms and result flattening.
//!
//! A [`ResponseHandler`] turns each successful raw response into the value
//! stored in the result slot. It runs inside the executor, while the request
//! still holds its permit. When flattening is enabled the same handler also
//! decides, through [`ResponseHandler::split`], whether a stored value can be
//! spliced into a combined sequence.

use crate::dispatcher::Outcome;
use crate::error::{ErrorKind, RequestError};
use crate::executor::ExecutionOutcome;
use crate::types::{RawResponse, RequestDescriptor};
use serde::de::DeserializeOwned;
use std::fmt;
use std::marker::PhantomData;

/// Maps one raw response to the value kept for that request.
///
/// Returning `Err` records a `ResponseDecode` failure for the request.
/// Any `Send` output type works; flattening is opt-in through [`split`].
///
/// [`split`]: ResponseHandler::split
pub trait ResponseHandler: Send + Sync {
    type Output: Send;

    fn handle(&self, response: RawResponse) -> Result<Self::Output, String>;

    /// Split a stored value into items for a flattened result, or hand it
    /// back if it is not a sequence. Only called when flattening is enabled.
    fn split(&self, value: Self::Output) -> Result<Vec<Self::Output>, Self::Output> {
        Err(value)
    }
}

/// Decode the body as untyped JSON. This is the default handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

impl ResponseHandler for Json {
    type Output = serde_json::Value;

    fn handle(&self, response: RawResponse) -> Result<Self::Output, String> {
        response
            .json()
            .map_err(|e| format!("invalid JSON body: {}", e))
    }

    fn split(&self, value: Self::Output) -> Result<Vec<Self::Output>, Self::Output> {
        match value {
            serde_json::Value::Array(items) => Ok(items),
            other => Err(other),
        }
    }
}

/// Decode the body as JSON into `T`.
///
/// Typed outputs are never split; decode into `Vec<U>` and use
/// [`Results::flatten_into`](crate::Results::flatten_into) to concatenate.
pub struct JsonAs<T>(PhantomData<fn() -> T>);

impl<T> JsonAs<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonAs<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonAs<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for JsonAs<T> {}

impl<T> fmt::Debug for JsonAs<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonAs<{}>", std::any::type_name::<T>())
    }
}

impl<T: DeserializeOwned + Send> ResponseHandler for JsonAs<T> {
    type Output = T;

    fn handle(&self, response: RawResponse) -> Result<T, String> {
        response
            .json()
            .map_err(|e| format!("invalid JSON body: {}", e))
    }
}

/// Identity: keep the raw response for the caller to inspect.
#[derive(Debug, Clone, Copy, Default)]
pub struct Raw;

impl ResponseHandler for Raw {
    type Output = RawResponse;

    fn handle(&self, response: RawResponse) -> Result<RawResponse, String> {
        Ok(response)
    }
}

/// Keep the body as text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Text;

impl ResponseHandler for Text {
    type Output = String;

    fn handle(&self, response: RawResponse) -> Result<String, String> {
        Ok(response.text())
    }
}

/// Keep only the status code.
#[derive(Debug, Clone, Copy, Default)]
pub struct Status;

impl ResponseHandler for Status {
    type Output = u16;

    fn handle(&self, response: RawResponse) -> Result<u16, String> {
        Ok(response.status())
    }
}

/// Handler built from a closure, see [`handler_fn`].
#[derive(Clone)]
pub struct FnHandler<F> {
    f: F,
}

/// Use a closure as a response handler.
///
/// ```
/// use fanout_lib::{handler_fn, RawResponse};
///
/// let total_pages = handler_fn(|response: RawResponse| {
///     response
///         .header("x-wp-totalpages")
///         .unwrap_or("0")
///         .parse::<u32>()
/// });
/// # let _ = total_pages;
/// ```
pub fn handler_fn<F, T, E>(f: F) -> FnHandler<F>
where
    F: Fn(RawResponse) -> Result<T, E>,
{
    FnHandler { f }
}

impl<F, T, E> ResponseHandler for FnHandler<F>
where
    F: Fn(RawResponse) -> Result<T, E> + Send + Sync,
    T: Send,
    E: fmt::Display,
{
    type Output = T;

    fn handle(&self, response: RawResponse) -> Result<T, String> {
        (self.f)(response).map_err(|e| e.to_string())
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnHandler")
    }
}

/// Splice every successful slot's items into one sequence.
///
/// Intra-slot order and slot order are both preserved. A failed slot passes
/// through as a single `Err` at its position. A successful value that is not
/// a sequence, according to `handler`, becomes a `NotFlattenable` failure.
pub fn flatten_outcomes<H>(
    outcomes: Vec<ExecutionOutcome<H::Output>>,
    descriptors: &[RequestDescriptor],
    handler: &H,
) -> Vec<Outcome<H::Output>>
where
    H: ResponseHandler + ?Sized,
{
    let mut flat = Vec::with_capacity(outcomes.len());

    for (outcome, descriptor) in outcomes.into_iter().zip(descriptors) {
        match outcome.result {
            Ok(value) => match handler.split(value) {
                Ok(items) => flat.extend(items.into_iter().map(Ok)),
                Err(_) => {
                    tracing::warn!(
                        index = descriptor.index(),
                        url = descriptor.url(),
                        "response is not a sequence, cannot flatten"
                    );
                    flat.push(Err(RequestError::new(
                        descriptor.index(),
                        descriptor.method(),
                        descriptor.url(),
                        outcome.attempts,
                        ErrorKind::NotFlattenable,
                    )));
                }
            },
            Err(err) => flat.push(Err(err)),
        }
    }

    flat
}
