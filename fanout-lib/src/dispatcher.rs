//! Ordered, bounded-concurrency dispatch of request batches.
//!
//! The dispatcher launches one execution per descriptor, lets the shared
//! gate decide how many run at once, and writes every terminal outcome into
//! the slot matching the descriptor's index. Completion order never leaks
//! into the returned sequence.

use crate::error::{DispatchError, FanoutError, RequestError};
use crate::executor::{ExecutionOutcome, RequestExecutor};
use crate::gate::ConcurrencyGate;
use crate::progress::{NoProgress, ProgressSink};
use crate::transform::{flatten_outcomes, ResponseHandler};
use crate::transport::Transport;
use crate::types::{DispatchConfig, RequestDescriptor};
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Terminal state of one result slot.
pub type Outcome<T> = Result<T, RequestError>;

/// Ordered outcomes of one dispatch.
///
/// Without flattening there is exactly one outcome per request, at the
/// request's index. With flattening the outcomes are the concatenation of
/// every slot's items and `len()` may differ from `requests()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Results<T> {
    outcomes: Vec<Outcome<T>>,
    requests: usize,
}

impl<T> Results<T> {
    pub(crate) fn new(outcomes: Vec<Outcome<T>>, requests: usize) -> Self {
        Self { outcomes, requests }
    }

    /// Number of outcomes held.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Number of requests that were dispatched to produce these results.
    pub fn requests(&self) -> usize {
        self.requests
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Outcome<T>> {
        self.outcomes.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Outcome<T>> {
        self.outcomes.get(index)
    }

    /// Successful values, in order.
    pub fn successes(&self) -> impl Iterator<Item = &T> + '_ {
        self.outcomes.iter().filter_map(|outcome| outcome.as_ref().ok())
    }

    /// Failures, in order.
    pub fn failures(&self) -> impl Iterator<Item = &RequestError> + '_ {
        self.outcomes.iter().filter_map(|outcome| outcome.as_ref().err())
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }

    /// True when no slot holds a failure.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(Result::is_ok)
    }

    pub fn into_outcomes(self) -> Vec<Outcome<T>> {
        self.outcomes
    }

    /// All values in order, or the first failure.
    pub fn into_values(self) -> Result<Vec<T>, RequestError> {
        self.outcomes.into_iter().collect()
    }

    /// Splice typed sequences into one list after the fact.
    ///
    /// Failed slots stay in place as a single `Err` each.
    pub fn flatten_into<I>(self) -> Vec<Outcome<I>>
    where
        T: IntoIterator<Item = I>,
    {
        let mut flat = Vec::new();
        for outcome in self.outcomes {
            match outcome {
                Ok(items) => flat.extend(items.into_iter().map(Ok)),
                Err(err) => flat.push(Err(err)),
            }
        }
        flat
    }
}

impl<T> IntoIterator for Results<T> {
    type Item = Outcome<T>;
    type IntoIter = std::vec::IntoIter<Outcome<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Results<T> {
    type Item = &'a Outcome<T>;
    type IntoIter = std::slice::Iter<'a, Outcome<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.iter()
    }
}

/// Fixed-size buffer of result slots, filled by index as work completes.
struct ResultBuffer<T> {
    slots: Vec<Option<ExecutionOutcome<T>>>,
    filled: usize,
}

impl<T> ResultBuffer<T> {
    fn new(size: usize) -> Self {
        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, || None);
        Self { slots, filled: 0 }
    }

    /// Store an outcome in its slot and return how many slots are filled.
    fn store(&mut self, outcome: ExecutionOutcome<T>) -> Result<usize, FanoutError> {
        let index = outcome.index;
        let slot = self.slots.get_mut(index).ok_or_else(|| {
            FanoutError::internal(format!("result index {} is out of range", index))
        })?;
        if slot.is_some() {
            return Err(FanoutError::internal(format!(
                "result slot {} was written twice",
                index
            )));
        }
        *slot = Some(outcome);
        self.filled += 1;
        Ok(self.filled)
    }

    fn into_outcomes(self) -> Result<Vec<ExecutionOutcome<T>>, FanoutError> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    FanoutError::internal(format!("result slot {} was never filled", index))
                })
            })
            .collect()
    }
}

/// Dispatches batches of requests with bounded concurrency.
///
/// A dispatcher owns one [`ConcurrencyGate`] sized to `max_concurrency` and
/// shares it across every dispatch made through it, the same way requests
/// share the transport's connection pool.
///
/// # Example
///
/// ```rust,no_run
/// use fanout_lib::{DispatchConfig, Dispatcher, Json, Method, RequestDescriptor};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let dispatcher = Dispatcher::http(DispatchConfig::default().with_max_concurrency(50))?;
///     let descriptors: Vec<RequestDescriptor> = (0..5)
///         .map(|i| RequestDescriptor::new(i, Method::Get, format!("https://httpbin.org/get?i={}", i)))
///         .collect();
///
///     let results = dispatcher.dispatch(&descriptors, &Json).await?;
///     for value in results.successes() {
///         println!("{}", value);
///     }
///     Ok(())
/// }
/// ```
pub struct Dispatcher {
    config: DispatchConfig,
    transport: Arc<dyn Transport>,
    gate: ConcurrencyGate,
}

impl Dispatcher {
    /// Create a dispatcher over `transport`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is invalid or if the
    /// transport reports a connection limit different from
    /// `max_concurrency`.
    pub fn new(config: DispatchConfig, transport: Arc<dyn Transport>) -> Result<Self, FanoutError> {
        config.validate()?;

        if let Some(limit) = transport.connection_limit() {
            if limit != config.max_concurrency {
                return Err(FanoutError::config(format!(
                    "transport allows {} connections but max_concurrency is {}",
                    limit, config.max_concurrency
                )));
            }
        }

        let gate = ConcurrencyGate::new(config.max_concurrency)?;

        Ok(Self {
            config,
            transport,
            gate,
        })
    }

    /// Create a dispatcher with a reqwest transport built from `config`.
    #[cfg(feature = "http")]
    pub fn http(config: DispatchConfig) -> Result<Self, FanoutError> {
        let transport = crate::transport::HttpTransport::new(&config)?;
        Self::new(config, Arc::new(transport))
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Run every descriptor and collect the outcomes in index order.
    ///
    /// `descriptors[i].index()` must equal `i`. Each response goes through
    /// `handler` before it is stored; with `flatten` enabled the stored
    /// values are then spliced into one sequence by [`ResponseHandler::split`].
    /// Values the handler does not split become `NotFlattenable` failures.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Config`] if the descriptors are not densely indexed.
    ///   No request is issued in that case.
    /// - [`DispatchError::Incomplete`] if any slot ended in failure. The full
    ///   ordered results are attached.
    pub async fn dispatch<H>(
        &self,
        descriptors: &[RequestDescriptor],
        handler: &H,
    ) -> Result<Results<H::Output>, DispatchError<H::Output>>
    where
        H: ResponseHandler + ?Sized,
    {
        self.dispatch_with_progress(descriptors, handler, &NoProgress)
            .await
    }

    /// Same as [`Dispatcher::dispatch`], reporting each completion to
    /// `progress`.
    pub async fn dispatch_with_progress<H, P>(
        &self,
        descriptors: &[RequestDescriptor],
        handler: &H,
        progress: &P,
    ) -> Result<Results<H::Output>, DispatchError<H::Output>>
    where
        H: ResponseHandler + ?Sized,
        P: ProgressSink + ?Sized,
    {
        check_indices(descriptors)?;

        let total = descriptors.len();
        if total == 0 {
            return Ok(Results::new(Vec::new(), 0));
        }

        debug!(
            "Issuing {} {} request(s) with {} max connections...",
            total,
            method_summary(descriptors),
            self.config.max_concurrency
        );

        let executor = RequestExecutor::new(self.transport.as_ref(), &self.gate, &self.config);
        let mut pending: FuturesUnordered<_> = descriptors
            .iter()
            .map(|descriptor| executor.execute(descriptor, handler))
            .collect();

        let mut buffer = ResultBuffer::new(total);
        while let Some(outcome) = pending.next().await {
            let completed = buffer.store(outcome)?;
            progress.on_progress(completed, total);
        }

        let outcomes = buffer.into_outcomes()?;
        let values = if self.config.flatten {
            flatten_outcomes(outcomes, descriptors, handler)
        } else {
            outcomes.into_iter().map(|outcome| outcome.result).collect()
        };

        let results = Results::new(values, total);
        let failed = results.failed_count();
        if failed > 0 {
            warn!("{} of {} request(s) failed", failed, total);
            return Err(DispatchError::Incomplete { failed, results });
        }

        info!("Completed {} request(s)", total);
        Ok(results)
    }

    /// Yield outcomes in index order while later requests are still running.
    ///
    /// At most `max_concurrency` requests are in flight, and a finished
    /// request waits in the stream's buffer until every earlier one has been
    /// yielded. Flattening does not apply to streamed outcomes.
    pub fn stream<'a, H>(
        &'a self,
        descriptors: &'a [RequestDescriptor],
        handler: &'a H,
    ) -> impl Stream<Item = Outcome<H::Output>> + 'a
    where
        H: ResponseHandler + ?Sized,
    {
        let executor = RequestExecutor::new(self.transport.as_ref(), &self.gate, &self.config);

        futures::stream::iter(descriptors)
            .map(move |descriptor| async move {
                executor.execute(descriptor, handler).await.result
            })
            .buffered(self.config.max_concurrency)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

fn check_indices(descriptors: &[RequestDescriptor]) -> Result<(), FanoutError> {
    for (position, descriptor) in descriptors.iter().enumerate() {
        if descriptor.index() != position {
            return Err(FanoutError::config(format!(
                "descriptor at position {} has index {}, indices must be 0..{}",
                position,
                descriptor.index(),
                descriptors.len()
            )));
        }
    }
    Ok(())
}

/// Method name for the dispatch log line, or "mixed".
fn method_summary(descriptors: &[RequestDescriptor]) -> &'static str {
    match descriptors.split_first() {
        Some((first, rest)) if rest.iter().all(|d| d.method() == first.method()) => {
            first.method().as_str()
        }
        Some(_) => "mixed",
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{Method, RawResponse};
    use serde_json::json;

    fn outcome(index: usize) -> ExecutionOutcome<usize> {
        ExecutionOutcome {
            index,
            attempts: 1,
            result: Ok(index),
        }
    }

    #[test]
    fn test_buffer_fills_by_index() {
        let mut buffer = ResultBuffer::new(3);
        assert_eq!(buffer.store(outcome(2)).unwrap(), 1);
        assert_eq!(buffer.store(outcome(0)).unwrap(), 2);
        assert_eq!(buffer.store(outcome(1)).unwrap(), 3);

        let indices: Vec<usize> = buffer
            .into_outcomes()
            .unwrap()
            .into_iter()
            .map(|o| o.index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_buffer_rejects_double_and_missing_writes() {
        let mut buffer = ResultBuffer::new(2);
        buffer.store(outcome(0)).unwrap();
        assert!(matches!(
            buffer.store(outcome(0)),
            Err(FanoutError::Internal { .. })
        ));
        assert!(buffer.store(outcome(5)).is_err());
        assert!(buffer.into_outcomes().is_err());
    }

    #[test]
    fn test_index_check() {
        let good: Vec<_> = (0..3)
            .map(|i| RequestDescriptor::new(i, Method::Get, "http://test.com"))
            .collect();
        assert!(check_indices(&good).is_ok());

        let bad = vec![
            RequestDescriptor::new(0, Method::Get, "http://test.com"),
            RequestDescriptor::new(2, Method::Get, "http://test.com"),
        ];
        assert!(check_indices(&bad).is_err());
    }

    #[test]
    fn test_method_summary() {
        let same = vec![
            RequestDescriptor::new(0, Method::Post, "http://test.com"),
            RequestDescriptor::new(1, Method::Post, "http://test.com"),
        ];
        assert_eq!(method_summary(&same), "POST");

        let mixed = vec![
            RequestDescriptor::new(0, Method::Post, "http://test.com"),
            RequestDescriptor::new(1, Method::Get, "http://test.com"),
        ];
        assert_eq!(method_summary(&mixed), "mixed");
    }

    #[test]
    fn test_results_accessors() {
        let timeout = ErrorKind::Timeout {
            after: std::time::Duration::from_secs(1),
        };
        let failure = RequestError::new(1, Method::Get, "http://test.com/1", 4, timeout);
        let results = Results::new(vec![Ok(json!(1)), Err(failure.clone()), Ok(json!(3))], 3);

        assert_eq!(results.len(), 3);
        assert_eq!(results.requests(), 3);
        assert_eq!(results.failed_count(), 1);
        assert!(!results.is_complete());
        assert_eq!(results.successes().count(), 2);
        assert_eq!(results.get(1), Some(&Err(failure.clone())));
        assert_eq!(results.clone().into_values().unwrap_err(), failure);
    }

    #[test]
    fn test_typed_flatten_after_the_fact() {
        let results: Results<Vec<u32>> =
            Results::new(vec![Ok(vec![1, 2]), Ok(vec![]), Ok(vec![3])], 3);
        let flat: Vec<u32> = results
            .flatten_into()
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(flat, vec![1, 2, 3]);
    }

    #[test]
    fn test_mismatched_connection_limit_is_rejected() {
        struct Limited;

        #[async_trait::async_trait]
        impl Transport for Limited {
            async fn send(
                &self,
                request: &RequestDescriptor,
                _timeout: std::time::Duration,
            ) -> Result<RawResponse, crate::transport::TransportError> {
                Ok(RawResponse::new(request.url(), 200))
            }

            fn connection_limit(&self) -> Option<usize> {
                Some(10)
            }
        }

        let config = DispatchConfig::default().with_max_concurrency(20);
        assert!(matches!(
            Dispatcher::new(config, Arc::new(Limited)),
            Err(FanoutError::Config { .. })
        ));

        let config = DispatchConfig::default().with_max_concurrency(10);
        assert!(Dispatcher::new(config, Arc::new(Limited)).is_ok());
    }
}
