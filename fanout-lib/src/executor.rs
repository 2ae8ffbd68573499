//! Retrying executor for a single request.
//!
//! One execution takes a gate permit, performs the network call with a
//! timeout, retries on timeouts only, runs the response handler and gives the
//! permit back. Retries reuse the same permit, so a request never occupies
//! more than one concurrency slot.

use crate::error::{ErrorKind, RequestError};
use crate::gate::ConcurrencyGate;
use crate::transform::ResponseHandler;
use crate::transport::{Transport, TransportError};
use crate::types::{DispatchConfig, RawResponse, RequestDescriptor};
use std::time::Duration;
use tracing::{debug, warn};

/// Terminal result of executing one descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome<T> {
    /// Index of the descriptor this outcome belongs to
    pub index: usize,
    /// Network calls made, including retries
    pub attempts: u32,
    pub result: Result<T, RequestError>,
}

/// Attempt bookkeeping for one descriptor.
#[derive(Debug, Clone, Copy)]
struct RetryState {
    attempts_made: u32,
    retries_left: u32,
}

impl RetryState {
    fn new(max_retries: u32) -> Self {
        Self {
            attempts_made: 0,
            retries_left: max_retries,
        }
    }

    fn begin_attempt(&mut self) {
        self.attempts_made = self.attempts_made.saturating_add(1);
    }

    /// Spend one retry from the budget, if any is left.
    fn take_retry(&mut self) -> bool {
        if self.retries_left == 0 {
            return false;
        }
        self.retries_left -= 1;
        true
    }
}

/// Executes descriptors against a transport under a shared gate.
#[derive(Clone, Copy)]
pub struct RequestExecutor<'a> {
    transport: &'a dyn Transport,
    gate: &'a ConcurrencyGate,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
    raise_for_status: bool,
}

impl<'a> RequestExecutor<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        gate: &'a ConcurrencyGate,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            transport,
            gate,
            timeout: config.timeout,
            max_retries: config.max_retries_on_timeout,
            retry_delay: config.retry_delay,
            raise_for_status: config.raise_for_status,
        }
    }

    /// Run one descriptor to its terminal outcome.
    ///
    /// The permit is held across all retries and released on every exit
    /// path, including the future being dropped mid-flight.
    pub async fn execute<H>(
        &self,
        descriptor: &RequestDescriptor,
        handler: &H,
    ) -> ExecutionOutcome<H::Output>
    where
        H: ResponseHandler + ?Sized,
    {
        let permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => return self.failure(descriptor, 0, ErrorKind::GateClosed),
        };

        let outcome = self.run_attempts(descriptor, handler).await;
        permit.release();
        outcome
    }

    async fn run_attempts<H>(
        &self,
        descriptor: &RequestDescriptor,
        handler: &H,
    ) -> ExecutionOutcome<H::Output>
    where
        H: ResponseHandler + ?Sized,
    {
        let mut retry = RetryState::new(self.max_retries);

        loop {
            retry.begin_attempt();

            let sent = tokio::time::timeout(
                self.timeout,
                self.transport.send(descriptor, self.timeout),
            )
            .await;

            let kind = match sent {
                Ok(Ok(response)) => {
                    return self.finish(descriptor, retry.attempts_made, response, handler)
                }
                Ok(Err(TransportError::Timeout)) | Err(_) => ErrorKind::Timeout {
                    after: self.timeout,
                },
                Ok(Err(err)) => ErrorKind::Transport {
                    message: err.to_string(),
                },
            };

            if kind.is_retryable() && retry.take_retry() {
                debug!(
                    index = descriptor.index(),
                    url = descriptor.url(),
                    attempt = retry.attempts_made,
                    "request timed out, retrying"
                );
                if !self.retry_delay.is_zero() {
                    tokio::time::sleep(self.retry_delay).await;
                }
                continue;
            }

            return self.failure(descriptor, retry.attempts_made, kind);
        }
    }

    fn finish<H>(
        &self,
        descriptor: &RequestDescriptor,
        attempts: u32,
        response: RawResponse,
        handler: &H,
    ) -> ExecutionOutcome<H::Output>
    where
        H: ResponseHandler + ?Sized,
    {
        if self.raise_for_status && !response.is_success() {
            let status = response.status();
            return self.failure(descriptor, attempts, ErrorKind::HttpStatus { status });
        }

        match handler.handle(response) {
            Ok(value) => ExecutionOutcome {
                index: descriptor.index(),
                attempts,
                result: Ok(value),
            },
            Err(message) => {
                self.failure(descriptor, attempts, ErrorKind::ResponseDecode { message })
            }
        }
    }

    fn failure<T>(
        &self,
        descriptor: &RequestDescriptor,
        attempts: u32,
        kind: ErrorKind,
    ) -> ExecutionOutcome<T> {
        warn!(
            index = descriptor.index(),
            method = %descriptor.method(),
            url = descriptor.url(),
            attempts,
            "{} was raised after {} tries: {}",
            kind.label(),
            attempts,
            kind
        );

        ExecutionOutcome {
            index: descriptor.index(),
            attempts,
            result: Err(RequestError::new(
                descriptor.index(),
                descriptor.method(),
                descriptor.url(),
                attempts,
                kind,
            )),
        }
    }
}
