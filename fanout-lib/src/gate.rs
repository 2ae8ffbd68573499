//! Admission control for concurrent requests.
//!
//! The gate is a counting semaphore with RAII permits. It knows nothing about
//! requests and can bound any kind of concurrent work. Waiters are served in
//! FIFO order by the underlying tokio semaphore, so no waiter starves.

use crate::error::FanoutError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds the number of simultaneously held permits.
#[derive(Debug)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    acquisitions: AtomicUsize,
}

/// One unit of admitted concurrency. Released when dropped.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

/// Returned when the gate was closed while waiting for a permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("concurrency gate is closed")]
pub struct GateClosed;

impl ConcurrencyGate {
    /// Create a gate with `capacity` permits.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `capacity` is zero or larger than the
    /// semaphore can represent.
    pub fn new(capacity: usize) -> Result<Self, FanoutError> {
        if capacity == 0 {
            return Err(FanoutError::config(
                "concurrency gate capacity must be at least 1",
            ));
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(FanoutError::config(format!(
                "concurrency gate capacity {} exceeds the maximum of {}",
                capacity,
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            acquisitions: AtomicUsize::new(0),
        })
    }

    /// Wait until fewer than `capacity` permits are held, then take one.
    pub async fn acquire(&self) -> Result<GatePermit, GateClosed> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GateClosed)?;
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        Ok(GatePermit { _permit: permit })
    }

    /// Take a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        Some(GatePermit { _permit: permit })
    }

    /// Stop admitting work. Pending and future `acquire` calls fail with
    /// [`GateClosed`]; permits already held stay valid until dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of permits free right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of permits currently held.
    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// Total permits granted over the gate's lifetime.
    pub fn total_acquired(&self) -> usize {
        self.acquisitions.load(Ordering::Relaxed)
    }
}

impl GatePermit {
    /// Give the permit back. Equivalent to dropping it.
    pub fn release(self) {}
}
