//! Completion progress reporting.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Receives `(completed, total)` after each request reaches a terminal state.
///
/// Calls arrive in completion order with `completed` strictly increasing by
/// one, so the last call always has `completed == total`. No call is made for
/// an empty dispatch.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, completed: usize, total: usize);
}

impl<F> ProgressSink for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn on_progress(&self, completed: usize, total: usize) {
        self(completed, total)
    }
}

/// Discards progress updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _completed: usize, _total: usize) {}
}

/// Remembers the latest update. Handy in tests and for polling from another
/// task.
#[derive(Debug, Default)]
pub struct CountingProgress {
    completed: AtomicUsize,
    total: AtomicUsize,
    calls: AtomicUsize,
}

impl CountingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Number of updates received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProgressSink for CountingProgress {
    fn on_progress(&self, completed: usize, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.completed.store(completed, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}
