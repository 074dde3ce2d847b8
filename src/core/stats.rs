//! Dispatcher counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time view of dispatcher activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    /// Envelopes currently waiting in the queue.
    pub queued: usize,

    /// Queue capacity.
    pub capacity: usize,

    /// Envelopes callers asked to enqueue.
    pub submitted: u64,

    /// Envelopes that entered the queue.
    pub accepted: u64,

    /// Envelopes shed at enqueue time.
    pub rejected: u64,

    /// Envelopes the backend accepted.
    pub dispatched: u64,

    /// Transient failures that led to another attempt.
    pub retried: u64,

    /// Envelopes discarded after exhausting retries.
    pub dropped: u64,

    /// Envelopes discarded after a permanent failure.
    pub failed: u64,

    /// Threshold alerts raised.
    pub alerts: u64,
}

/// Internal counters for dispatcher statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct DispatchCounters {
    pub submitted: AtomicU64,
    pub accepted: AtomicU64,
    pub rejected: AtomicU64,
    pub dispatched: AtomicU64,
    pub retried: AtomicU64,
    pub dropped: AtomicU64,
    pub failed: AtomicU64,
    pub alerts: AtomicU64,
}

impl DispatchCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, queued: usize, capacity: usize) -> DispatcherStats {
        DispatcherStats {
            queued,
            capacity,
            submitted: self.submitted.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            alerts: self.alerts.load(Ordering::Relaxed),
        }
    }
}
