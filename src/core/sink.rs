//! Observability sink for dispatch events.
//!
//! The dispatcher reports every submission, acceptance, rejection, delivery,
//! retry, and drop to an injected [`DispatchSink`], labeled by task name.
//! Metrics backends and alerting live behind this trait; the crate ships a
//! no-op sink, a tracing sink, and a bounded in-memory sink for tests.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{RejectReason, TaskEnvelope};
use crate::util::clock::now_ms;

/// What happened to an envelope (or to the queue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEventKind {
    /// A caller asked to enqueue an envelope.
    Submitted,
    /// The envelope entered the queue.
    Accepted,
    /// The envelope was shed at enqueue time.
    Rejected {
        /// Why it was shed.
        reason: RejectReason,
    },
    /// The backend accepted the envelope.
    Dispatched {
        /// Attempts it took, including the successful one.
        attempts: u32,
    },
    /// A transient backend failure; another attempt follows.
    Retried {
        /// Attempt that failed.
        attempt: u32,
        /// Backend error text.
        error: String,
    },
    /// Retries exhausted; the envelope was discarded.
    Dropped {
        /// Attempts made.
        attempts: u32,
        /// Last backend error text.
        error: String,
    },
    /// Non-transient failure; the envelope was discarded.
    Failed {
        /// Error text (backend error or panic message).
        error: String,
    },
    /// Queue occupancy crossed the alert watermark.
    ThresholdExceeded {
        /// Occupancy observed.
        queue_len: usize,
        /// Configured watermark.
        threshold: usize,
    },
}

impl DispatchEventKind {
    /// Stable counter name for this kind.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Accepted => "accepted",
            Self::Rejected { .. } => "rejected",
            Self::Dispatched { .. } => "dispatched",
            Self::Retried { .. } => "retried",
            Self::Dropped { .. } => "dropped",
            Self::Failed { .. } => "failed",
            Self::ThresholdExceeded { .. } => "threshold_exceeded",
        }
    }
}

/// One observation reported to a sink.
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    /// What happened.
    pub kind: DispatchEventKind,
    /// Task name label.
    pub task: String,
    /// Envelope involved.
    pub envelope_id: Uuid,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
}

impl DispatchEvent {
    /// Build an event for `envelope`.
    #[must_use]
    pub fn for_envelope(kind: DispatchEventKind, envelope: &TaskEnvelope) -> Self {
        Self {
            kind,
            task: envelope.task_name().to_owned(),
            envelope_id: envelope.id(),
            created_at_ms: now_ms(),
        }
    }
}

/// Receiver of dispatch events.
///
/// Called from producer threads and from the consumer thread, so
/// implementations must be cheap and must not block for long. A panicking sink
/// is contained by the dispatcher and never reaches the dispatch path.
pub trait DispatchSink: Send + Sync {
    /// Record one event.
    fn record(&self, event: &DispatchEvent);
}

/// Sink that discards everything. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl DispatchSink for NoopSink {
    fn record(&self, _event: &DispatchEvent) {}
}

/// Sink that writes each event as a structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DispatchSink for TracingSink {
    fn record(&self, event: &DispatchEvent) {
        let task = event.task.as_str();
        let envelope_id = event.envelope_id;
        match &event.kind {
            DispatchEventKind::Rejected { reason } => {
                warn!(task, %envelope_id, ?reason, "Envelope rejected");
            }
            DispatchEventKind::Dropped { attempts, error } => {
                error!(task, %envelope_id, attempts, error = %error, "Envelope dropped after retries");
            }
            DispatchEventKind::Failed { error } => {
                error!(task, %envelope_id, error = %error, "Envelope dispatch failed");
            }
            DispatchEventKind::ThresholdExceeded { queue_len, threshold } => {
                warn!(task, queue_len, threshold, "Queue size over alert threshold");
            }
            DispatchEventKind::Retried { attempt, error } => {
                info!(task, %envelope_id, attempt, error = %error, "Retrying envelope");
            }
            kind => debug!(task, %envelope_id, event = kind.name(), "Dispatch event"),
        }
    }
}

struct InMemoryState {
    events: VecDeque<DispatchEvent>,
    counts: HashMap<(&'static str, String), u64>,
}

/// In-memory sink for testing and dev.
///
/// Keeps the last `max_events` events and unbounded per-task counters.
pub struct InMemorySink {
    max_events: usize,
    state: Mutex<InMemoryState>,
}

impl InMemorySink {
    /// Create a new in-memory sink with a bounded event buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events,
            state: Mutex::new(InMemoryState {
                events: VecDeque::with_capacity(max_events.min(1024)),
                counts: HashMap::new(),
            }),
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<DispatchEvent> {
        self.state.lock().events.iter().cloned().collect()
    }

    /// Counter for one event kind and task name.
    #[must_use]
    pub fn count(&self, kind: &str, task: &str) -> u64 {
        self.state
            .lock()
            .counts
            .iter()
            .filter(|((k, t), _)| *k == kind && t == task)
            .map(|(_, n)| *n)
            .sum()
    }

    /// Counter for one event kind across all tasks.
    #[must_use]
    pub fn total(&self, kind: &str) -> u64 {
        self.state
            .lock()
            .counts
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, n)| *n)
            .sum()
    }
}

impl std::fmt::Debug for InMemorySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySink")
            .field("max_events", &self.max_events)
            .field("buffered", &self.state.lock().events.len())
            .finish()
    }
}

impl DispatchSink for InMemorySink {
    fn record(&self, event: &DispatchEvent) {
        let mut state = self.state.lock();
        *state
            .counts
            .entry((event.kind.name(), event.task.clone()))
            .or_insert(0) += 1;
        if self.max_events == 0 {
            return;
        }
        if state.events.len() >= self.max_events {
            state.events.pop_front();
        }
        state.events.push_back(event.clone());
    }
}

/// Record `event`, containing any panic raised by the sink.
pub(crate) fn emit(sink: &dyn DispatchSink, event: &DispatchEvent) {
    if panic::catch_unwind(AssertUnwindSafe(|| sink.record(event))).is_err() {
        error!(
            task = %event.task,
            event = event.kind.name(),
            "Dispatch sink panicked; event lost"
        );
    }
}
