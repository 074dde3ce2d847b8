//! Public dispatcher facade.
//!
//! Owns the bounded queue and the consumer thread. Producers call
//! [`Dispatcher::enqueue`] from any thread; it never blocks and never fails
//! with an error: the caller gets an [`EnqueueOutcome`] saying whether the
//! envelope was accepted, shed, or ignored because dispatching is disabled.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use task_dispatcher::config::DispatcherConfig;
//! use task_dispatcher::core::{Dispatcher, TaskEnvelope, TracingSink};
//!
//! let dispatcher = Dispatcher::new(
//!     DispatcherConfig::new().with_max_queue_size(1_000),
//!     Arc::new(my_backend),
//!     Arc::new(TracingSink),
//! )?;
//!
//! let outcome = dispatcher.enqueue(TaskEnvelope::new("emails.send").with_arg("user-42"));
//! if !outcome.is_accepted() {
//!     // shed: the queue was full
//! }
//!
//! dispatcher.join()?; // drains before returning
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::consumer::{Consumer, ConsumerParts, ConsumerState};
use super::sink::{emit, DispatchEvent, DispatchEventKind, DispatchSink};
use super::stats::{DispatchCounters, DispatcherStats};
use super::{DispatchError, TaskBackend, TaskEnvelope, TaskTarget};
use crate::config::DispatcherConfig;
use crate::infra::queue::BoundedQueue;

/// Why an envelope was shed at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The queue was at capacity.
    QueueFull,
    /// The dispatcher has been joined.
    Shutdown,
}

/// Proof that an envelope entered the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueReceipt {
    /// Envelope identifier.
    pub envelope_id: Uuid,
    /// Task the envelope targets.
    pub target: TaskTarget,
    /// Queue size observed before the insert.
    pub queue_len: usize,
}

/// Result of [`Dispatcher::enqueue`].
#[must_use = "a rejected envelope is handed back and is otherwise lost"]
#[derive(Debug)]
pub enum EnqueueOutcome {
    /// Queued; the consumer now owns the envelope.
    Accepted(EnqueueReceipt),
    /// Dispatching is disabled; the envelope is returned untouched.
    Disabled(TaskEnvelope),
    /// Shed; the envelope is returned to the caller.
    Rejected {
        /// The envelope that was not queued.
        envelope: TaskEnvelope,
        /// Why.
        reason: RejectReason,
    },
}

impl EnqueueOutcome {
    /// True for `Accepted` and `Disabled`: from the caller's point of view a
    /// disabled dispatcher accepts everything.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_) | Self::Disabled(_))
    }

    /// True when the envelope was shed.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Rejection reason, if any.
    #[must_use]
    pub const fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Self::Rejected { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Identifier of the envelope this outcome is about.
    #[must_use]
    pub fn envelope_id(&self) -> Uuid {
        match self {
            Self::Accepted(receipt) => receipt.envelope_id,
            Self::Disabled(envelope) | Self::Rejected { envelope, .. } => envelope.id(),
        }
    }

    /// Take back an envelope that was not queued.
    #[must_use]
    pub fn into_envelope(self) -> Option<TaskEnvelope> {
        match self {
            Self::Accepted(_) => None,
            Self::Disabled(envelope) | Self::Rejected { envelope, .. } => Some(envelope),
        }
    }
}

/// Bounded dispatcher: one queue, one consumer thread.
///
/// Dropping the dispatcher joins it, so queued work is drained on a clean
/// shutdown even without an explicit [`Dispatcher::join`].
pub struct Dispatcher {
    config: DispatcherConfig,
    queue: Arc<BoundedQueue<Box<TaskEnvelope>>>,
    consumer: Option<Consumer>,
    sink: Arc<dyn DispatchSink>,
    counters: Arc<DispatchCounters>,
    /// Best-effort debounce: producers race on it, which can at worst
    /// duplicate or skip one alert around a crossing.
    threshold_exceeded: AtomicBool,
    /// Set by `join`. Producers hold the read side across their `put`, so
    /// once the write lock is taken no insert can land after the drain.
    closed: RwLock<bool>,
}

impl Dispatcher {
    /// Build a dispatcher and start its consumer.
    ///
    /// A disabled configuration builds the queue but spawns no thread.
    ///
    /// # Errors
    ///
    /// - `DispatchError::InvalidConfig` if the configuration does not validate
    /// - `DispatchError::Runtime` / `DispatchError::ConsumerSpawn` if the
    ///   consumer cannot be started
    pub fn new(
        config: DispatcherConfig,
        backend: Arc<dyn TaskBackend>,
        sink: Arc<dyn DispatchSink>,
    ) -> Result<Self, DispatchError> {
        config.validate().map_err(DispatchError::InvalidConfig)?;

        let queue = Arc::new(BoundedQueue::new(config.max_queue_size));
        let counters = Arc::new(DispatchCounters::default());

        let consumer = if config.enabled {
            let consumer = Consumer::new(ConsumerParts {
                queue: Arc::clone(&queue),
                backend,
                sink: Arc::clone(&sink),
                counters: Arc::clone(&counters),
                retry: config.retry,
                poll_interval: config.poll_interval(),
                debug: config.debug,
            });
            consumer.start()?;
            Some(consumer)
        } else {
            None
        };

        info!(
            enabled = config.enabled,
            max_queue_size = config.max_queue_size,
            threshold_size = config.threshold_size,
            max_tries = config.retry.max_tries,
            backoff_ms = config.retry.backoff_ms,
            "Dispatcher initialized"
        );

        Ok(Self {
            config,
            queue,
            consumer,
            sink,
            counters,
            threshold_exceeded: AtomicBool::new(false),
            closed: RwLock::new(false),
        })
    }

    /// Start building a dispatcher.
    #[must_use]
    pub fn builder() -> crate::builders::DispatcherBuilder {
        crate::builders::DispatcherBuilder::new()
    }

    /// Queue an envelope without blocking.
    ///
    /// - disabled: returns `Disabled(envelope)` immediately; nothing is
    ///   queued or reported
    /// - joined: `Rejected { reason: Shutdown }`
    /// - full: `Rejected { reason: QueueFull }`
    pub fn enqueue(&self, envelope: TaskEnvelope) -> EnqueueOutcome {
        if !self.config.enabled {
            return EnqueueOutcome::Disabled(envelope);
        }

        DispatchCounters::bump(&self.counters.submitted);
        self.report(DispatchEventKind::Submitted, &envelope);

        let closed = self.closed.read();
        if *closed {
            return self.reject(envelope, RejectReason::Shutdown);
        }

        let queue_len = self.check_threshold(&envelope);
        let envelope_id = envelope.id();
        let target = envelope.target().clone();

        match self.queue.put(Box::new(envelope)) {
            Ok(()) => {
                drop(closed);
                DispatchCounters::bump(&self.counters.accepted);
                if self.config.debug {
                    debug!(task = %target, %envelope_id, queue_len, "Envelope queued");
                }
                emit(
                    self.sink.as_ref(),
                    &DispatchEvent {
                        kind: DispatchEventKind::Accepted,
                        task: target.as_str().to_owned(),
                        envelope_id,
                        created_at_ms: crate::util::clock::now_ms(),
                    },
                );
                EnqueueOutcome::Accepted(EnqueueReceipt {
                    envelope_id,
                    target,
                    queue_len,
                })
            }
            Err(envelope) => {
                drop(closed);
                self.reject(*envelope, RejectReason::QueueFull)
            }
        }
    }

    /// Build an envelope from its parts and queue it.
    pub fn send(
        &self,
        target: impl Into<TaskTarget>,
        countdown: Duration,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
    ) -> EnqueueOutcome {
        self.enqueue(
            TaskEnvelope::new(target)
                .with_countdown(countdown)
                .with_args(args)
                .with_kwargs(kwargs),
        )
    }

    /// Stop accepting envelopes, then block until the consumer has drained
    /// the queue and exited. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::ConsumerPanicked` if the consumer thread died.
    pub fn join(&self) -> Result<(), DispatchError> {
        {
            let mut closed = self.closed.write();
            if !*closed {
                *closed = true;
                info!(queued = self.queue.len(), "Dispatcher shutting down");
            }
        }
        if let Some(consumer) = &self.consumer {
            consumer.join()?;
        }
        Ok(())
    }

    /// Whether envelopes are queued at all.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Configuration this dispatcher was built with.
    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Current queue occupancy (best-effort).
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the threshold alert is currently latched.
    #[must_use]
    pub fn threshold_exceeded(&self) -> bool {
        self.threshold_exceeded.load(Ordering::Relaxed)
    }

    /// Consumer lifecycle state; `Stopped` when disabled.
    #[must_use]
    pub fn consumer_state(&self) -> ConsumerState {
        self.consumer
            .as_ref()
            .map_or(ConsumerState::Stopped, Consumer::state)
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        self.counters
            .snapshot(self.queue.len(), self.queue.capacity())
    }

    fn report(&self, kind: DispatchEventKind, envelope: &TaskEnvelope) {
        emit(self.sink.as_ref(), &DispatchEvent::for_envelope(kind, envelope));
    }

    fn reject(&self, envelope: TaskEnvelope, reason: RejectReason) -> EnqueueOutcome {
        DispatchCounters::bump(&self.counters.rejected);
        warn!(
            task = envelope.task_name(),
            envelope_id = %envelope.id(),
            ?reason,
            queue_len = self.queue.len(),
            "Envelope rejected"
        );
        self.report(DispatchEventKind::Rejected { reason }, &envelope);
        EnqueueOutcome::Rejected { envelope, reason }
    }

    /// Edge-triggered alert on the size seen before insert. Returns that size.
    fn check_threshold(&self, envelope: &TaskEnvelope) -> usize {
        let queue_len = self.queue.len();
        let threshold = self.config.threshold_size;
        if queue_len > threshold {
            if !self.threshold_exceeded.swap(true, Ordering::AcqRel) {
                DispatchCounters::bump(&self.counters.alerts);
                warn!(queue_len, threshold, "Queue size exceeded alert threshold");
                self.report(
                    DispatchEventKind::ThresholdExceeded {
                        queue_len,
                        threshold,
                    },
                    envelope,
                );
            }
        } else if self.threshold_exceeded.load(Ordering::Relaxed) {
            self.threshold_exceeded.store(false, Ordering::Relaxed);
        }
        queue_len
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("queue_len", &self.queue.len())
            .field("consumer", &self.consumer)
            .finish_non_exhaustive()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            error!(error = %e, "Dispatcher drop could not join consumer");
        }
    }
}
