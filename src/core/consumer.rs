//! Background consumer draining the queue into the backend.
//!
//! One OS thread per dispatcher. The thread owns a single-threaded tokio
//! runtime that drives backend submissions and retry backoff, so nothing here
//! ever runs on a producer thread.
//!
//! # Lifecycle
//!
//! - `Stopped -> Running` on [`Consumer::start`]
//! - `Running -> Draining` once [`Consumer::pause`] is observed: the loop stops
//!   polling and empties whatever is still queued
//! - `Draining -> Stopped` when the queue is empty and the thread returns

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tracing::{debug, error, info, warn};

use super::sink::{emit, DispatchEvent, DispatchEventKind, DispatchSink};
use super::stats::DispatchCounters;
use super::{BackendError, DispatchError, DispatchHandle, TaskBackend, TaskEnvelope};
use crate::config::RetryPolicy;
use crate::infra::queue::BoundedQueue;

/// Name given to the consumer thread.
pub const CONSUMER_THREAD_NAME: &str = "task-dispatch-consumer";

/// Consumer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConsumerState {
    /// Not polling; either never started or finished.
    Stopped = 0,
    /// Polling the queue.
    Running = 1,
    /// Stop requested; emptying the queue before exit.
    Draining = 2,
}

impl ConsumerState {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// State shared between the consumer handle and its thread.
struct ConsumerShared {
    queue: Arc<BoundedQueue<Box<TaskEnvelope>>>,
    backend: Arc<dyn TaskBackend>,
    sink: Arc<dyn DispatchSink>,
    counters: Arc<DispatchCounters>,
    retry: RetryPolicy,
    poll_interval: Duration,
    debug: bool,
    running: AtomicBool,
    state: AtomicU8,
}

/// How a single envelope left the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Delivery {
    Dispatched { attempts: u32 },
    Dropped { attempts: u32 },
    Failed,
}

impl ConsumerShared {
    fn state(&self) -> ConsumerState {
        ConsumerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn report(&self, kind: DispatchEventKind, envelope: &TaskEnvelope) {
        emit(self.sink.as_ref(), &DispatchEvent::for_envelope(kind, envelope));
    }

    /// Poll loop, then drain. Runs on the consumer thread.
    fn run(&self, rt: &Runtime) {
        while self.running.load(Ordering::Acquire) {
            // Timeout keeps the flag check responsive; no poison pill needed.
            if let Some(envelope) = self.queue.get(self.poll_interval) {
                self.process(rt, *envelope);
            }
        }

        self.set_state(ConsumerState::Draining);
        let (mut delivered, mut lost) = (0_usize, 0_usize);
        while let Some(envelope) = self.queue.try_get() {
            if self.process(rt, *envelope) {
                delivered += 1;
            } else {
                lost += 1;
            }
        }
        info!(delivered, lost, "Consumer drained queue");
        self.set_state(ConsumerState::Stopped);
    }

    /// Dispatch one envelope; true when the backend took it.
    fn process(&self, rt: &Runtime, envelope: TaskEnvelope) -> bool {
        match self.dispatch(rt, envelope) {
            Delivery::Dispatched { attempts } => {
                if attempts > 1 {
                    info!(attempts, "Envelope delivered after retries");
                }
                true
            }
            Delivery::Dropped { attempts } => {
                debug!(attempts, "Envelope lost to retry exhaustion");
                false
            }
            Delivery::Failed => false,
        }
    }

    /// Deliver one envelope, retrying transient failures.
    fn dispatch(&self, rt: &Runtime, envelope: TaskEnvelope) -> Delivery {
        let envelope = Arc::new(envelope);
        let max_tries = self.retry.max_tries.max(1);
        let mut attempt = 0_u32;

        loop {
            attempt += 1;
            let result = rt.block_on(submit_isolated(
                Arc::clone(&self.backend),
                Arc::clone(&envelope),
            ));

            match result {
                Ok(handle) => {
                    DispatchCounters::bump(&self.counters.dispatched);
                    if self.debug {
                        debug!(
                            task = envelope.task_name(),
                            envelope_id = %envelope.id(),
                            backend_id = %handle.task_id,
                            attempt,
                            "Envelope dispatched"
                        );
                    }
                    self.report(DispatchEventKind::Dispatched { attempts: attempt }, &envelope);
                    return Delivery::Dispatched { attempts: attempt };
                }
                Err(BackendError::Transient(msg)) if attempt < max_tries => {
                    DispatchCounters::bump(&self.counters.retried);
                    warn!(
                        task = envelope.task_name(),
                        envelope_id = %envelope.id(),
                        attempt,
                        max_tries,
                        error = %msg,
                        "Transient backend failure, retrying"
                    );
                    self.report(
                        DispatchEventKind::Retried {
                            attempt,
                            error: msg,
                        },
                        &envelope,
                    );
                    rt.block_on(tokio::time::sleep(self.retry.backoff()));
                }
                Err(BackendError::Transient(msg)) => {
                    DispatchCounters::bump(&self.counters.dropped);
                    error!(
                        task = envelope.task_name(),
                        envelope_id = %envelope.id(),
                        attempts = attempt,
                        error = %msg,
                        "Retries exhausted, dropping envelope"
                    );
                    self.report(
                        DispatchEventKind::Dropped {
                            attempts: attempt,
                            error: msg,
                        },
                        &envelope,
                    );
                    return Delivery::Dropped { attempts: attempt };
                }
                Err(BackendError::Permanent(msg)) => {
                    DispatchCounters::bump(&self.counters.failed);
                    error!(
                        task = envelope.task_name(),
                        envelope_id = %envelope.id(),
                        attempt,
                        error = %msg,
                        "Envelope dispatch failed"
                    );
                    self.report(DispatchEventKind::Failed { error: msg }, &envelope);
                    return Delivery::Failed;
                }
            }
        }
    }
}

/// Run one backend call as its own task so a panic surfaces as a `JoinError`
/// instead of unwinding through the consumer loop.
async fn submit_isolated(
    backend: Arc<dyn TaskBackend>,
    envelope: Arc<TaskEnvelope>,
) -> Result<DispatchHandle, BackendError> {
    let task = tokio::spawn(async move { backend.submit(&envelope).await });
    match task.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(BackendError::Permanent(format!(
            "backend panicked: {}",
            panic_message(&*e.into_panic())
        ))),
        Err(e) => Err(BackendError::Permanent(format!("backend task aborted: {e}"))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Handle to the background consumer thread.
pub struct Consumer {
    shared: Arc<ConsumerShared>,
    started: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Everything a consumer needs from its dispatcher.
pub(crate) struct ConsumerParts {
    pub queue: Arc<BoundedQueue<Box<TaskEnvelope>>>,
    pub backend: Arc<dyn TaskBackend>,
    pub sink: Arc<dyn DispatchSink>,
    pub counters: Arc<DispatchCounters>,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub debug: bool,
}

impl Consumer {
    pub(crate) fn new(parts: ConsumerParts) -> Self {
        Self {
            shared: Arc::new(ConsumerShared {
                queue: parts.queue,
                backend: parts.backend,
                sink: parts.sink,
                counters: parts.counters,
                retry: parts.retry,
                poll_interval: parts.poll_interval,
                debug: parts.debug,
                running: AtomicBool::new(false),
                state: AtomicU8::new(ConsumerState::Stopped as u8),
            }),
            started: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the consumer thread.
    ///
    /// # Errors
    ///
    /// - `DispatchError::AlreadyStarted` on a second call
    /// - `DispatchError::Runtime` if the thread's runtime cannot be built
    /// - `DispatchError::ConsumerSpawn` if the OS refuses the thread
    pub fn start(&self) -> Result<(), DispatchError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(DispatchError::AlreadyStarted);
        }

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DispatchError::Runtime(e.to_string()))?;

        self.shared.running.store(true, Ordering::Release);
        self.shared.set_state(ConsumerState::Running);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(CONSUMER_THREAD_NAME.into())
            .spawn(move || {
                debug!("Consumer thread started");
                shared.run(&rt);
                debug!("Consumer thread exiting");
            });

        match spawned {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.set_state(ConsumerState::Stopped);
                Err(DispatchError::ConsumerSpawn(e.to_string()))
            }
        }
    }

    /// Ask the loop to stop polling. Items already queued are still drained
    /// before the thread exits.
    pub fn pause(&self) {
        self.shared.running.store(false, Ordering::Release);
    }

    /// Pause and wait for the thread to finish draining.
    ///
    /// Called from the consumer thread itself (a backend dropping the last
    /// dispatcher reference), this only pauses: the loop drains on its own
    /// once the current envelope returns.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::ConsumerPanicked` if the thread died.
    pub fn join(&self) -> Result<(), DispatchError> {
        self.pause();
        let Some(handle) = self.handle.lock().take() else {
            return Ok(());
        };
        if handle.thread().id() == thread::current().id() {
            debug!("Join requested from the consumer thread; detaching");
            return Ok(());
        }
        if handle.join().is_err() {
            self.shared.set_state(ConsumerState::Stopped);
            error!("Consumer thread panicked");
            return Err(DispatchError::ConsumerPanicked);
        }
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConsumerState {
        self.shared.state()
    }

    /// Whether the poll loop is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("state", &self.state())
            .field("retry", &self.shared.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sink::InMemorySink;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Fails transiently `fail_first` times, then succeeds.
    struct FlakyBackend {
        fail_first: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl TaskBackend for FlakyBackend {
        async fn submit(&self, envelope: &TaskEnvelope) -> Result<DispatchHandle, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(BackendError::Transient(format!("attempt {n}")))
            } else {
                Ok(DispatchHandle::new(envelope.id().to_string()))
            }
        }
    }

    struct PanicBackend;

    #[async_trait]
    impl TaskBackend for PanicBackend {
        async fn submit(&self, _envelope: &TaskEnvelope) -> Result<DispatchHandle, BackendError> {
            panic!("boom");
        }
    }

    fn shared(backend: Arc<dyn TaskBackend>, max_tries: u32) -> (ConsumerShared, Arc<InMemorySink>) {
        let sink = Arc::new(InMemorySink::new(100));
        let shared = ConsumerShared {
            queue: Arc::new(BoundedQueue::new(8)),
            backend,
            sink: sink.clone(),
            counters: Arc::new(DispatchCounters::default()),
            retry: RetryPolicy {
                max_tries,
                backoff_ms: 1,
            },
            poll_interval: Duration::from_millis(10),
            debug: true,
            running: AtomicBool::new(false),
            state: AtomicU8::new(0),
        };
        (shared, sink)
    }

    fn runtime() -> Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_dispatch_retries_then_succeeds() {
        let backend = Arc::new(FlakyBackend {
            fail_first: 2,
            calls: AtomicU32::new(0),
        });
        let (shared, sink) = shared(backend.clone(), 5);

        let outcome = shared.dispatch(&runtime(), TaskEnvelope::new("t"));

        assert_eq!(outcome, Delivery::Dispatched { attempts: 3 });
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.total("retried"), 2);
        assert_eq!(sink.total("dispatched"), 1);
        assert_eq!(sink.total("dropped"), 0);
    }

    #[test]
    fn test_dispatch_drops_after_max_tries() {
        let backend = Arc::new(FlakyBackend {
            fail_first: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let (shared, sink) = shared(backend.clone(), 4);

        let outcome = shared.dispatch(&runtime(), TaskEnvelope::new("t"));

        assert_eq!(outcome, Delivery::Dropped { attempts: 4 });
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
        assert_eq!(sink.count("dropped", "t"), 1);
        assert_eq!(shared.counters.dropped.load(Ordering::Relaxed), 1);
    }

    /// Always fails transiently and records when each attempt arrived.
    #[derive(Default)]
    struct TimedBackend {
        calls: Mutex<Vec<std::time::Instant>>,
    }

    #[async_trait]
    impl TaskBackend for TimedBackend {
        async fn submit(&self, _envelope: &TaskEnvelope) -> Result<DispatchHandle, BackendError> {
            self.calls.lock().push(std::time::Instant::now());
            Err(BackendError::Transient("broker unreachable".into()))
        }
    }

    #[test]
    fn test_dispatch_sleeps_backoff_between_attempts() {
        let backend = Arc::new(TimedBackend::default());
        let (mut shared, sink) = shared(backend.clone(), 3);
        shared.retry.backoff_ms = 50;

        let start = std::time::Instant::now();
        let outcome = shared.dispatch(&runtime(), TaskEnvelope::new("t"));
        let elapsed = start.elapsed();

        assert_eq!(outcome, Delivery::Dropped { attempts: 3 });
        assert!(elapsed >= Duration::from_millis(100), "elapsed {elapsed:?}");

        let calls = backend.calls.lock();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(50));
        }
        assert_eq!(sink.total("retried"), 2);
    }

    #[test]
    fn test_backend_panic_is_contained() {
        let (shared, sink) = shared(Arc::new(PanicBackend), 3);
        let rt = runtime();

        assert_eq!(shared.dispatch(&rt, TaskEnvelope::new("t")), Delivery::Failed);
        assert_eq!(shared.dispatch(&rt, TaskEnvelope::new("t")), Delivery::Failed);
        assert_eq!(sink.total("failed"), 2);

        let events = sink.events();
        assert!(matches!(
            &events[0].kind,
            DispatchEventKind::Failed { error } if error.contains("boom")
        ));
    }

    #[test]
    fn test_start_twice_fails_and_join_drains() {
        let backend = Arc::new(FlakyBackend {
            fail_first: 0,
            calls: AtomicU32::new(0),
        });
        let (shared, sink) = shared(backend.clone(), 1);
        let queue = Arc::clone(&shared.queue);
        let consumer = Consumer {
            shared: Arc::new(shared),
            started: AtomicBool::new(false),
            handle: Mutex::new(None),
        };

        assert_eq!(consumer.state(), ConsumerState::Stopped);
        consumer.start().unwrap();
        assert!(matches!(consumer.start(), Err(DispatchError::AlreadyStarted)));
        assert!(consumer.is_running());

        for _ in 0..5 {
            queue.put(Box::new(TaskEnvelope::new("t"))).unwrap();
        }
        consumer.join().unwrap();

        assert_eq!(consumer.state(), ConsumerState::Stopped);
        assert!(queue.is_empty());
        assert_eq!(sink.total("dispatched"), 5);
        // Second join is a no-op.
        consumer.join().unwrap();
    }
}
