//! Core dispatch abstractions: envelopes, backend seam, consumer, and facade.

pub mod backend;
pub mod consumer;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod sink;
pub mod stats;

pub use backend::{BackendError, DispatchHandle, TaskBackend};
pub use consumer::{Consumer, ConsumerState, CONSUMER_THREAD_NAME};
pub use dispatcher::{Dispatcher, EnqueueOutcome, EnqueueReceipt, RejectReason};
pub use envelope::{TaskEnvelope, TaskTarget};
pub use error::{AppResult, DispatchError};
pub use sink::{DispatchEvent, DispatchEventKind, DispatchSink, InMemorySink, NoopSink, TracingSink};
pub use stats::DispatcherStats;
