//! Task-execution backend abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::TaskEnvelope;

/// Failure reported by a backend for one submission.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Try again later (broker unreachable, connection reset, ...).
    #[error("transient backend error: {0}")]
    Transient(String),
    /// Any other failure; the envelope will not be retried.
    #[error("backend error: {0}")]
    Permanent(String),
}

impl BackendError {
    /// Whether the consumer should retry this submission.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Handle returned by a backend for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchHandle {
    /// Backend-assigned task identifier.
    pub task_id: String,
}

impl DispatchHandle {
    /// Wrap a backend task identifier.
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
        }
    }
}

/// External system that actually runs the work (typically a message broker).
///
/// The consumer calls `submit` from its own thread, one envelope at a time, on
/// a dedicated single-threaded runtime. Implementations must honor
/// [`TaskEnvelope::countdown`] themselves.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use task_dispatcher::core::{BackendError, DispatchHandle, TaskBackend, TaskEnvelope};
///
/// struct BrokerBackend { client: BrokerClient }
///
/// #[async_trait]
/// impl TaskBackend for BrokerBackend {
///     async fn submit(&self, envelope: &TaskEnvelope) -> Result<DispatchHandle, BackendError> {
///         self.client
///             .publish(envelope.task_name(), envelope)
///             .await
///             .map(DispatchHandle::new)
///             .map_err(|e| if e.is_connection() {
///                 BackendError::Transient(e.to_string())
///             } else {
///                 BackendError::Permanent(e.to_string())
///             })
///     }
/// }
/// ```
#[async_trait]
pub trait TaskBackend: Send + Sync + 'static {
    /// Submit one envelope for execution.
    async fn submit(&self, envelope: &TaskEnvelope) -> Result<DispatchHandle, BackendError>;
}
