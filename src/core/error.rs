//! Error types for dispatcher operations.

use thiserror::Error;

/// Errors produced by dispatcher components.
///
/// A full queue and a disabled dispatcher are not errors; they surface as
/// [`EnqueueOutcome`](crate::core::EnqueueOutcome) variants instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The consumer thread was already started.
    #[error("consumer already started")]
    AlreadyStarted,
    /// The process-wide dispatcher has not been installed.
    #[error("dispatcher not initialized")]
    NotInitialized,
    /// The consumer thread could not be spawned.
    #[error("failed to spawn consumer: {0}")]
    ConsumerSpawn(String),
    /// The consumer thread panicked before it could be joined.
    #[error("consumer thread panicked")]
    ConsumerPanicked,
    /// The consumer's runtime could not be built.
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
