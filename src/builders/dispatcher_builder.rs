//! Builder wiring a backend, a sink, and configuration into a dispatcher.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::DispatcherConfig;
use crate::core::{
    BackendError, DispatchError, DispatchHandle, DispatchSink, Dispatcher, NoopSink, TaskBackend,
    TaskEnvelope,
};

/// Stand-in backend for disabled dispatchers, which never dispatch.
struct DisabledBackend;

#[async_trait]
impl TaskBackend for DisabledBackend {
    async fn submit(&self, _envelope: &TaskEnvelope) -> Result<DispatchHandle, BackendError> {
        Err(BackendError::Permanent("dispatching is disabled".into()))
    }
}

/// Step-by-step construction of a [`Dispatcher`].
///
/// A backend is required unless the configuration is disabled. The sink
/// defaults to [`NoopSink`].
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    backend: Option<Arc<dyn TaskBackend>>,
    sink: Arc<dyn DispatchSink>,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherBuilder {
    /// Builder with default configuration and a no-op sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: DispatcherConfig::default(),
            backend: None,
            sink: Arc::new(NoopSink),
        }
    }

    /// Use `config`.
    #[must_use]
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Dispatch to `backend`.
    #[must_use]
    pub fn backend(mut self, backend: impl TaskBackend) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Dispatch to an already shared backend.
    #[must_use]
    pub fn shared_backend(mut self, backend: Arc<dyn TaskBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Report events to `sink`.
    #[must_use]
    pub fn sink(mut self, sink: impl DispatchSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Report events to an already shared sink.
    #[must_use]
    pub fn shared_sink(mut self, sink: Arc<dyn DispatchSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Build and start the dispatcher.
    ///
    /// # Errors
    ///
    /// - `DispatchError::InvalidConfig` if enabled without a backend or the
    ///   configuration does not validate
    /// - any error from [`Dispatcher::new`]
    pub fn build(self) -> Result<Dispatcher, DispatchError> {
        let backend: Arc<dyn TaskBackend> = match self.backend {
            Some(backend) => backend,
            None if !self.config.enabled => Arc::new(DisabledBackend),
            None => {
                return Err(DispatchError::InvalidConfig(
                    "a backend is required when dispatching is enabled".into(),
                ))
            }
        };
        Dispatcher::new(self.config, backend, self.sink)
    }
}

impl std::fmt::Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherBuilder")
            .field("config", &self.config)
            .field("has_backend", &self.backend.is_some())
            .finish_non_exhaustive()
    }
}
