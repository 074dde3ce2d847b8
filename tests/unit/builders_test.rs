//! Tests for dispatcher builders

use std::sync::Arc;

use async_trait::async_trait;
use task_dispatcher::builders::DispatcherBuilder;
use task_dispatcher::config::DispatcherConfig;
use task_dispatcher::core::{
    BackendError, ConsumerState, DispatchError, DispatchHandle, Dispatcher, EnqueueOutcome,
    InMemorySink, TaskBackend, TaskEnvelope,
};

struct OkBackend;

#[async_trait]
impl TaskBackend for OkBackend {
    async fn submit(&self, envelope: &TaskEnvelope) -> Result<DispatchHandle, BackendError> {
        Ok(DispatchHandle::new(envelope.id().to_string()))
    }
}

#[test]
fn test_build_requires_backend_when_enabled() {
    let err = DispatcherBuilder::new().build().unwrap_err();
    assert!(matches!(err, DispatchError::InvalidConfig(_)));
}

#[test]
fn test_build_disabled_without_backend() {
    let dispatcher = Dispatcher::builder()
        .config(DispatcherConfig::new().with_enabled(false))
        .build()
        .unwrap();

    assert!(!dispatcher.is_enabled());
    assert!(matches!(
        dispatcher.enqueue(TaskEnvelope::new("t")),
        EnqueueOutcome::Disabled(_)
    ));
}

#[test]
fn test_build_with_backend_and_sink() {
    let sink = Arc::new(InMemorySink::new(16));
    let dispatcher = DispatcherBuilder::new()
        .config(DispatcherConfig::new().with_max_queue_size(4))
        .backend(OkBackend)
        .shared_sink(sink.clone())
        .build()
        .unwrap();

    assert_eq!(dispatcher.consumer_state(), ConsumerState::Running);
    assert!(dispatcher.enqueue(TaskEnvelope::new("t")).is_accepted());
    dispatcher.join().unwrap();

    assert_eq!(dispatcher.consumer_state(), ConsumerState::Stopped);
    assert_eq!(sink.count("dispatched", "t"), 1);
    assert_eq!(dispatcher.stats().capacity, 4);
}
