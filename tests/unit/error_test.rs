//! Tests for error types

use task_dispatcher::core::{BackendError, DispatchError};

#[test]
fn test_invalid_config_error() {
    let err = DispatchError::InvalidConfig("max_queue_size must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: max_queue_size must be greater than 0"
    );
}

#[test]
fn test_lifecycle_errors() {
    assert_eq!(format!("{}", DispatchError::AlreadyStarted), "consumer already started");
    assert_eq!(format!("{}", DispatchError::NotInitialized), "dispatcher not initialized");
    assert_eq!(format!("{}", DispatchError::ConsumerPanicked), "consumer thread panicked");
}

#[test]
fn test_backend_errors() {
    let err = BackendError::Transient("broker unreachable".to_string());
    assert_eq!(format!("{}", err), "transient backend error: broker unreachable");
    assert!(err.is_transient());

    let err = BackendError::Permanent("unknown task".to_string());
    assert_eq!(format!("{}", err), "backend error: unknown task");
    assert!(!err.is_transient());
}
