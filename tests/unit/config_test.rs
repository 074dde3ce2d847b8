//! Tests for configuration validation

use std::time::Duration;

use task_dispatcher::config::{env, DispatcherConfig, RetryPolicy};

#[test]
fn test_config_validation() {
    assert!(DispatcherConfig::default().validate().is_ok());
    assert!(DispatcherConfig::new().with_max_queue_size(0).validate().is_err());
    assert!(DispatcherConfig::new().with_max_tries(0).validate().is_err());
    assert!(DispatcherConfig::new()
        .with_poll_interval(Duration::ZERO)
        .validate()
        .is_err());
}

#[test]
fn test_threshold_may_exceed_capacity() {
    // The alert then simply never fires.
    let cfg = DispatcherConfig::new()
        .with_max_queue_size(10)
        .with_threshold_size(1_000);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "enabled": true,
        "debug": true,
        "max_queue_size": 64,
        "threshold_size": 48,
        "poll_interval_ms": 250,
        "retry": { "max_tries": 5, "backoff_ms": 100 }
    }"#;

    let cfg = DispatcherConfig::from_json_str(json).unwrap();
    assert!(cfg.debug);
    assert_eq!(cfg.max_queue_size, 64);
    assert_eq!(cfg.threshold_size, 48);
    assert_eq!(cfg.poll_interval(), Duration::from_millis(250));
    assert_eq!(
        cfg.retry,
        RetryPolicy {
            max_tries: 5,
            backoff_ms: 100
        }
    );
}

#[test]
fn test_config_from_json_fills_defaults() {
    let cfg = DispatcherConfig::from_json_str(r#"{ "max_queue_size": 8 }"#).unwrap();
    assert_eq!(cfg.max_queue_size, 8);
    assert!(cfg.enabled);
    assert_eq!(cfg.retry, RetryPolicy::default());
}

#[test]
fn test_config_from_json_errors() {
    let err = DispatcherConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"));

    let err = DispatcherConfig::from_json_str(r#"{ "retry": { "max_tries": 0 } }"#).unwrap_err();
    assert!(err.contains("max_tries"));
}

#[test]
fn test_config_from_lookup_empty_uses_defaults() {
    let cfg = DispatcherConfig::from_lookup(|_| None).unwrap();
    assert_eq!(cfg, DispatcherConfig::default());
}

#[test]
fn test_config_from_lookup_bool_spellings() {
    for (raw, expected) in [("TRUE", true), ("yes", true), ("0", false), ("", false)] {
        let cfg = DispatcherConfig::from_lookup(|key| {
            (key == env::DEBUG).then(|| raw.to_string())
        })
        .unwrap();
        assert_eq!(cfg.debug, expected, "value {raw:?}");
    }
}
