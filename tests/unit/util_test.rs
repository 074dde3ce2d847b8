//! Tests for utility functions

use task_dispatcher::util::clock::now_ms;
use task_dispatcher::util::telemetry::{default_directive, init_tracing};

#[test]
fn test_now_ms_advances() {
    let before = now_ms();
    std::thread::sleep(std::time::Duration::from_millis(2));
    assert!(now_ms() > before);
}

#[test]
fn test_default_directive_follows_debug_flag() {
    assert_eq!(default_directive(true), "debug");
    assert_eq!(default_directive(false), "info");
}

#[test]
fn test_init_tracing_twice() {
    init_tracing(true);
    init_tracing(false);
}
