//! Configuration models for the dispatcher, queue, and retry policy.

pub mod dispatcher;

pub use dispatcher::{env, DispatcherConfig, RetryPolicy};
