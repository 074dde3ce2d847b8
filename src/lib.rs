//! # Task Dispatcher
//!
//! A bounded, in-process task dispatcher that decouples task submission from a
//! message broker.
//!
//! Producers on any thread hand [`TaskEnvelope`](core::TaskEnvelope)s to a
//! [`Dispatcher`](core::Dispatcher). The dispatcher puts them into a
//! fixed-capacity queue without ever blocking the caller; a single background
//! consumer thread drains the queue into a [`TaskBackend`](core::TaskBackend),
//! retrying transient failures with a bounded budget.
//!
//! ## Core Problem Solved
//!
//! Request handlers that fan work out to a broker should not stall when the
//! broker is slow or briefly unreachable:
//!
//! - **Non-blocking submission**: `enqueue` either accepts or sheds immediately
//! - **Bounded memory**: the queue never grows past its capacity
//! - **Transient failure tolerance**: fixed-backoff retries on the consumer thread
//! - **Clean shutdown**: joining drains everything still queued
//!
//! ## Key Features
//!
//! - **Load shedding**: a full queue rejects new envelopes and hands them back
//! - **Debounced alerting**: one alert per upward crossing of the size watermark
//! - **Observability seam**: every submission, delivery, retry and drop is
//!   reported to an injected [`DispatchSink`](core::DispatchSink), labeled by task
//! - **Process-wide instance**: [`global`] builds one dispatcher from the
//!   environment and drains it when the initializing handle drops
//! - **Kill switch**: a disabled dispatcher turns `enqueue` into a no-op
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use task_dispatcher::config::DispatcherConfig;
//! use task_dispatcher::core::{Dispatcher, TaskEnvelope, TracingSink};
//!
//! let dispatcher = Dispatcher::builder()
//!     .config(DispatcherConfig::from_env()?)
//!     .backend(my_broker_backend)
//!     .sink(TracingSink)
//!     .build()?;
//!
//! let outcome = dispatcher.enqueue(
//!     TaskEnvelope::new("emails.send")
//!         .with_countdown(std::time::Duration::from_secs(30))
//!         .with_kwarg("user_id", 42),
//! );
//! assert!(outcome.is_accepted());
//!
//! dispatcher.join()?;
//! ```
//!
//! For complete examples, see:
//! - `tests/dispatcher_test.rs` - End-to-end behavior
//! - `tests/global_test.rs` - Process-wide instance

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core dispatch abstractions: envelopes, backend, consumer, and facade.
pub mod core;
/// Configuration models for the dispatcher and retry policy.
pub mod config;
/// Builders to construct dispatchers from configuration.
pub mod builders;
/// Infrastructure adapters for queues.
pub mod infra;
/// Process-wide dispatcher accessor.
pub mod global;
/// Shared utilities.
pub mod util;
