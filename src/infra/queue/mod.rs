//! Queue backends.

pub mod bounded;

pub use bounded::BoundedQueue;
