//! review-watch library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the observer binary,
//! allowing integration tests to access internal types.

pub mod client;
pub mod config;
pub mod observer;

// Re-export key types for convenience
pub use client::{calculate_backoff, PushClient, ReconnectConfig, MAX_MESSAGE_SIZE};
pub use config::{ResolvedConfig, WatchConfig};
pub use observer::SpecObserver;
