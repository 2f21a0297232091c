//! Core data model for signalk-mqtt-push
//!
//! This crate provides:
//! - Path configuration and update events
//! - The delta envelope builder (pure, no I/O)
//! - The `UpdateSource` seam to the host event bus, plus an in-process bus
//! - Signal K delta parsing for feeding that bus

pub mod bus;
pub mod delta;
pub mod envelope;
pub mod model;

// Re-exports
pub use bus::{LocalBus, UpdateSource};
pub use envelope::{delta_topic, Envelope, EnvelopeError, DELTA_TOPIC_PREFIX};
pub use model::{PathConfig, TrailingPolicy, UpdateEvent};

/// Result type for core operations
pub type Result<T> = anyhow::Result<T>;
