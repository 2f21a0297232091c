//! Durable outgoing message store
//!
//! This crate provides:
//! - Append-only outbox of unacknowledged broker messages (sled embedded DB)
//! - In-order replay by sequence id after a reconnect

pub mod outbox;

// Re-exports
pub use outbox::{OutgoingMessage, Outbox};

/// Result type for outbox operations
pub type Result<T> = anyhow::Result<T>;
