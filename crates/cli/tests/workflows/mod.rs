//! Workflow integration tests
//!
//! Each module drives a supervisor through a full connection lifecycle.

pub mod delivery;
pub mod shutdown;
