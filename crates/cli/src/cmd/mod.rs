//! CLI command implementations

pub mod config;
pub mod outbox;
pub mod run;
