//! Per-path update watching for signalk-mqtt-push
//!
//! This crate provides:
//! - Leading-edge per-path debouncing with optional trailing flush
//! - Subscription handles that tear down listener and timer together

pub mod debounce;

pub use debounce::{PathDebouncer, Subscription};
