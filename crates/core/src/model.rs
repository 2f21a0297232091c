//! Path configuration and update events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// What happens to a value buffered inside a debounce window when it closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailingPolicy {
    /// Forward the latest buffered value and open a new window
    #[default]
    Flush,
    /// Discard the buffered value (leading edge only)
    Drop,
}

/// One monitored data path and its minimum emission interval
#[derive(Debug, Clone, PartialEq)]
pub struct PathConfig {
    /// Dotted Signal K path, e.g. `navigation.position`
    pub path: String,
    /// Minimum time between two forwarded updates (zero = no limit)
    pub interval: Duration,
    /// Trailing edge behaviour
    pub trailing: TrailingPolicy,
}

impl PathConfig {
    /// Create a path config with the default trailing flush policy
    pub fn new(path: impl Into<String>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            trailing: TrailingPolicy::default(),
        }
    }

    /// Override the trailing edge policy
    pub fn with_trailing(mut self, trailing: TrailingPolicy) -> Self {
        self.trailing = trailing;
        self
    }
}

/// A single path update delivered by the host event bus
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEvent {
    /// Path the value belongs to
    pub path: String,
    /// Value payload; `None` when the producer omitted it
    pub value: Option<Value>,
    /// Time of measurement
    pub timestamp: DateTime<Utc>,
    /// Source label (`$source` in Signal K)
    pub source: Option<String>,
}

impl UpdateEvent {
    /// Create an update stamped with the current time
    pub fn now(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value: Some(value),
            timestamp: Utc::now(),
            source: None,
        }
    }

    /// Attach a source label
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}
