//! Signal K delta envelope construction
//!
//! An envelope wraps exactly one path/value pair for the self vessel:
//! ```json
//! {"context":"vessels.<self>","updates":[{"timestamp":"...","$source":"...","values":[{"path":"...","value":...}]}]}
//! ```
//! Building and encoding are pure: equal input gives byte-identical output.

use crate::model::UpdateEvent;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Topic prefix for published deltas
pub const DELTA_TOPIC_PREFIX: &str = "signalk/delta/";

/// Topic a path's deltas are published under
pub fn delta_topic(path: &str) -> String {
    format!("{DELTA_TOPIC_PREFIX}{path}")
}

/// Why an update could not be turned into a wire message
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("update for '{0}' carries no value")]
    MissingValue(String),
    #[error("failed to encode delta: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Delta message for one context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    /// `vessels.<self id>`
    pub context: String,
    pub updates: Vec<Update>,
}

/// Timestamped group of values from one source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Update {
    #[serde(serialize_with = "rfc3339_millis")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "$source", skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub values: Vec<PathValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathValue {
    pub path: String,
    pub value: Value,
}

impl Envelope {
    /// Wrap a single update for `path` into a delta for the self vessel
    pub fn build(self_id: &str, path: &str, event: &UpdateEvent) -> Result<Self, EnvelopeError> {
        let value = event
            .value
            .clone()
            .ok_or_else(|| EnvelopeError::MissingValue(path.to_string()))?;

        Ok(Self {
            context: format!("vessels.{self_id}"),
            updates: vec![Update {
                timestamp: event.timestamp,
                source: event.source.clone(),
                values: vec![PathValue {
                    path: path.to_string(),
                    value,
                }],
            }],
        })
    }

    /// Path of the first value, which is the only one in envelopes we build
    pub fn path(&self) -> Option<&str> {
        self.updates
            .first()
            .and_then(|u| u.values.first())
            .map(|v| v.path.as_str())
    }

    /// Encode to the JSON wire payload
    pub fn to_payload(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn rfc3339_millis<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}
