//! Signal K delta parsing
//!
//! Turns an incoming delta document into one [`UpdateEvent`] per value,
//! keeping only updates for the self vessel.

use crate::model::UpdateEvent;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::trace;

#[derive(Deserialize)]
struct RawDelta {
    context: Option<String>,
    #[serde(default)]
    updates: Vec<RawUpdate>,
}

#[derive(Deserialize)]
struct RawUpdate {
    timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "$source")]
    source: Option<String>,
    #[serde(default)]
    values: Vec<RawValue>,
}

#[derive(Deserialize)]
struct RawValue {
    path: String,
    // `null` is a real value in Signal K; only an absent key maps to None
    #[serde(default, deserialize_with = "present")]
    value: Option<Value>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Whether a delta context refers to the self vessel
pub fn is_self_context(context: Option<&str>, self_id: &str) -> bool {
    match context {
        None | Some("vessels.self") => true,
        Some(ctx) => ctx.strip_prefix("vessels.") == Some(self_id),
    }
}

/// Parse one delta document into self-vessel updates
///
/// Deltas for other contexts yield an empty list. Updates without a
/// timestamp are stamped with the current time.
pub fn parse_self_updates(input: &str, self_id: &str) -> Result<Vec<UpdateEvent>> {
    let delta: RawDelta = serde_json::from_str(input).context("Invalid Signal K delta")?;

    if !is_self_context(delta.context.as_deref(), self_id) {
        trace!("Ignoring delta for {:?}", delta.context);
        return Ok(Vec::new());
    }

    let mut events = Vec::new();
    for update in delta.updates {
        let timestamp = update.timestamp.unwrap_or_else(Utc::now);
        for value in update.values {
            events.push(UpdateEvent {
                path: value.path,
                value: value.value,
                timestamp,
                source: update.source.clone(),
            });
        }
    }

    Ok(events)
}
