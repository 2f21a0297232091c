//! Append-only outbox of unacknowledged messages using sled

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::ops::Bound;
use std::path::Path;
use tracing::debug;

/// A message waiting for broker acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl OutgoingMessage {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).context("Failed to encode outgoing message")
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).context("Failed to decode outgoing message")
    }
}

/// Persistent log of outgoing messages keyed by a monotonic sequence id
///
/// Keys are big-endian so sled iterates in submission order. Entries stay
/// until [`Outbox::ack`] removes them, surviving disconnects and restarts.
pub struct Outbox {
    /// Sled database
    db: Db,
    /// Next sequence id; held while inserting so ids land in order
    next_seq: Mutex<u64>,
}

impl Outbox {
    /// Open or create an outbox in the given directory
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join("outbox.db");
        let db = sled::open(&path)
            .with_context(|| format!("Failed to open outbox at {}", path.display()))?;

        let next_seq = match db.last()? {
            Some((key, _)) => decode_seq(&key)? + 1,
            None => 1,
        };

        debug!(
            "Opened outbox at {} ({} pending, next #{})",
            path.display(),
            db.len(),
            next_seq
        );

        Ok(Self {
            db,
            next_seq: Mutex::new(next_seq),
        })
    }

    /// Persist a message and return its sequence id
    pub fn append(&self, message: &OutgoingMessage) -> Result<u64> {
        let value = message.serialize()?;

        let mut next = self.next_seq.lock();
        let seq = *next;
        self.db.insert(seq.to_be_bytes(), value)?;
        *next += 1;
        drop(next);

        // Flush to ensure durability
        self.db.flush()?;
        Ok(seq)
    }

    /// Remove an acknowledged message; returns whether it was still pending
    pub fn ack(&self, seq: u64) -> Result<bool> {
        Ok(self.db.remove(seq.to_be_bytes())?.is_some())
    }

    /// Get a pending message by sequence id
    pub fn get(&self, seq: u64) -> Result<Option<OutgoingMessage>> {
        match self.db.get(seq.to_be_bytes())? {
            Some(v) => Ok(Some(OutgoingMessage::deserialize(&v)?)),
            None => Ok(None),
        }
    }

    /// Up to `limit` pending messages with a sequence id above `after`, oldest first
    ///
    /// `after = None` starts from the oldest pending message.
    pub fn pending_after(&self, after: Option<u64>, limit: usize) -> Result<Vec<(u64, OutgoingMessage)>> {
        let lower = match after {
            Some(seq) => Bound::Excluded(seq.to_be_bytes()),
            None => Bound::Unbounded,
        };

        let mut out = Vec::new();
        for item in self.db.range((lower, Bound::Unbounded)).take(limit) {
            let (key, value) = item?;
            out.push((decode_seq(&key)?, OutgoingMessage::deserialize(&value)?));
        }
        Ok(out)
    }

    /// Number of unacknowledged messages
    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode_seq(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key.try_into().context("Corrupt outbox key")?;
    Ok(u64::from_be_bytes(bytes))
}
