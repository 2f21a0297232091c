//! Update bus seam
//!
//! The host application owns the real event bus; the forwarding pipeline only
//! needs to subscribe to one path at a time. [`LocalBus`] is an in-process
//! implementation used by the binary and by tests.

use crate::model::UpdateEvent;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Default per-path channel capacity for [`LocalBus`]
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Keyed stream of self-vessel updates
///
/// Dropping the returned receiver unregisters the listener.
pub trait UpdateSource: Send + Sync + 'static {
    /// Subscribe to updates for a single path
    fn subscribe(&self, path: &str) -> broadcast::Receiver<UpdateEvent>;
}

/// In-process bus with one broadcast channel per path
pub struct LocalBus {
    channels: RwLock<HashMap<String, broadcast::Sender<UpdateEvent>>>,
    capacity: usize,
}

impl LocalBus {
    /// Create a bus whose per-path channels hold `capacity` unread updates
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Deliver an update to every subscriber of its path
    ///
    /// Returns the number of subscribers reached. Updates for paths nobody
    /// listens to are discarded.
    pub fn publish(&self, event: UpdateEvent) -> usize {
        let channels = self.channels.read();
        match channels.get(&event.path) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Number of live subscribers for a path
    pub fn subscriber_count(&self, path: &str) -> usize {
        self.channels
            .read()
            .get(path)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    fn sender(&self, path: &str) -> broadcast::Sender<UpdateEvent> {
        if let Some(tx) = self.channels.read().get(path) {
            return tx.clone();
        }

        self.channels
            .write()
            .entry(path.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl UpdateSource for LocalBus {
    fn subscribe(&self, path: &str) -> broadcast::Receiver<UpdateEvent> {
        self.sender(path).subscribe()
    }
}

impl<S: UpdateSource> UpdateSource for std::sync::Arc<S> {
    fn subscribe(&self, path: &str) -> broadcast::Receiver<UpdateEvent> {
        (**self).subscribe(path)
    }
}
