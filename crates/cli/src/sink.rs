//! Publish sink
//!
//! Turns debounced updates into outbox entries. Publishing never fails from
//! the caller's point of view: encode and storage errors are logged and the
//! message is dropped. Delivery to the broker is the supervisor's job; the
//! sink only wakes it.

use journal::{OutgoingMessage, Outbox};
use push_core::{delta_topic, Envelope, UpdateEvent};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error};

#[derive(Clone)]
pub struct PublishSink {
    self_id: Arc<str>,
    outbox: Arc<Outbox>,
    wake: Arc<Notify>,
}

impl PublishSink {
    pub fn new(self_id: impl Into<Arc<str>>, outbox: Arc<Outbox>, wake: Arc<Notify>) -> Self {
        Self {
            self_id: self_id.into(),
            outbox,
            wake,
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Wrap an update for `path` and publish it
    pub fn forward(&self, path: &str, event: &UpdateEvent) {
        match Envelope::build(&self.self_id, path, event) {
            Ok(envelope) => self.publish(path, &envelope),
            Err(e) => error!("Dropping update for {}: {}", path, e),
        }
    }

    /// Queue an envelope for delivery on `signalk/delta/<path>`
    pub fn publish(&self, path: &str, envelope: &Envelope) {
        let payload = match envelope.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Dropping update for {}: {}", path, e);
                return;
            }
        };

        let message = OutgoingMessage::new(delta_topic(path), payload);
        match self.outbox.append(&message) {
            Ok(seq) => {
                debug!("Queued {} as #{}", message.topic, seq);
                self.wake.notify_one();
            }
            Err(e) => error!("Failed to queue update for {}: {:#}", path, e),
        }
    }
}
