//! Feed newline-delimited Signal K deltas into the local bus

use push_core::delta::parse_self_updates;
use push_core::LocalBus;
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Publishes the self-vessel updates of each delta line on a bus
pub struct LineFeeder {
    bus: Arc<LocalBus>,
    self_id: String,
    lines: u64,
    published: u64,
}

impl LineFeeder {
    pub fn new(bus: Arc<LocalBus>, self_id: impl Into<String>) -> Self {
        Self {
            bus,
            self_id: self_id.into(),
            lines: 0,
            published: 0,
        }
    }

    /// Parse one line; invalid deltas are logged and skipped
    pub fn feed(&mut self, line: &str) {
        self.lines += 1;
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        match parse_self_updates(line, &self.self_id) {
            Ok(events) => {
                for event in events {
                    debug!("Update {} from line {}", event.path, self.lines);
                    self.bus.publish(event);
                    self.published += 1;
                }
            }
            Err(e) => warn!("Skipping line {}: {:#}", self.lines, e),
        }
    }

    /// Updates published so far
    pub fn published(&self) -> u64 {
        self.published
    }
}

/// Read lines from a blocking reader on a dedicated thread
///
/// The channel closes at end of input. The thread is detached so a pending
/// read never holds up shutdown.
pub fn spawn_line_reader<R>(reader: R) -> mpsc::Receiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1024);

    std::thread::spawn(move || {
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read delta input: {}", e);
                    break;
                }
            }
        }
    });

    rx
}
