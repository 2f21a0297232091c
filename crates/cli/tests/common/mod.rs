//! Common utilities for integration tests
//!
//! An in-memory broker standing in for rumqttc, plus helpers to start a
//! supervisor against it.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use journal::{OutgoingMessage, Outbox};
use parking_lot::Mutex;
use push_core::{LocalBus, PathConfig, UpdateEvent, UpdateSource};
use push_lib::backoff::Backoff;
use push_lib::{Connector, Link, LinkEvent, Supervisor, SupervisorHandle};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const SELF_ID: &str = "urn:mrn:signalk:uuid:test-vessel";

#[derive(Default)]
struct BrokerState {
    received: Vec<(u64, OutgoingMessage)>,
    attempts: usize,
    opened: usize,
    closed: Vec<bool>,
    fail_opens: usize,
    manual_ack: bool,
    current: Option<mpsc::UnboundedSender<LinkEvent>>,
}

/// Shared view of everything the fake links did
#[derive(Clone, Default)]
pub struct FakeBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl FakeBroker {
    /// Broker that acknowledges every message as soon as it arrives
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker that only acknowledges on [`FakeBroker::ack`]
    pub fn manual_ack() -> Self {
        let broker = Self::default();
        broker.state.lock().manual_ack = true;
        broker
    }

    /// Make the next `count` connection attempts fail
    pub fn fail_next_opens(&self, count: usize) {
        self.state.lock().fail_opens = count;
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            broker: self.clone(),
        }
    }

    /// Report the current link as lost
    pub fn drop_connection(&self) {
        if let Some(tx) = self.state.lock().current.take() {
            let _ = tx.send(LinkEvent::Lost("connection reset".to_string()));
        }
    }

    /// Acknowledge `seq` on the current link
    pub fn ack(&self, seq: u64) {
        if let Some(tx) = self.state.lock().current.as_ref() {
            let _ = tx.send(LinkEvent::Acked(seq));
        }
    }

    pub fn received(&self) -> Vec<(u64, OutgoingMessage)> {
        self.state.lock().received.clone()
    }

    pub fn received_count(&self) -> usize {
        self.state.lock().received.len()
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    pub fn opened(&self) -> usize {
        self.state.lock().opened
    }

    /// `graceful` flag of every close, in order
    pub fn closed(&self) -> Vec<bool> {
        self.state.lock().closed.clone()
    }
}

pub struct FakeConnector {
    broker: FakeBroker,
}

impl Connector for FakeConnector {
    type Link = FakeLink;

    fn open(&self) -> Result<FakeLink> {
        let mut state = self.broker.state.lock();
        state.attempts += 1;
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            anyhow::bail!("connection refused");
        }

        let (tx, events) = mpsc::unbounded_channel();
        let _ = tx.send(LinkEvent::Connected);
        state.opened += 1;
        state.current = Some(tx.clone());

        Ok(FakeLink {
            broker: self.broker.clone(),
            tx,
            events,
        })
    }
}

pub struct FakeLink {
    broker: FakeBroker,
    tx: mpsc::UnboundedSender<LinkEvent>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
}

#[async_trait]
impl Link for FakeLink {
    fn try_submit(&mut self, seq: u64, message: &OutgoingMessage) -> Result<bool> {
        let mut state = self.broker.state.lock();
        state.received.push((seq, message.clone()));
        if !state.manual_ack {
            let _ = self.tx.send(LinkEvent::Acked(seq));
        }
        Ok(true)
    }

    async fn next_event(&mut self) -> LinkEvent {
        self.events
            .recv()
            .await
            .unwrap_or_else(|| LinkEvent::Lost("closed".to_string()))
    }

    async fn close(&mut self, graceful: bool) {
        self.broker.state.lock().closed.push(graceful);
    }
}

/// A running supervisor wired to a [`FakeBroker`] and a [`LocalBus`]
pub struct TestForwarder {
    pub broker: FakeBroker,
    pub bus: Arc<LocalBus>,
    pub handle: SupervisorHandle,
    _data_dir: TempDir,
}

impl TestForwarder {
    pub fn start(broker: FakeBroker, paths: Vec<PathConfig>) -> Result<Self> {
        let data_dir = tempfile::tempdir()?;
        let outbox = Arc::new(Outbox::open(data_dir.path())?);
        let bus = Arc::new(LocalBus::default());
        let source: Arc<dyn UpdateSource> = bus.clone();

        let backoff = Backoff {
            first: Duration::from_millis(10),
            max: Duration::from_millis(100),
            factor: 2.0,
        };
        let handle =
            Supervisor::new(broker.connector(), source, paths, SELF_ID, outbox, backoff).start();

        Ok(Self {
            broker,
            bus,
            handle,
            _data_dir: data_dir,
        })
    }

    pub fn emit(&self, path: &str, value: Value) {
        self.bus.publish(UpdateEvent::now(path, value));
    }
}

/// One-second paths, leading edge with trailing flush
pub fn paths(names: &[&str]) -> Vec<PathConfig> {
    names
        .iter()
        .map(|name| PathConfig::new(*name, Duration::from_secs(1)))
        .collect()
}

/// Poll `condition` until it holds, panicking after a generous timeout
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Timed out waiting for {}", what);
}

/// Decode a received payload
pub fn payload(message: &OutgoingMessage) -> Value {
    serde_json::from_slice(&message.payload).expect("payload is JSON")
}
