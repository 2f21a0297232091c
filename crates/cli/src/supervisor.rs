//! Connection supervisor
//!
//! Owns the broker link, the debouncer subscriptions and the dispatch cursor
//! into the outbox. States move `Disconnected → Connecting → Connected`, back
//! to `Connecting` on any disconnect, and to `Stopped` on stop.
//!
//! Debouncers are first armed on CONNACK and keep feeding the outbox while
//! the broker is unreachable. Every CONNACK tears the previous set down
//! before arming a fresh one, so repeated reconnects never stack listeners.

use crate::backoff::Backoff;
use crate::link::{Connector, Link, LinkEvent};
use crate::sink::PublishSink;
use journal::Outbox;
use push_core::{PathConfig, UpdateSource};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use watcher::{PathDebouncer, Subscription};

/// Outbox entries read per dispatch round
const DISPATCH_BATCH: usize = 64;

/// Broker connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

enum Exit {
    Stop { connected: bool },
    Lost(String),
}

/// Forwarding pipeline driven by one broker connection at a time
pub struct Supervisor<C: Connector> {
    connector: C,
    source: Arc<dyn UpdateSource>,
    paths: Vec<PathConfig>,
    sink: PublishSink,
    outbox: Arc<Outbox>,
    wake: Arc<Notify>,
    backoff: Backoff,
    state: watch::Sender<ConnectionState>,
    active: Arc<AtomicUsize>,
    subscriptions: Vec<Subscription>,
}

impl<C: Connector> Supervisor<C> {
    pub fn new(
        connector: C,
        source: Arc<dyn UpdateSource>,
        paths: Vec<PathConfig>,
        self_id: &str,
        outbox: Arc<Outbox>,
        backoff: Backoff,
    ) -> Self {
        let wake = Arc::new(Notify::new());
        let sink = PublishSink::new(self_id, outbox.clone(), wake.clone());
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            connector,
            source,
            paths,
            sink,
            outbox,
            wake,
            backoff,
            state,
            active: Arc::new(AtomicUsize::new(0)),
            subscriptions: Vec::new(),
        }
    }

    /// Spawn the supervisor task
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> SupervisorHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let state = self.state.subscribe();
        let active = self.active.clone();
        let outbox = self.outbox.clone();
        let task = tokio::spawn(self.run(stop_rx));

        SupervisorHandle {
            stop_tx,
            task: Some(task),
            state,
            active,
            outbox,
        }
    }

    async fn run(mut self, mut stop_rx: watch::Receiver<bool>) {
        let mut attempt = 0u32;

        loop {
            if *stop_rx.borrow() {
                self.shutdown(None).await;
                return;
            }

            self.set_state(ConnectionState::Connecting);
            match self.connector.open() {
                Ok(mut link) => match self.serve(&mut link, &mut stop_rx, &mut attempt).await {
                    Exit::Stop { connected } => {
                        self.shutdown(Some((link, connected))).await;
                        return;
                    }
                    Exit::Lost(reason) => {
                        warn!("Disconnected from MQTT broker ({}), reconnecting", reason);
                        self.set_state(ConnectionState::Connecting);
                        // Subscriptions stay armed; updates queue in the outbox
                        link.close(false).await;
                    }
                },
                Err(e) => warn!("Failed to open broker connection: {:#}", e),
            }

            let delay = self.backoff.next(attempt);
            attempt = attempt.saturating_add(1);
            debug!("Reconnecting in {:?}", delay);

            tokio::select! {
                _ = sleep(delay) => {}
                _ = stop_rx.changed() => {
                    self.shutdown(None).await;
                    return;
                }
            }
        }
    }

    /// Drive one link until it is lost or a stop is requested
    async fn serve(
        &mut self,
        link: &mut C::Link,
        stop_rx: &mut watch::Receiver<bool>,
        attempt: &mut u32,
    ) -> Exit {
        let mut connected = false;
        let mut cursor: Option<u64> = None;

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => return Exit::Stop { connected },
                event = link.next_event() => match event {
                    LinkEvent::Connected => {
                        info!("Connected to MQTT broker, starting sending messages");
                        connected = true;
                        *attempt = 0;
                        self.teardown().await;
                        self.arm();
                        self.set_state(ConnectionState::Connected);
                        // Replay everything still unacknowledged, oldest first
                        cursor = None;
                        self.dispatch(link, &mut cursor);
                    }
                    LinkEvent::Acked(seq) => {
                        if let Err(e) = self.outbox.ack(seq) {
                            warn!("Failed to remove acknowledged message #{}: {:#}", seq, e);
                        }
                        if connected {
                            self.dispatch(link, &mut cursor);
                        }
                    }
                    LinkEvent::Lost(reason) => return Exit::Lost(reason),
                },
                _ = self.wake.notified(), if connected => self.dispatch(link, &mut cursor),
            }
        }
    }

    /// Submit outbox entries after `cursor` until the outbox or the link queue runs out
    fn dispatch(&self, link: &mut C::Link, cursor: &mut Option<u64>) {
        loop {
            let batch = match self.outbox.pending_after(*cursor, DISPATCH_BATCH) {
                Ok(batch) => batch,
                Err(e) => {
                    error!("Failed to read outbox: {:#}", e);
                    return;
                }
            };
            if batch.is_empty() {
                return;
            }

            for (seq, message) in batch {
                match link.try_submit(seq, &message) {
                    Ok(true) => *cursor = Some(seq),
                    // Queue full, resumed on the next ack or wake-up
                    Ok(false) => return,
                    Err(e) => {
                        warn!("Failed to submit #{}: {:#}", seq, e);
                        return;
                    }
                }
            }
        }
    }

    /// Create one debouncer per configured path
    fn arm(&mut self) {
        for config in &self.paths {
            let sink = self.sink.clone();
            let path = config.path.clone();
            let subscription = PathDebouncer::new(config.clone())
                .attach(self.source.as_ref(), move |event| sink.forward(&path, &event));
            self.subscriptions.push(subscription);
        }

        self.active.store(self.subscriptions.len(), Ordering::SeqCst);
        info!("Forwarding {} paths", self.subscriptions.len());
    }

    /// Cancel every live subscription
    async fn teardown(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            debug!("Cancelling debouncer for {}", subscription.path());
            subscription.cancel().await;
        }
        self.active.store(0, Ordering::SeqCst);
    }

    async fn shutdown(&mut self, link: Option<(C::Link, bool)>) {
        self.teardown().await;

        if let Some((mut link, connected)) = link {
            link.close(connected).await;
        }

        if let Err(e) = self.outbox.flush() {
            warn!("Failed to flush outbox: {:#}", e);
        }

        self.set_state(ConnectionState::Stopped);
        info!("Stopped forwarding ({} messages pending)", self.outbox.len());
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

/// Control handle returned by [`Supervisor::start`]
///
/// Dropping the handle also stops the supervisor, without waiting for it.
pub struct SupervisorHandle {
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    state: watch::Receiver<ConnectionState>,
    active: Arc<AtomicUsize>,
    outbox: Arc<Outbox>,
}

impl SupervisorHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state transition
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Number of debouncers currently attached
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Messages not yet acknowledged by the broker
    pub fn pending_messages(&self) -> usize {
        self.outbox.len()
    }

    /// Cancel all subscriptions, close the connection and wait for the task
    ///
    /// Safe to call more than once.
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Supervisor task ended abnormally: {}", e);
            }
        }
    }
}
