//! Per-path debouncing logic
//!
//! Limits how often a single path is forwarded. The first update passes
//! immediately and opens a window; updates inside the window are buffered,
//! keeping only the newest. When the window closes the buffered update is
//! either flushed (opening a new window) or dropped, per [`TrailingPolicy`].

use push_core::{PathConfig, TrailingPolicy, UpdateEvent, UpdateSource};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Rate limiter for one configured path
#[derive(Debug, Clone)]
pub struct PathDebouncer {
    config: PathConfig,
}

impl PathDebouncer {
    pub fn new(config: PathConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PathConfig {
        &self.config
    }

    /// Subscribe to the configured path and start forwarding to `emit`
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach<F>(&self, source: &dyn UpdateSource, emit: F) -> Subscription
    where
        F: FnMut(UpdateEvent) + Send + 'static,
    {
        let rx = source.subscribe(&self.config.path);
        self.spawn(rx, emit)
    }

    /// Start forwarding from an existing receiver
    pub fn spawn<F>(&self, rx: broadcast::Receiver<UpdateEvent>, emit: F) -> Subscription
    where
        F: FnMut(UpdateEvent) + Send + 'static,
    {
        let task = tokio::spawn(run(
            rx,
            self.config.path.clone(),
            self.config.interval,
            self.config.trailing,
            emit,
        ));

        Subscription {
            path: self.config.path.clone(),
            task: Some(task),
        }
    }
}

/// Teardown handle for an attached debouncer
///
/// Owns the listener and its timer. Dropping the handle aborts the task;
/// [`Subscription::cancel`] additionally waits until it has stopped, so no
/// emission can happen after it returns.
#[derive(Debug)]
pub struct Subscription {
    path: String,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the debouncer has stopped on its own (source closed)
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Unregister the listener and discard any open window
    pub async fn cancel(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            // Cancelled or already finished; either way it is gone
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

async fn run<F>(
    mut rx: broadcast::Receiver<UpdateEvent>,
    path: String,
    interval: Duration,
    trailing: TrailingPolicy,
    mut emit: F,
) where
    F: FnMut(UpdateEvent),
{
    let mut window: Option<Instant> = None;
    let mut pending: Option<UpdateEvent> = None;
    let mut open = true;

    while open || window.is_some() {
        tokio::select! {
            received = rx.recv(), if open => match received {
                Ok(event) => {
                    if interval.is_zero() {
                        emit(event);
                    } else if window.is_none() {
                        emit(event);
                        window = Some(Instant::now() + interval);
                    } else {
                        pending = Some(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Debouncer for {} lagged, skipped {} updates", path, skipped);
                }
                Err(RecvError::Closed) => {
                    debug!("Update source for {} closed", path);
                    open = false;
                    if trailing == TrailingPolicy::Drop || pending.is_none() {
                        window = None;
                    }
                }
            },
            _ = sleep_until(window.unwrap_or_else(Instant::now)), if window.is_some() => {
                window = match (trailing, pending.take()) {
                    (TrailingPolicy::Flush, Some(event)) => {
                        emit(event);
                        open.then(|| Instant::now() + interval)
                    }
                    _ => None,
                };
            }
        }
    }
}
