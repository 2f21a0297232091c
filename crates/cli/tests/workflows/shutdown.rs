//! Stopping the forwarder

use crate::common::{paths, wait_until, FakeBroker, TestForwarder};
use push_core::{LocalBus, UpdateSource};
use push_lib::{Config, ConnectionState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const PATHS: [&str; 2] = ["navigation.position", "navigation.courseOverGroundTrue"];

#[tokio::test(start_paused = true)]
async fn test_stop_releases_everything() -> anyhow::Result<()> {
    let mut forwarder = TestForwarder::start(FakeBroker::new(), paths(&PATHS))?;
    let broker = forwarder.broker.clone();
    wait_until("connection", || forwarder.handle.active_subscriptions() == 2).await;

    forwarder.handle.stop().await;

    assert_eq!(forwarder.handle.state(), ConnectionState::Stopped);
    assert_eq!(forwarder.handle.active_subscriptions(), 0);
    for path in PATHS {
        assert_eq!(forwarder.bus.subscriber_count(path), 0, "{}", path);
    }
    assert_eq!(broker.closed(), vec![true]);

    // Late updates go nowhere
    forwarder.emit("navigation.position", json!(1));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(broker.received_count(), 0);

    // Second stop is a no-op
    forwarder.handle.stop().await;
    assert_eq!(forwarder.handle.state(), ConnectionState::Stopped);
    assert_eq!(broker.closed().len(), 1);
    assert_eq!(broker.opened(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_window_open_discards_buffer() -> anyhow::Result<()> {
    let mut forwarder = TestForwarder::start(FakeBroker::new(), paths(&PATHS))?;
    let broker = forwarder.broker.clone();
    wait_until("connection", || forwarder.handle.active_subscriptions() == 2).await;

    forwarder.emit("navigation.position", json!(1));
    wait_until("leading update", || {
        broker.received_count() == 1 && forwarder.handle.pending_messages() == 0
    })
    .await;
    forwarder.emit("navigation.position", json!(2));

    forwarder.handle.stop().await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(broker.received_count(), 1);
    assert_eq!(forwarder.handle.pending_messages(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_before_first_connection() -> anyhow::Result<()> {
    let broker = FakeBroker::new();
    broker.fail_next_opens(usize::MAX);
    let mut forwarder = TestForwarder::start(broker.clone(), paths(&PATHS))?;

    wait_until("first attempt", || broker.attempts() >= 1).await;
    forwarder.handle.stop().await;

    assert_eq!(forwarder.handle.state(), ConnectionState::Stopped);
    assert_eq!(broker.opened(), 0);
    assert!(broker.closed().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_start_rejects_missing_remote_host() -> anyhow::Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let config = Config {
        data_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    let bus: Arc<dyn UpdateSource> = Arc::new(LocalBus::default());

    let err = push_lib::start(&config, bus).err().expect("start must fail");
    assert!(format!("{:#}", err).contains("remote_host"));

    // Nothing was persisted for an invalid configuration
    assert!(!temp_dir.path().join("self_id").exists());
    Ok(())
}
