//! At-least-once delivery through the outbox

use crate::common::{paths, payload, wait_until, FakeBroker, TestForwarder, SELF_ID};
use push_core::UpdateEvent;
use push_lib::ConnectionState;
use serde_json::json;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_update_published_as_delta() -> anyhow::Result<()> {
    let forwarder = TestForwarder::start(FakeBroker::new(), paths(&["navigation.position"]))?;
    let broker = forwarder.broker.clone();
    wait_until("connection", || forwarder.handle.active_subscriptions() == 1).await;

    let position = json!({"latitude": 60.1, "longitude": 24.9});
    forwarder
        .bus
        .publish(UpdateEvent::now("navigation.position", position).with_source("gps.1"));
    wait_until("delivery", || broker.received_count() == 1).await;

    let received = broker.received();
    let (_, message) = &received[0];
    assert_eq!(message.topic, "signalk/delta/navigation.position");

    let delta = payload(message);
    assert_eq!(delta["context"], format!("vessels.{}", SELF_ID));
    assert_eq!(delta["updates"][0]["$source"], "gps.1");
    assert_eq!(delta["updates"][0]["values"][0]["path"], "navigation.position");
    assert_eq!(delta["updates"][0]["values"][0]["value"]["latitude"], 60.1);

    wait_until("acknowledgement", || forwarder.handle.pending_messages() == 0).await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unacked_messages_replayed_in_order() -> anyhow::Result<()> {
    let forwarder = TestForwarder::start(
        FakeBroker::manual_ack(),
        paths(&["navigation.position", "navigation.headingTrue"]),
    )?;
    let broker = forwarder.broker.clone();
    wait_until("connection", || forwarder.handle.active_subscriptions() == 2).await;

    forwarder.emit("navigation.position", json!({"latitude": 1, "longitude": 2}));
    wait_until("first message", || broker.received_count() == 1).await;
    forwarder.emit("navigation.headingTrue", json!(2.5));
    wait_until("second message", || broker.received_count() == 2).await;
    assert_eq!(forwarder.handle.pending_messages(), 2);

    broker.drop_connection();
    wait_until("replay", || broker.opened() == 2 && broker.received_count() == 4).await;

    let received = broker.received();
    let first: Vec<u64> = received[..2].iter().map(|(seq, _)| *seq).collect();
    let replay: Vec<u64> = received[2..].iter().map(|(seq, _)| *seq).collect();
    assert_eq!(first, replay);
    assert!(first[0] < first[1]);
    assert_eq!(received[2].1, received[0].1);

    for seq in first {
        broker.ack(seq);
    }
    wait_until("acknowledgement", || forwarder.handle.pending_messages() == 0).await;

    // Nothing left to replay on the next connection
    broker.drop_connection();
    wait_until("reconnection", || {
        broker.opened() == 3 && forwarder.handle.state() == ConnectionState::Connected
    })
    .await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(broker.received_count(), 4);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_burst_inside_window_flushes_newest() -> anyhow::Result<()> {
    let forwarder = TestForwarder::start(FakeBroker::new(), paths(&["navigation.position"]))?;
    let broker = forwarder.broker.clone();
    wait_until("connection", || forwarder.handle.active_subscriptions() == 1).await;

    forwarder.emit("navigation.position", json!(1));
    wait_until("first message", || broker.received_count() == 1).await;

    // Buffered inside the window, flushed when it closes
    forwarder.emit("navigation.position", json!(2));
    forwarder.emit("navigation.position", json!(3));
    wait_until("trailing flush", || broker.received_count() == 2).await;

    let received = broker.received();
    assert_eq!(payload(&received[1].1)["updates"][0]["values"][0]["value"], 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_update_without_value_is_dropped() -> anyhow::Result<()> {
    let forwarder = TestForwarder::start(FakeBroker::new(), paths(&["navigation.position"]))?;
    let broker = forwarder.broker.clone();
    wait_until("connection", || forwarder.handle.active_subscriptions() == 1).await;

    let mut missing = UpdateEvent::now("navigation.position", json!(null));
    missing.value = None;
    forwarder.bus.publish(missing);

    // Next window
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(broker.received_count(), 0);

    forwarder.emit("navigation.position", json!(7));
    wait_until("valid update", || broker.received_count() == 1).await;

    let received = broker.received();
    assert_eq!(payload(&received[0].1)["updates"][0]["values"][0]["value"], 7);
    assert_eq!(forwarder.handle.active_subscriptions(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_updates_during_outage_replayed_in_order() -> anyhow::Result<()> {
    let forwarder = TestForwarder::start(
        FakeBroker::manual_ack(),
        paths(&["navigation.position", "navigation.headingTrue"]),
    )?;
    let broker = forwarder.broker.clone();
    wait_until("connection", || forwarder.handle.active_subscriptions() == 2).await;

    broker.fail_next_opens(usize::MAX);
    broker.drop_connection();
    wait_until("outage", || {
        forwarder.handle.state() == ConnectionState::Connecting && broker.attempts() >= 2
    })
    .await;

    forwarder.emit("navigation.headingTrue", json!(1.25));
    forwarder.emit("navigation.position", json!({"latitude": 5, "longitude": 6}));
    wait_until("both queued", || forwarder.handle.pending_messages() == 2).await;
    assert_eq!(broker.received_count(), 0);

    broker.fail_next_opens(0);
    wait_until("replay", || broker.received_count() == 2).await;

    let received = broker.received();
    assert!(received[0].0 < received[1].0);
    assert_eq!(received[0].1.topic, "signalk/delta/navigation.headingTrue");
    assert_eq!(received[1].1.topic, "signalk/delta/navigation.position");

    // Still queued until the broker acknowledges
    assert_eq!(forwarder.handle.pending_messages(), 2);
    for (seq, _) in received {
        broker.ack(seq);
    }
    wait_until("acknowledgement", || forwarder.handle.pending_messages() == 0).await;

    Ok(())
}
