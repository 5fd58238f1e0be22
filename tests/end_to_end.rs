//! End-to-end scenarios over the in-process relay and transport.
//!
//! Two connection managers attach to one session registry; handshakes run
//! through the real relay code and the paired in-process transport.

use peerlink::{
    current_timestamp_millis, LinkError, ManagerConfig, MemoryChannel, MemoryHub,
    MemoryTransportFactory, PeerManager, PeerRole, PeerState, RegistryHandle, RelayChannel,
    RelayPolicy, MessageKind,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};

async fn spawn_manager(
    registry: &RegistryHandle,
    hub: &MemoryHub,
    config: ManagerConfig,
) -> PeerManager {
    let (channel, events) = MemoryChannel::attach(registry).await.unwrap();
    PeerManager::new(
        Box::new(channel),
        events,
        Arc::new(MemoryTransportFactory::new(hub.clone())),
        config,
    )
}

async fn wait_connected(manager: &PeerManager, peer_id: &str) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !manager.is_connected(peer_id).await {
        if Instant::now() > deadline {
            panic!("timed out waiting for {} to connect", peer_id);
        }
        sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_disconnected(manager: &PeerManager, peer_id: &str) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while manager.is_connected(peer_id).await {
        if Instant::now() > deadline {
            panic!("timed out waiting for {} to disconnect", peer_id);
        }
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn full_scenario_connect_send_receive() {
    let registry = RegistryHandle::spawn(RelayPolicy::default());
    let hub = MemoryHub::new();
    let a = spawn_manager(&registry, &hub, ManagerConfig::default()).await;
    let b = spawn_manager(&registry, &hub, ManagerConfig::default()).await;
    let mut b_inbox = b.subscribe().await.unwrap();

    let before = current_timestamp_millis();
    timeout(Duration::from_secs(2), a.connect(b.session_id()))
        .await
        .expect("connect must not hang")
        .expect("connect should succeed");

    assert_eq!(a.list_connected().await, vec![b.session_id().to_string()]);
    wait_connected(&b, a.session_id()).await;
    assert_eq!(b.list_connected().await, vec![a.session_id().to_string()]);

    // B never called connect; its record was created lazily as responder.
    let b_summaries = b.summaries().await;
    assert_eq!(b_summaries.len(), 1);
    assert_eq!(b_summaries[0].role, PeerRole::Responder);
    assert_eq!(b_summaries[0].state, PeerState::Connected);
    let a_summaries = a.summaries().await;
    assert_eq!(a_summaries[0].role, PeerRole::Initiator);

    a.send(MessageKind::UserLocation, json!({"lat": 1, "lon": 2}));

    let message = timeout(Duration::from_secs(2), b_inbox.recv())
        .await
        .expect("message must arrive")
        .expect("subscription must stay open");
    let after = current_timestamp_millis();
    assert_eq!(message.kind, MessageKind::UserLocation);
    assert_eq!(message.payload, json!({"lat": 1, "lon": 2}));
    assert!(message.timestamp >= before);
    assert!(message.timestamp <= after);

    // Exactly once: nothing else is delivered.
    assert!(timeout(Duration::from_millis(100), b_inbox.recv()).await.is_err());
}

#[tokio::test]
async fn duplicate_connect_to_live_peer_shares_entry() {
    let registry = RegistryHandle::spawn(RelayPolicy::default());
    let hub = MemoryHub::new();
    let a = spawn_manager(&registry, &hub, ManagerConfig::default()).await;
    let b = spawn_manager(&registry, &hub, ManagerConfig::default()).await;

    let (first, second) = tokio::join!(a.connect(b.session_id()), a.connect(b.session_id()));
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(a.summaries().await.len(), 1);

    // A connect after establishment is an immediate no-op.
    timeout(Duration::from_millis(200), a.connect(b.session_id()))
        .await
        .expect("no-op connect must resolve immediately")
        .unwrap();
}

#[tokio::test]
async fn timestamps_are_non_decreasing_across_sends() {
    let registry = RegistryHandle::spawn(RelayPolicy::default());
    let hub = MemoryHub::new();
    let a = spawn_manager(&registry, &hub, ManagerConfig::default()).await;
    let b = spawn_manager(&registry, &hub, ManagerConfig::default()).await;
    let mut b_inbox = b.subscribe().await.unwrap();

    a.connect(b.session_id()).await.unwrap();
    a.send(MessageKind::RestaurantUpdate, json!({"seq": 1}));
    sleep(Duration::from_millis(20)).await;
    a.send(MessageKind::RestaurantUpdate, json!({"seq": 2}));

    let first = timeout(Duration::from_secs(2), b_inbox.recv()).await.unwrap().unwrap();
    let second = timeout(Duration::from_secs(2), b_inbox.recv()).await.unwrap().unwrap();
    assert_eq!(first.payload["seq"], 1);
    assert_eq!(second.payload["seq"], 2);
    assert!(first.timestamp <= second.timestamp);
}

#[tokio::test]
async fn disconnect_then_fresh_connect_creates_new_record() {
    let registry = RegistryHandle::spawn(RelayPolicy::default());
    let hub = MemoryHub::new();
    let a = spawn_manager(&registry, &hub, ManagerConfig::default()).await;
    let b = spawn_manager(&registry, &hub, ManagerConfig::default()).await;

    a.connect(b.session_id()).await.unwrap();
    wait_connected(&b, a.session_id()).await;
    let old_generation = a.summaries().await[0].generation;

    a.disconnect(b.session_id());
    wait_disconnected(&a, b.session_id()).await;
    assert!(a.list_connected().await.is_empty());
    assert_eq!(a.summaries().await[0].state, PeerState::Disconnected);
    // The counterpart observes the transport close.
    wait_disconnected(&b, a.session_id()).await;

    timeout(Duration::from_secs(2), a.connect(b.session_id()))
        .await
        .expect("reconnect must not hang")
        .expect("reconnect should succeed");
    let summaries = a.summaries().await;
    let fresh = &summaries[0];
    assert_eq!(fresh.state, PeerState::Connected);
    assert!(fresh.generation > old_generation, "fresh record must not reuse the torn-down one");
}

#[tokio::test]
async fn failure_for_one_peer_leaves_others_untouched() {
    let registry = RegistryHandle::spawn(RelayPolicy::default());
    let hub = MemoryHub::new();
    let config = ManagerConfig {
        connect_timeout: Duration::from_millis(200),
    };
    let a = spawn_manager(&registry, &hub, config).await;
    let b = spawn_manager(&registry, &hub, config).await;
    let mut b_inbox = b.subscribe().await.unwrap();

    a.connect(b.session_id()).await.unwrap();

    // The relay drops signals for this target; only the timeout surfaces it.
    let result = timeout(Duration::from_secs(2), a.connect("no-such-session"))
        .await
        .expect("connect must not hang");
    assert!(matches!(result, Err(LinkError::Timeout { .. })));

    // The established link is unaffected and still carries data.
    assert!(a.is_connected(b.session_id()).await);
    a.send(MessageKind::OrderUpdate, json!({"order": 42}));
    let message = timeout(Duration::from_secs(2), b_inbox.recv()).await.unwrap().unwrap();
    assert_eq!(message.payload["order"], 42);
}

#[tokio::test]
async fn relay_disconnect_notification_fails_pending_connect() {
    let policy = RelayPolicy {
        notify_disconnect: true,
        ..RelayPolicy::default()
    };
    let registry = RegistryHandle::spawn(policy);
    let hub = MemoryHub::new();
    // Generous timeout: the rejection must come from the notification.
    let config = ManagerConfig {
        connect_timeout: Duration::from_secs(10),
    };
    let a = spawn_manager(&registry, &hub, config).await;
    // A bare channel that never answers signals, standing in for a client
    // that attaches and then goes away mid-handshake.
    let (silent, _silent_events) = MemoryChannel::attach(&registry).await.unwrap();
    let silent_id = silent.session_id().to_string();

    let started = Instant::now();
    let connecting = {
        let a = a.clone();
        let silent_id = silent_id.clone();
        tokio::spawn(async move { a.connect(&silent_id).await })
    };
    sleep(Duration::from_millis(50)).await;
    silent.close().await;

    let result = timeout(Duration::from_secs(2), connecting)
        .await
        .expect("notified connect must not wait for the timeout")
        .unwrap();
    assert!(matches!(result, Err(LinkError::Transport { .. })));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn manager_shutdown_tears_down_links() {
    let registry = RegistryHandle::spawn(RelayPolicy::default());
    let hub = MemoryHub::new();
    let a = spawn_manager(&registry, &hub, ManagerConfig::default()).await;
    let b = spawn_manager(&registry, &hub, ManagerConfig::default()).await;

    a.connect(b.session_id()).await.unwrap();
    wait_connected(&b, a.session_id()).await;

    b.shutdown();
    // A observes the transport close from B's teardown.
    wait_disconnected(&a, b.session_id()).await;
    assert!(a.list_connected().await.is_empty());
}
