//! Connection lifecycle tests over in-memory links.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Semaphore;
use tokio::sync::mpsc;

use tether_client::Bridge;
use tether_client::ClientConfig;
use tether_client::ConnectionState;
use tether_client::Connector;
use tether_proto::Frame;
use tether_proto::Request;
use tether_proto::Transport;
use tether_proto::mock_transport::DuplexChannelTransport;
use tether_proto::transport;

const DELAY: Duration = Duration::from_secs(2);

/// Fails the first `failures` dials, then hands the far end of each new link
/// to the test through `peers`.
struct FlakyConnector {
    failures: AtomicU32,
    calls: Arc<AtomicU32>,
    peers: mpsc::UnboundedSender<DuplexChannelTransport>,
}

#[async_trait::async_trait]
impl Connector for FlakyConnector {
    async fn connect(&self) -> transport::Result<Arc<dyn Transport>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(transport::Error::Connect("connection refused".into()));
        }
        let (near, far) = DuplexChannelTransport::pair();
        let _ = self.peers.send(far);
        Ok(Arc::new(near))
    }
}

struct Harness {
    bridge: Bridge,
    calls: Arc<AtomicU32>,
    peers: mpsc::UnboundedReceiver<DuplexChannelTransport>,
}

fn harness(failures: u32) -> Harness {
    let calls = Arc::new(AtomicU32::new(0));
    let (tx, peers) = mpsc::unbounded_channel();
    let connector = FlakyConnector {
        failures: AtomicU32::new(failures),
        calls: calls.clone(),
        peers: tx,
    };
    let config = ClientConfig::new("shop", "2.0.0")
        .with_device_id("dev-42")
        .with_reconnect_delay(DELAY);
    let bridge = Bridge::builder(config).connector(connector).build();
    Harness { bridge, calls, peers }
}

async fn expect_handshake(peer: &DuplexChannelTransport) {
    let text = peer.recv().await.unwrap().unwrap();
    let Frame::Handshake(handshake) = Frame::decode(&text).unwrap() else {
        panic!("first frame was not a handshake: {text}");
    };
    assert_eq!(handshake.device_id, "dev-42");
    assert_eq!(handshake.app_name, "shop");
    assert!(handshake.capabilities.iter().any(|c| c == "state"));
}

#[tokio::test(start_paused = true)]
async fn attempt_counter_tracks_consecutive_failures() {
    let mut h = harness(4);

    assert!(h.bridge.start().await.is_err());
    assert_eq!(h.bridge.reconnect_attempts(), 1);
    assert_eq!(h.bridge.connection_state(), ConnectionState::Disconnected);

    // Retries at 2s, 4s and 6s all fail.
    tokio::time::sleep(Duration::from_millis(6500)).await;
    assert_eq!(h.calls.load(Ordering::SeqCst), 4);
    assert_eq!(h.bridge.reconnect_attempts(), 4);

    // The retry at 8s succeeds and resets the counter.
    tokio::time::sleep(DELAY).await;
    assert_eq!(h.bridge.connection_state(), ConnectionState::Connected);
    assert_eq!(h.bridge.reconnect_attempts(), 0);

    let peer = h.peers.recv().await.unwrap();
    expect_handshake(&peer).await;
}

#[tokio::test]
async fn requests_are_answered_over_the_link() {
    let mut h = harness(0);
    h.bridge.state().register("cart", || json!([{"id": 1}]));
    h.bridge.start().await.unwrap();

    let peer = h.peers.recv().await.unwrap();
    expect_handshake(&peer).await;

    let request = Frame::from(Request::new(7, "get_app_state", json!({}))).encode().unwrap();
    peer.send(&request).await.unwrap();
    peer.send("{ not json").await.unwrap();
    let unknown = Frame::from(Request::new(8, "warp", json!({}))).encode().unwrap();
    peer.send(&unknown).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..2 {
        let text = peer.recv().await.unwrap().unwrap();
        let Frame::Response(response) = Frame::decode(&text).unwrap() else {
            panic!("expected response: {text}");
        };
        seen.push(response);
    }
    seen.sort_by_key(|r| r.id);

    assert_eq!(seen[0].id, 7);
    assert_eq!(seen[0].outcome, Ok(json!({"cart": [{"id": 1}]})));
    assert_eq!(seen[1].id, 8);
    assert!(seen[1].outcome.is_err());
    assert_eq!(h.bridge.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn dropped_link_reconnects_after_delay() {
    let mut h = harness(0);
    h.bridge.start().await.unwrap();
    let first = h.peers.recv().await.unwrap();

    first.close().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.bridge.connection_state(), ConnectionState::Disconnected);
    assert_eq!(h.bridge.reconnect_attempts(), 1);

    tokio::time::sleep(DELAY).await;
    assert_eq!(h.bridge.connection_state(), ConnectionState::Connected);
    assert_eq!(h.bridge.reconnect_attempts(), 0);
    let second = h.peers.recv().await.unwrap();
    expect_handshake(&second).await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_retry() {
    let h = harness(u32::MAX);
    assert!(h.bridge.start().await.is_err());
    h.bridge.shutdown().await;

    tokio::time::sleep(DELAY * 5).await;
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.bridge.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn manual_reconnect_replaces_pending_timer() {
    let mut h = harness(1);
    assert!(h.bridge.start().await.is_err());

    h.bridge.reconnect().await.unwrap();
    assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.bridge.reconnect_attempts(), 0);

    tokio::time::sleep(DELAY * 3).await;
    assert_eq!(h.calls.load(Ordering::SeqCst), 2, "cancelled timer fired");
    let _peer = h.peers.recv().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn superseded_link_cannot_flip_state() {
    let mut h = harness(0);
    h.bridge.start().await.unwrap();
    let old = h.peers.recv().await.unwrap();

    h.bridge.reconnect().await.unwrap();
    let _new = h.peers.recv().await.unwrap();
    assert!(old.is_closed());

    tokio::time::sleep(DELAY * 3).await;
    assert_eq!(h.bridge.connection_state(), ConnectionState::Connected);
    assert_eq!(h.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn successful_start_cancels_pending_retry() {
    let mut h = harness(1);
    assert!(h.bridge.start().await.is_err());
    assert_eq!(h.bridge.reconnect_attempts(), 1);

    h.bridge.start().await.unwrap();
    let live = h.peers.recv().await.unwrap();
    assert_eq!(h.bridge.reconnect_attempts(), 0);

    tokio::time::sleep(DELAY * 3).await;
    assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    assert!(!live.is_closed());
    assert!(h.peers.try_recv().is_err());
    assert_eq!(h.bridge.connection_state(), ConnectionState::Connected);
}

/// Holds every dial until the test releases a permit.
struct GatedConnector {
    gate: Arc<Semaphore>,
    calls: Arc<AtomicU32>,
    peers: mpsc::UnboundedSender<DuplexChannelTransport>,
}

#[async_trait::async_trait]
impl Connector for GatedConnector {
    async fn connect(&self) -> transport::Result<Arc<dyn Transport>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let permit = self.gate.acquire().await.map_err(|e| transport::Error::Connect(e.to_string()))?;
        permit.forget();
        let (near, far) = DuplexChannelTransport::pair();
        let _ = self.peers.send(far);
        Ok(Arc::new(near))
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_dial_settles_disconnected() {
    let gate = Arc::new(Semaphore::new(0));
    let calls = Arc::new(AtomicU32::new(0));
    let (tx, mut peers) = mpsc::unbounded_channel();
    let connector = GatedConnector { gate: gate.clone(), calls: calls.clone(), peers: tx };
    let config = ClientConfig::new("shop", "2.0.0")
        .with_device_id("dev-42")
        .with_reconnect_delay(DELAY);
    let bridge = Arc::new(Bridge::builder(config).connector(connector).build());

    let starting = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.start().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(bridge.connection_state(), ConnectionState::Connecting);

    bridge.shutdown().await;
    assert_eq!(bridge.connection_state(), ConnectionState::Disconnected);

    gate.add_permits(1);
    assert!(starting.await.unwrap().is_err());
    let late = peers.recv().await.unwrap();
    assert!(late.is_closed());

    tokio::time::sleep(DELAY * 3).await;
    assert_eq!(bridge.connection_state(), ConnectionState::Disconnected);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
