//! End-to-end tests over a real loopback WebSocket.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use serde_json::json;

use tether_client::Bridge;
use tether_client::ClientConfig;
use tether_client::Component;
use tether_client::Rect;
use tether_coord::Coordinator;
use tether_coord::CoordinatorConfig;
use tether_coord::router;
use tether_proto::Command;
use tether_proto::ErrorCode;
use tether_proto::command::InspectElement;

async fn coordinator() -> (Arc<Coordinator>, String) {
    let config = CoordinatorConfig::default()
        .with_bind("127.0.0.1:0".parse().unwrap())
        .with_request_timeout(Duration::from_secs(5));
    let coordinator = Arc::new(Coordinator::new(config));
    let listener = coordinator.bind().await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(coordinator.clone().serve(listener));
    (coordinator, url)
}

fn client(url: &str, device_id: &str) -> Bridge {
    let config = ClientConfig::new("shop", "3.1.0")
        .with_url(url)
        .with_platform("android")
        .with_device_id(device_id)
        .with_reconnect_delay(Duration::from_millis(50));
    Bridge::builder(config).build()
}

async fn wait_for_devices(coordinator: &Coordinator, count: usize) {
    for _ in 0..200 {
        if coordinator.devices().len() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} devices, have {}", coordinator.devices().len());
}

#[tokio::test]
async fn commands_round_trip_through_a_real_socket() {
    let (coordinator, url) = coordinator().await;
    let bridge = client(&url, "pixel-1");
    bridge.state().register("cart", || json!([{"id": 1}]));
    bridge.actions().register_sync("add_to_cart", |params: Value| Ok::<_, String>(json!({"added": params["sku"]})));
    bridge
        .components()
        .register(Component::new("buy", "Button").with_bounds(Rect::new(0.0, 0.0, 100.0, 40.0)));
    bridge.start().await.unwrap();
    wait_for_devices(&coordinator, 1).await;

    let devices = coordinator.devices().list();
    assert_eq!(devices[0].id, "pixel-1");
    assert_eq!(devices[0].platform, "android");

    let router = coordinator.router();
    assert_eq!(router.send(None, &Command::Ping).await.unwrap(), json!("pong"));

    let state = router.send_command(None, "get_app_state", json!({})).await.unwrap();
    assert_eq!(state, json!({"cart": [{"id": 1}]}));

    let hit = router
        .send(Some("pixel-1"), &Command::InspectElement(InspectElement { x: 5.0, y: 5.0 }))
        .await
        .unwrap();
    assert_eq!(hit["element"]["testId"], "buy");

    let action = router.send_command(None, "add_to_cart", json!({"sku": "X1"})).await.unwrap();
    assert_eq!(action["result"], json!({"added": "X1"}));

    match router.send_command(None, "teleport", json!({})).await {
        Err(router::Error::Remote(body)) => assert_eq!(body.code, ErrorCode::UnknownMethod),
        other => panic!("unexpected: {other:?}"),
    }

    bridge.shutdown().await;
    wait_for_devices(&coordinator, 0).await;
    assert_eq!(router.send_command(None, "ping", json!({})).await, Err(router::Error::NoDevice));
}

#[tokio::test]
async fn concurrent_requests_are_correlated() {
    let (coordinator, url) = coordinator().await;
    let bridge = client(&url, "pixel-2");
    bridge.actions().register("echo_later", |params: Value| async move {
        let ms = params["ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok::<_, String>(params["n"].clone())
    });
    bridge.start().await.unwrap();
    wait_for_devices(&coordinator, 1).await;

    let calls: Vec<_> = (0..5u64)
        .map(|n| {
            let router = coordinator.router().clone();
            tokio::spawn(async move {
                let params = json!({"n": n, "ms": 50 - n * 10});
                router.send_command(None, "echo_later", params).await
            })
        })
        .collect();

    for (n, call) in calls.into_iter().enumerate() {
        let out = call.await.unwrap().unwrap();
        assert_eq!(out["result"], json!(n));
    }
    bridge.shutdown().await;
}

#[tokio::test]
async fn two_devices_are_addressable_independently() {
    let (coordinator, url) = coordinator().await;
    let a = client(&url, "a");
    let b = client(&url, "b");
    a.state().register("who", || "a");
    b.state().register("who", || "b");
    a.start().await.unwrap();
    wait_for_devices(&coordinator, 1).await;
    b.start().await.unwrap();
    wait_for_devices(&coordinator, 2).await;

    let router = coordinator.router();
    let from_b = router.send_command(Some("b"), "get_app_state", json!({"key": "who"})).await.unwrap();
    assert_eq!(from_b, json!("b"));

    let primary = router.send_command(None, "get_app_state", json!({"key": "who"})).await.unwrap();
    assert_eq!(primary, json!("a"));

    coordinator.devices().select("b").unwrap();
    let primary = router.send_command(None, "get_app_state", json!({"key": "who"})).await.unwrap();
    assert_eq!(primary, json!("b"));

    a.shutdown().await;
    b.shutdown().await;
}
