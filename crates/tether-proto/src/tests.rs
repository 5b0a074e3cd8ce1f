use serde_json::json;

use crate::command::InteractionKind;
use crate::mock_transport::DuplexChannelTransport;
use crate::*;

// ============================================================================
//  ENVELOPE
// ============================================================================

#[test]
fn decode_handshake() {
    let text = r#"{"type":"handshake","platform":"ios","appName":"shop","appVersion":"1.2.0","deviceId":"abc","capabilities":["state","ui"]}"#;
    let frame = Frame::decode(text).unwrap();
    let Frame::Handshake(h) = frame else { panic!("expected handshake") };
    assert_eq!(h.platform, "ios");
    assert_eq!(h.app_name, "shop");
    assert_eq!(h.device_id, "abc");
    assert_eq!(h.capabilities, vec!["state", "ui"]);
}

#[test]
fn decode_request_defaults_params_to_empty_object() {
    let frame = Frame::decode(r#"{"type":"request","id":3,"method":"ping"}"#).unwrap();
    assert_eq!(frame, Frame::Request(Request::new(3, "ping", json!({}))));
}

#[test]
fn decode_response_null_result_is_success() {
    let frame = Frame::decode(r#"{"type":"response","id":9,"result":null}"#).unwrap();
    assert_eq!(frame, Frame::Response(Response::ok(9, serde_json::Value::Null)));
}

#[test]
fn decode_response_error() {
    let text = r#"{"type":"response","id":9,"error":{"code":"not_found","message":"no such key"}}"#;
    let Frame::Response(resp) = Frame::decode(text).unwrap() else { panic!("expected response") };
    let err = resp.outcome.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
    assert_eq!(err.message, "no such key");
}

#[test]
fn malformed_shapes_are_rejected() {
    let cases = [
        "not json",
        "[1,2,3]",
        r#"{"id":1,"method":"ping"}"#,
        r#"{"type":"event","id":1}"#,
        r#"{"type":"request","method":"ping"}"#,
        r#"{"type":"request","id":-4,"method":"ping"}"#,
        r#"{"type":"request","id":1,"method":""}"#,
        r#"{"type":"request","id":1,"method":"ping","params":[1]}"#,
        r#"{"type":"response","id":1}"#,
        r#"{"type":"response","id":1,"result":1,"error":{"code":"internal","message":"x"}}"#,
        r#"{"type":"response","id":1,"error":"plain string"}"#,
        r#"{"type":"handshake","platform":"ios"}"#,
    ];
    for case in cases {
        assert!(Frame::decode(case).is_err(), "accepted malformed frame: {case}");
    }
}

#[test]
fn encode_then_decode_preserves_error_response() {
    let frame = Frame::Response(Response::err(5, ErrorBody::unknown_method("nope")));
    let text = frame.encode().unwrap();
    assert!(text.contains(r#""type":"response""#));
    assert!(text.contains(r#""code":"unknown_method""#));
    assert_eq!(Frame::decode(&text).unwrap(), frame);
}

#[test]
fn encode_handshake_carries_discriminator() {
    let frame = Frame::Handshake(Handshake {
        platform: "android".into(),
        app_name: "demo".into(),
        app_version: "0.1.0".into(),
        device_id: "d1".into(),
        capabilities: vec!["traces".into()],
    });
    let value: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
    assert_eq!(value["type"], "handshake");
    assert_eq!(value["appName"], "demo");
    assert_eq!(value["deviceId"], "d1");
}

// ============================================================================
//  COMMANDS
// ============================================================================

#[test]
fn unknown_method_is_not_builtin() {
    assert_eq!(Command::parse("checkout", json!({})).unwrap(), None);
}

#[test]
fn every_listed_method_parses_with_minimal_params() {
    let minimal = |method: &str| match method {
        "set_app_state" => json!({"key": "k", "value": 1}),
        "execute_action" => json!({"name": "go"}),
        "inspect_element" => json!({"x": 1.0, "y": 2.0}),
        "simulate_interaction" => json!({"type": "tap", "target": {"testId": "b"}}),
        "mock_network_request" => json!({"urlPattern": ".*"}),
        "toggle_feature_flag" => json!({"name": "f"}),
        _ => json!({}),
    };
    for method in Command::METHODS {
        let command = Command::parse(method, minimal(method))
            .unwrap_or_else(|e| panic!("{method}: {e}"))
            .unwrap_or_else(|| panic!("{method} not recognized"));
        assert_eq!(command.method(), *method);
    }
}

#[test]
fn simulate_interaction_params_use_wire_names() {
    let params = json!({"type": "input", "target": {"testId": "email"}, "value": "a@b.c"});
    let Some(Command::SimulateInteraction(p)) = Command::parse("simulate_interaction", params).unwrap() else {
        panic!("expected simulate_interaction");
    };
    assert_eq!(p.kind, InteractionKind::Input);
    assert_eq!(p.target.test_id, "email");
    assert_eq!(p.value.as_deref(), Some("a@b.c"));
}

#[test]
fn mock_defaults_status_to_200() {
    let Some(Command::MockNetworkRequest(p)) =
        Command::parse("mock_network_request", json!({"urlPattern": "/api/cart"})).unwrap()
    else {
        panic!("expected mock_network_request");
    };
    assert_eq!(p.status_code, 200);
    assert!(p.headers.is_empty());
}

#[test]
fn bad_params_name_the_method() {
    let err = Command::parse("inspect_element", json!({"x": "left"})).unwrap_err();
    match &err {
        ProtocolError::InvalidParams { method, .. } => assert_eq!(method, "inspect_element"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(ErrorBody::from(err).code, ErrorCode::InvalidParams);
}

#[test]
fn params_round_trip_through_parse() {
    let command = Command::GetTraces(command::GetTraces {
        name: Some("^fetch".into()),
        min_duration: Some(5.0),
        in_progress: true,
        ..Default::default()
    });
    let params = command.params().unwrap();
    assert_eq!(params["minDuration"], 5.0);
    assert_eq!(params["inProgress"], true);
    assert_eq!(Command::parse(command.method(), params).unwrap(), Some(command));
}

// ============================================================================
//  TRANSPORT
// ============================================================================

#[tokio::test]
async fn duplex_pair_delivers_both_ways() {
    let (a, b) = DuplexChannelTransport::pair();
    a.send("hello").await.unwrap();
    b.send("world").await.unwrap();
    assert_eq!(b.recv().await.unwrap().as_deref(), Some("hello"));
    assert_eq!(a.recv().await.unwrap().as_deref(), Some("world"));
}

#[tokio::test]
async fn duplex_close_ends_both_halves() {
    let (a, b) = DuplexChannelTransport::pair();
    let reader = tokio::spawn(async move { b.recv().await });
    a.close().await;
    assert_eq!(reader.await.unwrap().unwrap(), None);
    assert!(a.send("late").await.is_err());
}
