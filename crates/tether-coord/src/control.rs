//! Line-oriented control channel for the coordinator binary.
//!
//! Each input line is a JSON object `{"device"?, "method", "params"?}` and
//! yields exactly one output object, `{"ok": result}` or `{"error": message}`.
//! Two pseudo-methods are answered locally without touching any device:
//! `list_devices` and `select_device` (`{"device": id}`).

use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

use crate::server::Coordinator;

#[derive(Debug, Deserialize)]
struct ControlLine {
    #[serde(default)]
    device: Option<String>,
    method: String,
    #[serde(default)]
    params: Value,
}

/// Executes one control line against `coordinator`.
pub async fn handle_line(coordinator: &Coordinator, line: &str) -> Value {
    let parsed: ControlLine = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => return json!({ "error": format!("invalid control line: {e}") }),
    };
    let params = if parsed.params.is_null() { json!({}) } else { parsed.params };

    match parsed.method.as_str() {
        "list_devices" => json!({ "ok": coordinator.devices().list() }),
        "select_device" => {
            let target = parsed.device.or_else(|| params.get("device").and_then(Value::as_str).map(String::from));
            let Some(target) = target else {
                return json!({ "error": "select_device needs a device id" });
            };
            match coordinator.devices().select(&target) {
                Ok(()) => json!({ "ok": { "selected": target } }),
                Err(e) => json!({ "error": e.to_string() }),
            }
        }
        method => match coordinator.router().send_command(parsed.device.as_deref(), method, params).await {
            Ok(result) => json!({ "ok": result }),
            Err(e) => json!({ "error": e.to_string() }),
        },
    }
}
