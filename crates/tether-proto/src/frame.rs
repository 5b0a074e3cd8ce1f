//! # Protocol Frames
//!
//! Defines the canonical text envelope exchanged over a link.
//!
//! Every frame is a JSON object discriminated by a `type` member:
//!
//! ```text
//! {"type":"handshake","platform":..,"appName":..,"appVersion":..,"deviceId":..,"capabilities":[..]}
//! {"type":"request","id":7,"method":"get_app_state","params":{..}}
//! {"type":"response","id":7,"result":..}
//! {"type":"response","id":7,"error":{"code":"not_found","message":".."}}
//! ```
//!
//! ## Invariants
//! - **Panic Safety**: All decoding paths return `Result`, never panicking on unknown data.
//! - **Exactly One Outcome**: A response holds `result` or `error`, never both, never neither.
//!   A `null` result is a valid success.
//! - **Forward Compatibility**: Unknown members are ignored.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::error::ErrorBody;
use crate::error::ProtocolError;
use crate::error::Result;

/// Identity record a client sends once, immediately after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub platform: String,
    pub app_name: String,
    pub app_version: String,
    pub device_id: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// A call awaiting exactly one [`Response`] with the same id.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self { id, method: method.into(), params }
    }
}

/// The settled outcome of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub outcome: std::result::Result<Value, ErrorBody>,
}

impl Response {
    pub fn ok(id: u64, result: Value) -> Self {
        Self { id, outcome: Ok(result) }
    }

    pub fn err(id: u64, error: ErrorBody) -> Self {
        Self { id, outcome: Err(error) }
    }
}

/// One text frame on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Handshake(Handshake),
    Request(Request),
    Response(Response),
}

impl Frame {
    /// Parses and validates a text frame against the canonical envelope.
    ///
    /// Any shape other than the three documented variants is rejected as
    /// [`ProtocolError::Malformed`].
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut obj) = value else {
            return Err(malformed("frame is not a JSON object"));
        };

        let kind = match obj.remove("type") {
            Some(Value::String(s)) => s,
            Some(_) => return Err(malformed("'type' is not a string")),
            None => return Err(malformed("missing 'type' discriminator")),
        };

        match kind.as_str() {
            "handshake" => {
                let handshake: Handshake = serde_json::from_value(Value::Object(obj))
                    .map_err(|e| malformed(&format!("bad handshake: {e}")))?;
                Ok(Self::Handshake(handshake))
            }
            "request" => {
                let id = take_id(&mut obj)?;
                let method = match obj.remove("method") {
                    Some(Value::String(m)) if !m.is_empty() => m,
                    Some(_) => return Err(malformed("'method' must be a non-empty string")),
                    None => return Err(malformed("request without 'method'")),
                };
                let params = match obj.remove("params") {
                    None | Some(Value::Null) => Value::Object(Map::new()),
                    Some(p @ Value::Object(_)) => p,
                    Some(_) => return Err(malformed("'params' must be an object")),
                };
                Ok(Self::Request(Request { id, method, params }))
            }
            "response" => {
                let id = take_id(&mut obj)?;
                let outcome = match (obj.remove("result"), obj.remove("error")) {
                    (Some(result), None) => Ok(result),
                    (None, Some(error)) => {
                        let body: ErrorBody = serde_json::from_value(error)
                            .map_err(|e| malformed(&format!("bad error body: {e}")))?;
                        Err(body)
                    }
                    (Some(_), Some(_)) => return Err(malformed("response has both 'result' and 'error'")),
                    (None, None) => return Err(malformed("response has neither 'result' nor 'error'")),
                };
                Ok(Self::Response(Response { id, outcome }))
            }
            other => Err(malformed(&format!("unknown frame type '{other}'"))),
        }
    }

    /// Serializes this frame into its canonical text form.
    pub fn encode(&self) -> Result<String> {
        let value = match self {
            Self::Handshake(h) => {
                let mut value = serde_json::to_value(h)?;
                if let Value::Object(obj) = &mut value {
                    obj.insert("type".into(), Value::from("handshake"));
                }
                value
            }
            Self::Request(r) => serde_json::json!({
                "type": "request",
                "id": r.id,
                "method": r.method,
                "params": r.params,
            }),
            Self::Response(r) => match &r.outcome {
                Ok(result) => serde_json::json!({
                    "type": "response",
                    "id": r.id,
                    "result": result,
                }),
                Err(error) => serde_json::json!({
                    "type": "response",
                    "id": r.id,
                    "error": error,
                }),
            },
        };
        Ok(serde_json::to_string(&value)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "handshake",
            Self::Request(_) => "request",
            Self::Response(_) => "response",
        }
    }
}

impl From<Handshake> for Frame {
    fn from(h: Handshake) -> Self {
        Self::Handshake(h)
    }
}

impl From<Request> for Frame {
    fn from(r: Request) -> Self {
        Self::Request(r)
    }
}

impl From<Response> for Frame {
    fn from(r: Response) -> Self {
        Self::Response(r)
    }
}

fn take_id(obj: &mut Map<String, Value>) -> Result<u64> {
    match obj.remove("id") {
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| malformed("'id' must be a non-negative integer")),
        Some(_) => Err(malformed("'id' must be a non-negative integer")),
        None => Err(malformed("missing 'id'")),
    }
}

fn malformed(reason: &str) -> ProtocolError {
    ProtocolError::Malformed(reason.to_string())
}
