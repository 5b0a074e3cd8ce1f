//! # Command Vocabulary
//!
//! The closed set of built-in methods a client bridge serves, each paired
//! with a typed parameter struct. Parameter bags are validated here, at the
//! boundary, so handler code only ever sees well-formed input.
//!
//! A method name that is not built in is *not* an error at this layer:
//! [`Command::parse`] returns `Ok(None)` and the caller decides whether a
//! user-registered action answers to that name.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ProtocolError;
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAppState {
    /// Registered key, optionally followed by a dotted path into its value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAppState {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteAction {
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InspectElement {
    pub x: f64,
    pub y: f64,
}

/// Interaction verbs understood by `simulate_interaction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Tap,
    Press,
    Input,
    Type,
}

impl InteractionKind {
    /// `tap`/`press` need a tap callback; `input`/`type` need a text callback.
    pub fn is_press(self) -> bool {
        matches!(self, Self::Tap | Self::Press)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tap => "tap",
            Self::Press => "press",
            Self::Input => "input",
            Self::Type => "type",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementTarget {
    pub test_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateInteraction {
    #[serde(rename = "type")]
    pub kind: InteractionKind,
    pub target: ElementTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNetworkRequests {
    /// Substring the captured URL must contain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockNetworkRequest {
    /// Regular expression matched against the full request URL.
    pub url_pattern: String,
    #[serde(default = "default_status")]
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Milliseconds to wait before answering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
}

fn default_status() -> u16 {
    200
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearNetworkMocks {
    /// Remove only this mock; all mocks when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTraces {
    /// Regular expression over the trace name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Regular expression over the source file recorded with the trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_duration: Option<f64>,
    /// Only entries started within this many milliseconds of now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Return active entries instead of finalized history.
    #[serde(default)]
    pub in_progress: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleFeatureFlag {
    pub name: String,
    /// Flip the current value when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetStorage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Regular expression over storage keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// Every built-in method, with its validated parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ping,
    GetDeviceInfo,
    GetAppState(GetAppState),
    SetAppState(SetAppState),
    ListStateKeys,
    ListActions,
    ExecuteAction(ExecuteAction),
    GetUiTree,
    TakeScreenshot,
    FindElement(FindElement),
    InspectElement(InspectElement),
    SimulateInteraction(SimulateInteraction),
    ListNetworkRequests(ListNetworkRequests),
    ClearNetworkRequests,
    MockNetworkRequest(MockNetworkRequest),
    ListNetworkMocks,
    ClearNetworkMocks(ClearNetworkMocks),
    GetTraces(GetTraces),
    ClearTraces,
    GetNavigationState,
    ListFeatureFlags,
    ToggleFeatureFlag(ToggleFeatureFlag),
    GetStorage(GetStorage),
}

impl Command {
    /// All built-in method names, in declaration order.
    pub const METHODS: &'static [&'static str] = &[
        "ping",
        "get_device_info",
        "get_app_state",
        "set_app_state",
        "list_state_keys",
        "list_actions",
        "execute_action",
        "get_ui_tree",
        "take_screenshot",
        "find_element",
        "inspect_element",
        "simulate_interaction",
        "list_network_requests",
        "clear_network_requests",
        "mock_network_request",
        "list_network_mocks",
        "clear_network_mocks",
        "get_traces",
        "clear_traces",
        "get_navigation_state",
        "list_feature_flags",
        "toggle_feature_flag",
        "get_storage",
    ];

    /// Validates a method name and parameter bag.
    ///
    /// Returns `Ok(None)` when `method` is not a built-in command.
    pub fn parse(method: &str, params: Value) -> Result<Option<Self>> {
        let command = match method {
            "ping" => Self::Ping,
            "get_device_info" => Self::GetDeviceInfo,
            "get_app_state" => Self::GetAppState(typed(method, params)?),
            "set_app_state" => Self::SetAppState(typed(method, params)?),
            "list_state_keys" => Self::ListStateKeys,
            "list_actions" => Self::ListActions,
            "execute_action" => Self::ExecuteAction(typed(method, params)?),
            "get_ui_tree" => Self::GetUiTree,
            "take_screenshot" => Self::TakeScreenshot,
            "find_element" => Self::FindElement(typed(method, params)?),
            "inspect_element" => Self::InspectElement(typed(method, params)?),
            "simulate_interaction" => Self::SimulateInteraction(typed(method, params)?),
            "list_network_requests" => Self::ListNetworkRequests(typed(method, params)?),
            "clear_network_requests" => Self::ClearNetworkRequests,
            "mock_network_request" => Self::MockNetworkRequest(typed(method, params)?),
            "list_network_mocks" => Self::ListNetworkMocks,
            "clear_network_mocks" => Self::ClearNetworkMocks(typed(method, params)?),
            "get_traces" => Self::GetTraces(typed(method, params)?),
            "clear_traces" => Self::ClearTraces,
            "get_navigation_state" => Self::GetNavigationState,
            "list_feature_flags" => Self::ListFeatureFlags,
            "toggle_feature_flag" => Self::ToggleFeatureFlag(typed(method, params)?),
            "get_storage" => Self::GetStorage(typed(method, params)?),
            _ => return Ok(None),
        };
        Ok(Some(command))
    }

    /// The wire name of this command.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::GetDeviceInfo => "get_device_info",
            Self::GetAppState(_) => "get_app_state",
            Self::SetAppState(_) => "set_app_state",
            Self::ListStateKeys => "list_state_keys",
            Self::ListActions => "list_actions",
            Self::ExecuteAction(_) => "execute_action",
            Self::GetUiTree => "get_ui_tree",
            Self::TakeScreenshot => "take_screenshot",
            Self::FindElement(_) => "find_element",
            Self::InspectElement(_) => "inspect_element",
            Self::SimulateInteraction(_) => "simulate_interaction",
            Self::ListNetworkRequests(_) => "list_network_requests",
            Self::ClearNetworkRequests => "clear_network_requests",
            Self::MockNetworkRequest(_) => "mock_network_request",
            Self::ListNetworkMocks => "list_network_mocks",
            Self::ClearNetworkMocks(_) => "clear_network_mocks",
            Self::GetTraces(_) => "get_traces",
            Self::ClearTraces => "clear_traces",
            Self::GetNavigationState => "get_navigation_state",
            Self::ListFeatureFlags => "list_feature_flags",
            Self::ToggleFeatureFlag(_) => "toggle_feature_flag",
            Self::GetStorage(_) => "get_storage",
        }
    }

    /// The parameter bag this command serializes to.
    pub fn params(&self) -> Result<Value> {
        let value = match self {
            Self::GetAppState(p) => serde_json::to_value(p)?,
            Self::SetAppState(p) => serde_json::to_value(p)?,
            Self::ExecuteAction(p) => serde_json::to_value(p)?,
            Self::FindElement(p) => serde_json::to_value(p)?,
            Self::InspectElement(p) => serde_json::to_value(p)?,
            Self::SimulateInteraction(p) => serde_json::to_value(p)?,
            Self::ListNetworkRequests(p) => serde_json::to_value(p)?,
            Self::MockNetworkRequest(p) => serde_json::to_value(p)?,
            Self::ClearNetworkMocks(p) => serde_json::to_value(p)?,
            Self::GetTraces(p) => serde_json::to_value(p)?,
            Self::ToggleFeatureFlag(p) => serde_json::to_value(p)?,
            Self::GetStorage(p) => serde_json::to_value(p)?,
            Self::Ping
            | Self::GetDeviceInfo
            | Self::ListStateKeys
            | Self::ListActions
            | Self::GetUiTree
            | Self::TakeScreenshot
            | Self::ClearNetworkRequests
            | Self::ListNetworkMocks
            | Self::ClearTraces
            | Self::GetNavigationState
            | Self::ListFeatureFlags => Value::Object(serde_json::Map::new()),
        };
        Ok(value)
    }
}

fn typed<T: DeserializeOwned>(method: &str, params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| ProtocolError::InvalidParams {
        method: method.to_string(),
        reason: e.to_string(),
    })
}
