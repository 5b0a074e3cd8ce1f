//! # Command Dispatcher
//!
//! Turns one [`Request`] into exactly one [`Response`].
//!
//! Lookup order is: built-in [`Command`], then a user action registered under
//! the same name, then `unknown_method`. Every failure (including a panic in
//! host code) becomes an error response; nothing escapes to the read loop.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use regex::Regex;
use serde_json::Value;
use serde_json::json;
use tether_proto::Command;
use tether_proto::ErrorBody;
use tether_proto::ErrorCode;
use tether_proto::ProtocolError;
use tether_proto::Request;
use tether_proto::Response;
use tether_proto::command::GetStorage;

use crate::action;
use crate::context::BridgeContext;
use crate::flags;
use crate::network;
use crate::state;
use crate::trace;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unknown method: {0}")]
    UnknownMethod(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    State(#[from] state::Error),
    #[error(transparent)]
    Action(#[from] action::Error),
    #[error(transparent)]
    Network(#[from] network::Error),
    #[error(transparent)]
    Trace(#[from] trace::Error),
    #[error(transparent)]
    Flag(#[from] flags::Error),
    #[error("No {0} provider installed")]
    Unavailable(&'static str),
    #[error("{provider} provider failed: {message}")]
    Provider { provider: &'static str, message: String },
    #[error("Storage key not found: {0}")]
    StorageKeyNotFound(String),
    #[error("Invalid storage pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("Result not serializable: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Handler for '{0}' panicked")]
    Panicked(String),
}

impl From<Error> for ErrorBody {
    fn from(e: Error) -> Self {
        match e {
            Error::UnknownMethod(method) => ErrorBody::unknown_method(&method),
            Error::Protocol(e) => e.into(),
            Error::State(e) => e.into(),
            Error::Action(e) => e.into(),
            Error::Network(e) => e.into(),
            Error::Trace(e) => e.into(),
            Error::Flag(e) => e.into(),
            e @ Error::Unavailable(_) => ErrorBody::new(ErrorCode::Unavailable, e.to_string()),
            e @ Error::Provider { .. } => ErrorBody::new(ErrorCode::HandlerError, e.to_string()),
            e @ Error::StorageKeyNotFound(_) => ErrorBody::new(ErrorCode::NotFound, e.to_string()),
            e @ Error::InvalidPattern { .. } => ErrorBody::new(ErrorCode::InvalidParams, e.to_string()),
            e @ (Error::Serialize(_) | Error::Panicked(_)) => ErrorBody::new(ErrorCode::Internal, e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Answers requests against one [`BridgeContext`]. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<BridgeContext>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &BridgeContext {
        &self.ctx
    }

    /// Executes a request and builds its response.
    pub async fn dispatch(&self, request: Request) -> Response {
        let Request { id, method, params } = request;

        let outcome = AssertUnwindSafe(self.route(&method, params))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(Error::Panicked(method.clone())));

        match outcome {
            Ok(result) => Response::ok(id, result),
            Err(e) => {
                tracing::warn!(id, method = %method, error = %e, "request failed");
                Response::err(id, e.into())
            }
        }
    }

    async fn route(&self, method: &str, params: Value) -> Result<Value> {
        if let Some(command) = Command::parse(method, params.clone())? {
            return self.execute(command).await;
        }
        if self.ctx.actions.contains(method) {
            return Ok(self.ctx.actions.execute(method, params).await?);
        }
        Err(Error::UnknownMethod(method.to_string()))
    }

    /// Runs one built-in command.
    pub async fn execute(&self, command: Command) -> Result<Value> {
        let ctx = &self.ctx;
        let value = match command {
            Command::Ping => json!("pong"),
            Command::GetDeviceInfo => ctx.device_info(),

            Command::GetAppState(p) => match p.key {
                Some(key) => ctx.state.get(&key)?,
                None => Value::Object(ctx.state.snapshot()),
            },
            Command::SetAppState(p) => {
                ctx.state.set(&p.key, p.value)?;
                json!({ "success": true, "key": p.key })
            }
            Command::ListStateKeys => json!(ctx.state.keys()),

            Command::ListActions => serde_json::to_value(ctx.actions.list())?,
            Command::ExecuteAction(p) => ctx.actions.execute(&p.name, p.params).await?,

            Command::GetUiTree => match &ctx.ui_provider {
                Some(provider) => provider
                    .view_hierarchy()
                    .await
                    .map_err(|message| Error::Provider { provider: "ui", message })?,
                None => json!({ "components": ctx.components.all() }),
            },
            Command::TakeScreenshot => {
                let provider = ctx.ui_provider.as_ref().ok_or(Error::Unavailable("screenshot"))?;
                let shot = provider
                    .screenshot()
                    .await
                    .map_err(|message| Error::Provider { provider: "screenshot", message })?;
                serde_json::to_value(shot)?
            }
            Command::FindElement(p) => serde_json::to_value(ctx.components.find(&p))?,
            Command::InspectElement(p) => ctx.components.inspect(p.x, p.y),
            Command::SimulateInteraction(p) => ctx.components.interact(&p),

            Command::ListNetworkRequests(p) => serde_json::to_value(ctx.network.requests(&p))?,
            Command::ClearNetworkRequests => json!({ "cleared": ctx.network.clear_requests() }),
            Command::MockNetworkRequest(p) => json!({ "mockId": ctx.network.add_mock(p)? }),
            Command::ListNetworkMocks => serde_json::to_value(ctx.network.list_mocks())?,
            Command::ClearNetworkMocks(p) => {
                let removed = match p.mock_id {
                    Some(id) => usize::from(ctx.network.remove_mock(&id)),
                    None => ctx.network.clear_mocks(),
                };
                json!({ "removed": removed })
            }

            Command::GetTraces(p) => serde_json::to_value(ctx.traces.query(&p)?)?,
            Command::ClearTraces => json!({ "cleared": ctx.traces.clear() }),

            Command::GetNavigationState => serde_json::to_value(ctx.navigation.state())?,

            Command::ListFeatureFlags => json!(ctx.flags.list()),
            Command::ToggleFeatureFlag(p) => {
                let enabled = ctx.flags.toggle(&p.name, p.enabled)?;
                json!({ "name": p.name, "enabled": enabled })
            }

            Command::GetStorage(p) => self.storage(p).await?,
        };
        Ok(value)
    }

    async fn storage(&self, query: GetStorage) -> Result<Value> {
        let provider = self.ctx.storage_provider.as_ref().ok_or(Error::Unavailable("storage"))?;
        let failed = |message| Error::Provider { provider: "storage", message };

        if let Some(key) = query.key {
            let value = provider.get(&key).await.map_err(failed)?;
            let value = value.ok_or_else(|| Error::StorageKeyNotFound(key.clone()))?;
            return Ok(json!({ "key": key, "value": value }));
        }

        let pattern = query
            .pattern
            .map(|p| {
                Regex::new(&p).map_err(|e| Error::InvalidPattern { pattern: p.clone(), reason: e.to_string() })
            })
            .transpose()?;

        let mut entries = BTreeMap::new();
        for key in provider.keys().await.map_err(failed)? {
            if pattern.as_ref().is_some_and(|re| !re.is_match(&key)) {
                continue;
            }
            // Keys can disappear between enumeration and lookup.
            if let Some(value) = provider.get(&key).await.map_err(failed)? {
                entries.insert(key, value);
            }
        }
        Ok(json!({ "entries": entries }))
    }
}
