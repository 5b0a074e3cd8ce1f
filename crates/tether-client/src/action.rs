//! # Action Registry
//!
//! Named operations the coordinator can trigger remotely. Each handler takes
//! one parameter bag and may be synchronous or asynchronous.

use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tether_proto::ErrorBody;
use tether_proto::ErrorCode;

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, std::result::Result<Value, String>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Action not found: {0}")]
    NotFound(String),
    #[error("Action '{action}' failed: {message}")]
    Failed { action: String, message: String },
}

impl From<Error> for ErrorBody {
    fn from(e: Error) -> Self {
        let code = match e {
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::Failed { .. } => ErrorCode::HandlerError,
        };
        ErrorBody::new(code, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone)]
struct RegisteredAction {
    handler: Handler,
    description: Option<String>,
}

/// Listing entry for `list_actions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Default)]
pub struct ActionRegistry {
    actions: DashMap<String, RegisteredAction>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an async handler.
    pub fn register<F, Fut, T, E>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Serialize + 'static,
        E: Display + 'static,
    {
        let handler: Handler = Arc::new(move |params| {
            let fut = handler(params);
            async move {
                let value = fut.await.map_err(|e| e.to_string())?;
                serde_json::to_value(value).map_err(|e| format!("unserializable result: {e}"))
            }
            .boxed()
        });
        self.insert(name.into(), handler);
    }

    /// Registers a synchronous handler.
    pub fn register_sync<F, T, E>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> std::result::Result<T, E> + Send + Sync + 'static,
        T: Serialize + 'static,
        E: Display + 'static,
    {
        let handler = Arc::new(handler);
        self.register(name, move |params| {
            let handler = handler.clone();
            async move { handler(params) }
        });
    }

    fn insert(&self, name: String, handler: Handler) {
        tracing::debug!(action = %name, "action registered");
        let description = self.actions.get(&name).and_then(|a| a.description.clone());
        self.actions.insert(name, RegisteredAction { handler, description });
    }

    /// Attaches a human-readable description shown by `list_actions`.
    pub fn describe(&self, name: &str, description: impl Into<String>) -> bool {
        match self.actions.get_mut(name) {
            Some(mut action) => {
                action.description = Some(description.into());
                true
            }
            None => false,
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.actions.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered actions sorted by name.
    pub fn list(&self) -> Vec<ActionInfo> {
        let mut list: Vec<ActionInfo> = self
            .actions
            .iter()
            .map(|a| ActionInfo {
                name: a.key().clone(),
                description: a.description.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Runs a handler and wraps its output as `{success, action, result}`.
    ///
    /// Handler errors and panics are returned as [`Error::Failed`].
    pub async fn execute(&self, name: &str, params: Value) -> Result<Value> {
        let handler = self
            .actions
            .get(name)
            .map(|a| a.handler.clone())
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        let params = if params.is_null() { Value::Object(Default::default()) } else { params };

        let failed = |message: String| Error::Failed { action: name.to_string(), message };

        let fut = std::panic::catch_unwind(AssertUnwindSafe(|| handler(params)))
            .map_err(|_| failed("handler panicked".into()))?;

        let result = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(value)) => value,
            Ok(Err(message)) => return Err(failed(message)),
            Err(_) => return Err(failed("handler panicked".into())),
        };

        Ok(serde_json::json!({
            "success": true,
            "action": name,
            "result": result,
        }))
    }
}
