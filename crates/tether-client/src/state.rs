//! # State Registry
//!
//! Named, zero-argument read accessors over live application data.
//!
//! Getters are invoked on demand and never cached. A getter that fails (or
//! panics) only poisons its own key: a full snapshot substitutes an error
//! marker for that key and still returns every other value.

use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use tether_proto::ErrorBody;
use tether_proto::ErrorCode;

type Getter = Arc<dyn Fn() -> std::result::Result<Value, String> + Send + Sync>;
type Setter = Arc<dyn Fn(Value) -> std::result::Result<(), String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("State not found: {0}")]
    NotFound(String),
    #[error("State getter '{key}' failed: {message}")]
    Getter { key: String, message: String },
    #[error("State '{0}' is read-only")]
    ReadOnly(String),
    #[error("State setter '{key}' failed: {message}")]
    Setter { key: String, message: String },
}

impl From<Error> for ErrorBody {
    fn from(e: Error) -> Self {
        let code = match e {
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::ReadOnly(_) => ErrorCode::InvalidParams,
            Error::Getter { .. } | Error::Setter { .. } => ErrorCode::HandlerError,
        };
        ErrorBody::new(code, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone)]
struct StateEntry {
    getter: Getter,
    setter: Option<Setter>,
}

/// Keyed store of state getters. Last registration for a key wins.
#[derive(Default)]
pub struct StateRegistry {
    entries: DashMap<String, StateEntry>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an infallible getter whose output is serialized on each read.
    pub fn register<F, T>(&self, key: impl Into<String>, getter: F)
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Serialize + 'static,
    {
        self.insert(key.into(), wrap_getter(move || Ok::<_, String>(getter())), None);
    }

    /// Registers a getter that may fail.
    pub fn register_fallible<F, T, E>(&self, key: impl Into<String>, getter: F)
    where
        F: Fn() -> std::result::Result<T, E> + Send + Sync + 'static,
        T: Serialize + 'static,
        E: Display + 'static,
    {
        self.insert(key.into(), wrap_getter(getter), None);
    }

    /// Registers a getter together with a setter, making the key writable
    /// through `set_app_state`.
    pub fn register_with_setter<G, S, T, E>(&self, key: impl Into<String>, getter: G, setter: S)
    where
        G: Fn() -> T + Send + Sync + 'static,
        T: Serialize + 'static,
        S: Fn(Value) -> std::result::Result<(), E> + Send + Sync + 'static,
        E: Display + 'static,
    {
        let setter: Setter = Arc::new(move |value| setter(value).map_err(|e| e.to_string()));
        self.insert(key.into(), wrap_getter(move || Ok::<_, String>(getter())), Some(setter));
    }

    fn insert(&self, key: String, getter: Getter, setter: Option<Setter>) {
        tracing::debug!(key = %key, writable = setter.is_some(), "state registered");
        self.entries.insert(key, StateEntry { getter, setter });
    }

    pub fn unregister(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Invokes every getter independently.
    ///
    /// A failing getter yields `{"error": "<message>"}` under its key, so the
    /// result always has one entry per registered key.
    pub fn snapshot(&self) -> Map<String, Value> {
        let entries: Vec<(String, StateEntry)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut out = Map::new();
        for (key, entry) in entries {
            let value = match invoke(&key, &entry.getter) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "state getter failed");
                    serde_json::json!({ "error": e.to_string() })
                }
            };
            out.insert(key, value);
        }
        out
    }

    /// Reads one key. `key` may be a dotted path (`cart.items.0.id`) into the
    /// value of a registered key; an exact registration always wins.
    pub fn get(&self, key: &str) -> Result<Value> {
        if let Some(entry) = self.entry(key) {
            return invoke(key, &entry.getter);
        }

        let mut segments = key.split('.');
        let root = segments.next().unwrap_or(key);
        let entry = self.entry(root).ok_or_else(|| Error::NotFound(key.to_string()))?;
        let mut value = invoke(root, &entry.getter)?;

        for segment in segments {
            value = descend(value, segment).ok_or_else(|| Error::NotFound(key.to_string()))?;
        }
        Ok(value)
    }

    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let entry = self.entry(key).ok_or_else(|| Error::NotFound(key.to_string()))?;
        let setter = entry.setter.ok_or_else(|| Error::ReadOnly(key.to_string()))?;
        match std::panic::catch_unwind(AssertUnwindSafe(|| setter(value))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(Error::Setter { key: key.to_string(), message }),
            Err(_) => Err(Error::Setter { key: key.to_string(), message: "setter panicked".into() }),
        }
    }

    /// Clones the entry out so user code never runs under a shard lock.
    fn entry(&self, key: &str) -> Option<StateEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }
}

fn wrap_getter<F, T, E>(getter: F) -> Getter
where
    F: Fn() -> std::result::Result<T, E> + Send + Sync + 'static,
    T: Serialize + 'static,
    E: Display + 'static,
{
    Arc::new(move || {
        let value = getter().map_err(|e| e.to_string())?;
        serde_json::to_value(value).map_err(|e| format!("unserializable value: {e}"))
    })
}

fn invoke(key: &str, getter: &Getter) -> Result<Value> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| getter())) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(message)) => Err(Error::Getter { key: key.to_string(), message }),
        Err(_) => Err(Error::Getter { key: key.to_string(), message: "getter panicked".into() }),
    }
}

fn descend(value: Value, segment: &str) -> Option<Value> {
    match value {
        Value::Object(mut map) => map.remove(segment),
        Value::Array(mut items) => {
            let index: usize = segment.parse().ok()?;
            (index < items.len()).then(|| items.swap_remove(index))
        }
        _ => None,
    }
}
