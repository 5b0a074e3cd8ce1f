//! Current route tracking with a bounded history of prior routes.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// A route the app has left.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub route: String,
    pub params: Map<String, Value>,
}

/// Snapshot returned by `get_navigation_state`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationState {
    pub current_route: Option<String>,
    pub params: Map<String, Value>,
    /// Most recent first.
    pub history: Vec<HistoryEntry>,
}

#[derive(Default)]
struct Inner {
    current: Option<HistoryEntry>,
    history: VecDeque<HistoryEntry>,
}

pub struct NavigationTracker {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl NavigationTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity,
        }
    }

    /// Moves to `route`. The previous route, if any, is pushed onto history
    /// and the oldest entries beyond capacity are dropped.
    pub fn set(&self, route: impl Into<String>, params: Map<String, Value>) {
        let route = route.into();
        tracing::debug!(route = %route, "navigation");
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = inner.current.replace(HistoryEntry { route, params }) {
            inner.history.push_front(previous);
            inner.history.truncate(self.capacity);
        }
    }

    pub fn state(&self) -> NavigationState {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        NavigationState {
            current_route: inner.current.as_ref().map(|c| c.route.clone()),
            params: inner.current.as_ref().map(|c| c.params.clone()).unwrap_or_default(),
            history: inner.history.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn empty_tracker_has_no_route() {
        let nav = NavigationTracker::new(5);
        let state = nav.state();
        assert_eq!(state.current_route, None);
        assert!(state.history.is_empty());
    }

    #[test]
    fn previous_route_moves_to_history() {
        let nav = NavigationTracker::new(5);
        nav.set("Home", Map::new());
        nav.set("Product", params(json!({"id": 7})));

        let state = nav.state();
        assert_eq!(state.current_route.as_deref(), Some("Product"));
        assert_eq!(state.params["id"], 7);
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].route, "Home");

        let wire = serde_json::to_value(&state).unwrap();
        assert_eq!(wire["currentRoute"], "Product");
    }

    #[test]
    fn history_is_bounded() {
        let nav = NavigationTracker::new(2);
        for route in ["a", "b", "c", "d"] {
            nav.set(route, Map::new());
        }
        let routes: Vec<_> = nav.state().history.into_iter().map(|h| h.route).collect();
        assert_eq!(routes, vec!["c", "b"]);
    }
}
