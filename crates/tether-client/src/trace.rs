//! # Trace Engine
//!
//! Records function invocations reported by instrumentation callers.
//!
//! `trace` opens an entry and hands back its [`TraceId`]; the caller passes
//! that id to `trace_return` or `trace_error` to finalize it. Completion is
//! keyed by id only, so concurrent or re-entrant calls sharing a name never
//! collide.
//!
//! ## Invariants
//! - **Finalize Once**: an id leaves the active table exactly once; a second
//!   completion for the same id is ignored.
//! - **Bounded History**: at most `capacity` finalized entries are kept, oldest
//!   dropped first.

use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tether_proto::ErrorBody;
use tether_proto::ErrorCode;
use tether_proto::command::GetTraces;

use crate::network::epoch_millis;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Invalid {field} pattern '{pattern}': {reason}")]
    InvalidPattern { field: &'static str, pattern: String, reason: String },
}

impl From<Error> for ErrorBody {
    fn from(e: Error) -> Self {
        ErrorBody::new(ErrorCode::InvalidParams, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TraceId(u64);

impl Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "trace-{}", self.0)
    }
}

/// Optional context captured when a trace opens.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceInfo {
    pub file: Option<String>,
    pub args: Value,
}

impl TraceInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn args(mut self, args: impl Serialize) -> Self {
        self.args = serde_json::to_value(args).unwrap_or(Value::Null);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub id: TraceId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub args: Value,
    /// Milliseconds since the Unix epoch.
    pub started_at: u64,
    /// Milliseconds; set on finalization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed: bool,
    #[serde(skip)]
    started: Option<tokio::time::Instant>,
}

pub struct TraceEngine {
    active: DashMap<TraceId, TraceEntry>,
    history: Mutex<VecDeque<TraceEntry>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl TraceEngine {
    pub fn new(capacity: usize) -> Self {
        Self {
            active: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    /// Opens a trace entry.
    pub fn trace(&self, name: impl Into<String>, info: TraceInfo) -> TraceId {
        let id = TraceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = TraceEntry {
            id,
            name: name.into(),
            file: info.file,
            args: info.args,
            started_at: epoch_millis(),
            duration: None,
            return_value: None,
            error: None,
            completed: false,
            started: Some(tokio::time::Instant::now()),
        };
        tracing::trace!(trace = %id, name = %entry.name, "trace opened");
        self.active.insert(id, entry);
        id
    }

    /// Finalizes `id` with a return value.
    pub fn trace_return(&self, id: TraceId, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.finalize(id, |entry| entry.return_value = Some(value));
    }

    /// Finalizes `id` with an error message.
    pub fn trace_error(&self, id: TraceId, message: impl Into<String>) {
        let message = message.into();
        self.finalize(id, |entry| entry.error = Some(message));
    }

    /// Traces one awaited call. An `Err` is recorded and returned unchanged.
    pub async fn trace_async<F, Fut, T, E>(&self, name: impl Into<String>, info: TraceInfo, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Serialize,
        E: Display,
    {
        let id = self.trace(name, info);
        let mut open = OpenTrace { engine: self, id: Some(id) };
        let result = f().await;
        open.id = None;
        self.settle(id, &result);
        result
    }

    /// Traces one synchronous call. An `Err` is recorded and returned unchanged.
    pub fn trace_sync<F, T, E>(&self, name: impl Into<String>, info: TraceInfo, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        T: Serialize,
        E: Display,
    {
        let id = self.trace(name, info);
        let result = f();
        self.settle(id, &result);
        result
    }

    fn settle<T: Serialize, E: Display>(&self, id: TraceId, result: &std::result::Result<T, E>) {
        match result {
            Ok(value) => self.trace_return(id, value),
            Err(e) => self.trace_error(id, e.to_string()),
        }
    }

    fn finalize(&self, id: TraceId, complete: impl FnOnce(&mut TraceEntry)) {
        let Some((_, mut entry)) = self.active.remove(&id) else {
            tracing::debug!(trace = %id, "completion for unknown or finalized trace ignored");
            return;
        };

        let elapsed = entry.started.map(|s| s.elapsed()).unwrap_or(Duration::ZERO);
        entry.duration = Some(elapsed.as_secs_f64() * 1000.0);
        entry.completed = true;
        complete(&mut entry);
        tracing::trace!(trace = %id, name = %entry.name, duration_ms = entry.duration, "trace finalized");

        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push_back(entry);
        while history.len() > self.capacity {
            history.pop_front();
        }
    }

    /// Open entries, oldest first.
    pub fn active(&self) -> Vec<TraceEntry> {
        let mut entries: Vec<TraceEntry> = self.active.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    /// Finalized entries, most recent first.
    pub fn history(&self) -> Vec<TraceEntry> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.iter().rev().cloned().collect()
    }

    /// Filters history (or active entries with `in_progress`).
    pub fn query(&self, filter: &GetTraces) -> Result<Vec<TraceEntry>> {
        let name = compile("name", filter.name.as_deref())?;
        let file = compile("file", filter.file.as_deref())?;
        let cutoff = filter.since.map(|window| epoch_millis().saturating_sub(window));

        let source = if filter.in_progress { self.active() } else { self.history() };
        let entries = source
            .into_iter()
            .filter(|e| name.as_ref().is_none_or(|re| re.is_match(&e.name)))
            .filter(|e| {
                file.as_ref()
                    .is_none_or(|re| e.file.as_deref().is_some_and(|f| re.is_match(f)))
            })
            .filter(|e| {
                filter
                    .min_duration
                    .is_none_or(|min| e.duration.is_some_and(|d| d >= min))
            })
            .filter(|e| cutoff.is_none_or(|c| e.started_at >= c))
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(entries)
    }

    /// Drops finalized history. Active entries are left open.
    pub fn clear(&self) -> usize {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let n = history.len();
        history.clear();
        n
    }
}

/// Finalizes a wrapped trace as cancelled if its future is dropped early.
struct OpenTrace<'a> {
    engine: &'a TraceEngine,
    id: Option<TraceId>,
}

impl Drop for OpenTrace<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.engine.trace_error(id, "cancelled");
        }
    }
}

fn compile(field: &'static str, pattern: Option<&str>) -> Result<Option<Regex>> {
    pattern
        .map(|p| {
            Regex::new(p).map_err(|e| Error::InvalidPattern {
                field,
                pattern: p.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn duration_tracks_elapsed_time() {
        let engine = TraceEngine::new(10);
        let id = engine.trace("fetchCart", TraceInfo::new().file("cart.rs").args(json!([1])));
        tokio::time::advance(Duration::from_millis(120)).await;
        engine.trace_return(id, json!({"items": 2}));

        let history = engine.history();
        assert_eq!(history.len(), 1);
        let entry = &history[0];
        assert!(entry.completed);
        assert_eq!(entry.return_value, Some(json!({"items": 2})));
        let duration = entry.duration.unwrap();
        assert!((120.0..125.0).contains(&duration), "{duration}");
        assert!(engine.active().is_empty());
    }

    #[test]
    fn same_name_traces_complete_independently() {
        let engine = TraceEngine::new(10);
        let first = engine.trace("load", TraceInfo::new());
        let second = engine.trace("load", TraceInfo::new());

        engine.trace_return(second, "b");
        engine.trace_return(first, "a");

        let returns: Vec<_> = engine.history().into_iter().map(|e| e.return_value).collect();
        assert_eq!(returns, vec![Some(json!("a")), Some(json!("b"))]);
    }

    #[test]
    fn second_completion_is_ignored() {
        let engine = TraceEngine::new(10);
        let id = engine.trace("once", TraceInfo::new());
        engine.trace_return(id, 1);
        engine.trace_error(id, "late");
        let history = engine.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].error, None);
    }

    #[test]
    fn history_drops_oldest() {
        let engine = TraceEngine::new(2);
        for name in ["a", "b", "c"] {
            let id = engine.trace(name, TraceInfo::new());
            engine.trace_return(id, ());
        }
        let names: Vec<_> = engine.history().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn wrappers_record_errors_and_pass_them_through() {
        let engine = TraceEngine::new(10);
        let ok: std::result::Result<i32, String> = engine.trace_sync("double", TraceInfo::new(), || Ok(4));
        assert_eq!(ok, Ok(4));

        let err = engine
            .trace_async("login", TraceInfo::new(), || async { Err::<(), _>("bad password") })
            .await;
        assert_eq!(err, Err("bad password"));

        let history = engine.history();
        assert_eq!(history[0].name, "login");
        assert_eq!(history[0].error.as_deref(), Some("bad password"));
        assert_eq!(history[1].return_value, Some(json!(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn query_filters() {
        let engine = TraceEngine::new(10);
        let fast = engine.trace("fetchUser", TraceInfo::new().file("api/user.rs"));
        engine.trace_return(fast, ());
        let slow = engine.trace("fetchCart", TraceInfo::new().file("api/cart.rs"));
        tokio::time::advance(Duration::from_millis(50)).await;
        engine.trace_return(slow, ());
        let _open = engine.trace("render", TraceInfo::new());

        let by_name = engine.query(&GetTraces { name: Some("^fetch".into()), ..Default::default() }).unwrap();
        assert_eq!(by_name.len(), 2);

        let by_file = engine.query(&GetTraces { file: Some("cart".into()), ..Default::default() }).unwrap();
        assert_eq!(by_file.len(), 1);

        let slow_only = engine.query(&GetTraces { min_duration: Some(40.0), ..Default::default() }).unwrap();
        assert_eq!(slow_only.len(), 1);
        assert_eq!(slow_only[0].name, "fetchCart");

        let limited = engine.query(&GetTraces { limit: Some(1), ..Default::default() }).unwrap();
        assert_eq!(limited.len(), 1);

        let open = engine.query(&GetTraces { in_progress: true, ..Default::default() }).unwrap();
        assert_eq!(open.len(), 1);
        assert!(!open[0].completed);

        assert!(engine.query(&GetTraces { name: Some("(".into()), ..Default::default() }).is_err());

        assert_eq!(engine.clear(), 2);
        assert_eq!(engine.active().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_async_call_is_finalized_as_cancelled() {
        let engine = TraceEngine::new(10);
        let slow = engine.trace_async("upload", TraceInfo::default(), || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, String>(1)
        });
        assert!(tokio::time::timeout(Duration::from_secs(1), slow).await.is_err());

        assert!(engine.active().is_empty());
        let history = engine.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].name, "upload");
        assert_eq!(history[0].error.as_deref(), Some("cancelled"));
        assert!(history[0].completed);
    }
}
