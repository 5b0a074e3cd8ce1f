//! # Network Interception
//!
//! [`NetworkMonitor`] wraps the host's outbound HTTP path. Every call is
//! recorded before dispatch; if a registered mock matches the URL the call is
//! answered from the mock and the real client is never touched.
//!
//! ## Invariants
//! - **Record First**: a request is logged before any mock delay or real I/O,
//!   so in-flight calls are visible to `list_network_requests`.
//! - **First Match Wins**: mocks are checked in registration order.
//! - **Bounded Log**: the capture log holds at most `capacity` records, most
//!   recent first.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tether_proto::ErrorBody;
use tether_proto::ErrorCode;
use tether_proto::command::ListNetworkRequests;
use tether_proto::command::MockNetworkRequest;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Invalid URL pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl From<Error> for ErrorBody {
    fn from(e: Error) -> Self {
        ErrorBody::new(ErrorCode::InvalidParams, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
//  HTTP SEAM
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// A failure below HTTP: DNS, refused connection, reset.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HttpError(pub String);

/// The host's outbound HTTP path.
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync + 'static {
    async fn execute(&self, request: HttpRequest) -> std::result::Result<HttpResponse, HttpError>;
}

// ============================================================================
//  RECORDS AND MOCKS
// ============================================================================

/// One captured outbound call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRecord {
    pub id: String,
    pub url: String,
    pub method: String,
    /// Milliseconds since the Unix epoch, taken before dispatch.
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    /// `None` while in flight; `0` on transport failure.
    pub status: Option<u16>,
    /// Milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mock_id: Option<String>,
}

#[derive(Debug)]
struct NetworkMock {
    id: String,
    pattern: Regex,
    spec: MockNetworkRequest,
}

/// Listing entry for `list_network_mocks`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MockInfo {
    pub id: String,
    #[serde(flatten)]
    pub spec: MockNetworkRequest,
}

impl NetworkMock {
    fn respond(&self) -> HttpResponse {
        let mut headers = self.spec.headers.clone();
        let body = match &self.spec.body {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(v @ (Value::Object(_) | Value::Array(_))) => {
                if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                    headers.insert("content-type".into(), "application/json".into());
                }
                v.to_string()
            }
            Some(other) => other.to_string(),
        };
        HttpResponse { status: self.spec.status_code, headers, body }
    }
}

// ============================================================================
//  MONITOR
// ============================================================================

pub struct NetworkMonitor {
    log: Mutex<VecDeque<NetworkRecord>>,
    mocks: Mutex<Vec<Arc<NetworkMock>>>,
    capacity: usize,
    next_request: AtomicU64,
    next_mock: AtomicU64,
}

impl NetworkMonitor {
    pub fn new(capacity: usize) -> Self {
        Self {
            log: Mutex::new(VecDeque::new()),
            mocks: Mutex::new(Vec::new()),
            capacity,
            next_request: AtomicU64::new(1),
            next_mock: AtomicU64::new(1),
        }
    }

    /// Wraps `inner` so every call through the result is captured and
    /// subject to mocking.
    pub fn intercept(self: &Arc<Self>, inner: Arc<dyn HttpClient>) -> InterceptingClient {
        InterceptingClient { inner, monitor: self.clone() }
    }

    /// Registers a mock and returns its id.
    pub fn add_mock(&self, spec: MockNetworkRequest) -> Result<String> {
        let pattern = Regex::new(&spec.url_pattern).map_err(|e| Error::InvalidPattern {
            pattern: spec.url_pattern.clone(),
            reason: e.to_string(),
        })?;
        let id = format!("mock-{}", self.next_mock.fetch_add(1, Ordering::Relaxed));
        tracing::info!(mock_id = %id, pattern = %spec.url_pattern, status = spec.status_code, "network mock added");
        self.mocks().push(Arc::new(NetworkMock { id: id.clone(), pattern, spec }));
        Ok(id)
    }

    pub fn remove_mock(&self, id: &str) -> bool {
        let mut mocks = self.mocks();
        let before = mocks.len();
        mocks.retain(|m| m.id != id);
        before != mocks.len()
    }

    /// Removes every mock, returning how many there were.
    pub fn clear_mocks(&self) -> usize {
        std::mem::take(&mut *self.mocks()).len()
    }

    pub fn list_mocks(&self) -> Vec<MockInfo> {
        self.mocks()
            .iter()
            .map(|m| MockInfo { id: m.id.clone(), spec: m.spec.clone() })
            .collect()
    }

    /// Captured records matching `filter`, most recent first.
    ///
    /// `url` matches as a substring; `method` ignores ASCII case.
    pub fn requests(&self, filter: &ListNetworkRequests) -> Vec<NetworkRecord> {
        let log = self.log();
        log.iter()
            .filter(|r| filter.url.as_ref().is_none_or(|u| r.url.contains(u.as_str())))
            .filter(|r| filter.method.as_ref().is_none_or(|m| r.method.eq_ignore_ascii_case(m)))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Empties the capture log, returning how many records were dropped.
    pub fn clear_requests(&self) -> usize {
        let mut log = self.log();
        let n = log.len();
        log.clear();
        n
    }

    async fn execute(&self, inner: &dyn HttpClient, request: HttpRequest) -> std::result::Result<HttpResponse, HttpError> {
        let id = self.record(&request);
        let started = tokio::time::Instant::now();

        if let Some(mock) = self.matching_mock(&request.url) {
            if let Some(delay) = mock.spec.delay {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            let response = mock.respond();
            tracing::debug!(request_id = %id, mock_id = %mock.id, url = %request.url, "request answered by mock");
            self.finish(&id, started, |r| {
                r.status = Some(response.status);
                r.response_body = Some(response.body.clone());
                r.mock_id = Some(mock.id.clone());
            });
            return Ok(response);
        }

        match inner.execute(request).await {
            Ok(response) => {
                self.finish(&id, started, |r| {
                    r.status = Some(response.status);
                    r.response_body = Some(response.body.clone());
                });
                Ok(response)
            }
            Err(e) => {
                tracing::debug!(request_id = %id, error = %e, "request failed");
                self.finish(&id, started, |r| {
                    r.status = Some(0);
                    r.error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    fn record(&self, request: &HttpRequest) -> String {
        let id = format!("req-{}", self.next_request.fetch_add(1, Ordering::Relaxed));
        let record = NetworkRecord {
            id: id.clone(),
            url: request.url.clone(),
            method: request.method.clone(),
            timestamp: epoch_millis(),
            request_body: request.body.clone(),
            status: None,
            duration: None,
            response_body: None,
            error: None,
            mock_id: None,
        };
        let mut log = self.log();
        log.push_front(record);
        log.truncate(self.capacity);
        id
    }

    /// Updates a record in place. Records already evicted are skipped.
    fn finish(&self, id: &str, started: tokio::time::Instant, update: impl FnOnce(&mut NetworkRecord)) {
        let duration = started.elapsed().as_secs_f64() * 1000.0;
        let mut log = self.log();
        if let Some(record) = log.iter_mut().find(|r| r.id == id) {
            record.duration = Some(duration);
            update(record);
        }
    }

    fn matching_mock(&self, url: &str) -> Option<Arc<NetworkMock>> {
        self.mocks().iter().find(|m| m.pattern.is_match(url)).cloned()
    }

    fn log(&self) -> std::sync::MutexGuard<'_, VecDeque<NetworkRecord>> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mocks(&self) -> std::sync::MutexGuard<'_, Vec<Arc<NetworkMock>>> {
        self.mocks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// An [`HttpClient`] that records and mocks through a [`NetworkMonitor`].
pub struct InterceptingClient {
    inner: Arc<dyn HttpClient>,
    monitor: Arc<NetworkMonitor>,
}

#[async_trait::async_trait]
impl HttpClient for InterceptingClient {
    async fn execute(&self, request: HttpRequest) -> std::result::Result<HttpResponse, HttpError> {
        self.monitor.execute(self.inner.as_ref(), request).await
    }
}

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
