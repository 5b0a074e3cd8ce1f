//! Client bridge configuration.

use std::time::Duration;

use tether_proto::ws::DEFAULT_URL;

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_NETWORK_LOG_CAPACITY: usize = 100;
const DEFAULT_TRACE_HISTORY_CAPACITY: usize = 1000;
const DEFAULT_NAVIGATION_HISTORY_CAPACITY: usize = 50;

/// Identity and tuning for one bridge instance.
///
/// Every field has a default; override with the chained `with_*` setters.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordinator endpoint.
    pub url: String,
    pub platform: String,
    pub app_name: String,
    pub app_version: String,
    pub device_id: String,
    /// Extra capability tags advertised in the handshake, on top of the
    /// command groups the bridge serves.
    pub capabilities: Vec<String>,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    pub auto_reconnect: bool,
    pub network_log_capacity: usize,
    pub trace_history_capacity: usize,
    pub navigation_history_capacity: usize,
}

impl ClientConfig {
    pub fn new(app_name: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            platform: std::env::consts::OS.to_string(),
            app_name: app_name.into(),
            app_version: app_version.into(),
            device_id: format!("{:016x}", rand::random::<u64>()),
            capabilities: Vec::new(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            auto_reconnect: true,
            network_log_capacity: DEFAULT_NETWORK_LOG_CAPACITY,
            trace_history_capacity: DEFAULT_TRACE_HISTORY_CAPACITY,
            navigation_history_capacity: DEFAULT_NAVIGATION_HISTORY_CAPACITY,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_network_log_capacity(mut self, capacity: usize) -> Self {
        self.network_log_capacity = capacity;
        self
    }

    pub fn with_trace_history_capacity(mut self, capacity: usize) -> Self {
        self.trace_history_capacity = capacity;
        self
    }

    pub fn with_navigation_history_capacity(mut self, capacity: usize) -> Self {
        self.navigation_history_capacity = capacity;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("app", "0.0.0")
    }
}
