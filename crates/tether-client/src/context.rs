//! Shared state for one bridge instance.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use serde_json::json;
use tether_proto::Handshake;

use crate::action::ActionRegistry;
use crate::config::ClientConfig;
use crate::flags::FeatureFlags;
use crate::navigation::NavigationTracker;
use crate::network::NetworkMonitor;
use crate::providers::StorageProvider;
use crate::providers::UiProvider;
use crate::state::StateRegistry;
use crate::trace::TraceEngine;
use crate::ui::ComponentRegistry;

/// Everything a dispatcher needs to answer a command.
///
/// Owned behind an `Arc` by the bridge, the dispatcher, and the connection
/// pump. Every registry is internally synchronized, so handlers read and
/// write through `&self`.
pub struct BridgeContext {
    pub(crate) config: ClientConfig,
    pub(crate) state: StateRegistry,
    pub(crate) actions: ActionRegistry,
    pub(crate) components: ComponentRegistry,
    pub(crate) navigation: NavigationTracker,
    pub(crate) network: Arc<NetworkMonitor>,
    pub(crate) traces: TraceEngine,
    pub(crate) flags: FeatureFlags,
    pub(crate) ui_provider: Option<Arc<dyn UiProvider>>,
    pub(crate) storage_provider: Option<Arc<dyn StorageProvider>>,
    started: Instant,
}

impl BridgeContext {
    pub(crate) fn new(
        config: ClientConfig,
        ui_provider: Option<Arc<dyn UiProvider>>,
        storage_provider: Option<Arc<dyn StorageProvider>>,
    ) -> Self {
        Self {
            state: StateRegistry::new(),
            actions: ActionRegistry::new(),
            components: ComponentRegistry::new(),
            navigation: NavigationTracker::new(config.navigation_history_capacity),
            network: Arc::new(NetworkMonitor::new(config.network_log_capacity)),
            traces: TraceEngine::new(config.trace_history_capacity),
            flags: FeatureFlags::new(),
            ui_provider,
            storage_provider,
            config,
            started: Instant::now(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Command groups this instance serves, followed by configured extras.
    pub fn capabilities(&self) -> Vec<String> {
        let mut caps: Vec<String> = ["state", "actions", "ui", "network", "traces", "navigation", "flags"]
            .into_iter()
            .map(String::from)
            .collect();
        if self.ui_provider.is_some() {
            caps.push("screenshot".into());
        }
        if self.storage_provider.is_some() {
            caps.push("storage".into());
        }
        for extra in &self.config.capabilities {
            if !caps.contains(extra) {
                caps.push(extra.clone());
            }
        }
        caps
    }

    pub fn handshake(&self) -> Handshake {
        Handshake {
            platform: self.config.platform.clone(),
            app_name: self.config.app_name.clone(),
            app_version: self.config.app_version.clone(),
            device_id: self.config.device_id.clone(),
            capabilities: self.capabilities(),
        }
    }

    pub fn device_info(&self) -> Value {
        json!({
            "platform": self.config.platform,
            "appName": self.config.app_name,
            "appVersion": self.config.app_version,
            "deviceId": self.config.device_id,
            "capabilities": self.capabilities(),
            "uptimeMs": self.started.elapsed().as_millis() as u64,
        })
    }
}
