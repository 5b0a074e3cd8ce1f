//! # Bridge
//!
//! One explicit instance per process (or per test) owning every registry and
//! the coordinator link. Nothing here is global, so several bridges can run
//! side by side.

use std::sync::Arc;

use crate::action::ActionRegistry;
use crate::config::ClientConfig;
use crate::connection;
use crate::connection::Connection;
use crate::connection::ConnectionState;
use crate::connection::Connector;
use crate::connection::WsConnector;
use crate::context::BridgeContext;
use crate::dispatcher::Dispatcher;
use crate::flags::FeatureFlags;
use crate::navigation::NavigationTracker;
use crate::network::NetworkMonitor;
use crate::providers::StorageProvider;
use crate::providers::UiProvider;
use crate::state::StateRegistry;
use crate::trace::TraceEngine;
use crate::ui::ComponentRegistry;

pub struct BridgeBuilder {
    config: ClientConfig,
    ui_provider: Option<Arc<dyn UiProvider>>,
    storage_provider: Option<Arc<dyn StorageProvider>>,
    connector: Option<Arc<dyn Connector>>,
}

impl BridgeBuilder {
    pub fn ui_provider(mut self, provider: impl UiProvider) -> Self {
        self.ui_provider = Some(Arc::new(provider));
        self
    }

    pub fn storage_provider(mut self, provider: impl StorageProvider) -> Self {
        self.storage_provider = Some(Arc::new(provider));
        self
    }

    /// Replaces the WebSocket connector, e.g. with an in-memory link.
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    pub fn build(self) -> Bridge {
        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WsConnector::new(self.config.url.clone())),
        };
        let reconnect_delay = self.config.reconnect_delay;
        let auto_reconnect = self.config.auto_reconnect;

        let ctx = Arc::new(BridgeContext::new(self.config, self.ui_provider, self.storage_provider));
        let dispatcher = Dispatcher::new(ctx.clone());
        let connection = Connection::new(connector, dispatcher.clone(), reconnect_delay, auto_reconnect);

        Bridge { ctx, dispatcher, connection }
    }
}

pub struct Bridge {
    ctx: Arc<BridgeContext>,
    dispatcher: Dispatcher,
    connection: Connection,
}

impl Bridge {
    pub fn builder(config: ClientConfig) -> BridgeBuilder {
        BridgeBuilder {
            config,
            ui_provider: None,
            storage_provider: None,
            connector: None,
        }
    }

    /// Opens the coordinator link. A failed first attempt still leaves
    /// auto-reconnect running.
    pub async fn start(&self) -> connection::Result<()> {
        tracing::info!(
            device_id = %self.ctx.config.device_id,
            url = %self.ctx.config.url,
            "starting bridge"
        );
        self.connection.connect().await
    }

    /// Closes the link and cancels pending reconnects.
    pub async fn shutdown(&self) {
        self.connection.disconnect().await;
    }

    pub async fn reconnect(&self) -> connection::Result<()> {
        self.connection.reconnect_now().await
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.connection.reconnect_attempts()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.ctx.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn state(&self) -> &StateRegistry {
        &self.ctx.state
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.ctx.actions
    }

    pub fn components(&self) -> &ComponentRegistry {
        &self.ctx.components
    }

    pub fn navigation(&self) -> &NavigationTracker {
        &self.ctx.navigation
    }

    pub fn network(&self) -> &Arc<NetworkMonitor> {
        &self.ctx.network
    }

    pub fn traces(&self) -> &TraceEngine {
        &self.ctx.traces
    }

    pub fn flags(&self) -> &FeatureFlags {
        &self.ctx.flags
    }
}
