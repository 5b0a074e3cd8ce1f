//! # Coordinator Server
//!
//! Accepts client links, waits for each one's handshake, registers the
//! device, and pumps responses into the [`Router`].
//!
//! A link lives in three phases:
//!
//! 1. **Handshake**: the first frame must be a handshake, within
//!    `handshake_timeout`, or the socket is closed.
//! 2. **Serving**: responses settle pending requests; client-originated
//!    requests get `pong` for `ping` and `unknown_method` otherwise.
//! 3. **Teardown**: the device entry is removed (if this link still owns it)
//!    and every request in flight on the link is rejected.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use tether_proto::ErrorBody;
use tether_proto::Frame;
use tether_proto::Handshake;
use tether_proto::Request;
use tether_proto::Response;
use tether_proto::Transport;
use tether_proto::ws;
use tokio::net::TcpListener;

use crate::config::CoordinatorConfig;
use crate::device::DeviceRegistry;
use crate::device::LinkId;
use crate::router::Router;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: std::io::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

pub struct Coordinator {
    config: CoordinatorConfig,
    devices: Arc<DeviceRegistry>,
    router: Arc<Router>,
    next_link: AtomicU64,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        let devices = Arc::new(DeviceRegistry::new());
        let router = Arc::new(Router::new(devices.clone(), config.request_timeout));
        Self {
            config,
            devices,
            router,
            next_link: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.devices
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Binds the configured address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.bind;
        let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind { addr, source })?;
        tracing::info!(addr = %addr, "coordinator listening");
        Ok(listener)
    }

    /// Accepts connections forever, serving each on its own task.
    ///
    /// Accept failures (descriptor exhaustion, aborted handshakes) are
    /// logged and retried; only binding is fatal.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        let listener = &listener;
        accept_loop(
            move || listener.accept(),
            |stream, peer| {
                let coordinator = self.clone();
                tokio::spawn(async move {
                    match ws::accept(stream).await {
                        Ok(transport) => coordinator.serve_link(Arc::new(transport)).await,
                        Err(e) => tracing::warn!(peer = %peer, error = %e, "websocket upgrade failed"),
                    }
                });
            },
        )
        .await
    }

    /// Runs one link from handshake to teardown.
    pub async fn serve_link(&self, transport: Arc<dyn Transport>) {
        let link = LinkId(self.next_link.fetch_add(1, Ordering::Relaxed));

        let Some(handshake) = self.await_handshake(link, transport.as_ref()).await else {
            transport.close().await;
            return;
        };
        let device_id = handshake.device_id.clone();

        if let Some(previous) = self.devices.register(handshake, link, transport.clone()) {
            tracing::info!(device = %device_id, old = %previous.link, new = %link, "device superseded");
            self.router.reject_link(previous.link);
            previous.transport.close().await;
        }

        let reason = loop {
            let text = match transport.recv().await {
                Ok(Some(text)) => text,
                Ok(None) => break "closed by peer".to_string(),
                Err(e) => break e.to_string(),
            };
            if let Some(device) = self.devices.get(&device_id).filter(|d| d.link == link) {
                device.touch();
            }

            match Frame::decode(&text) {
                Ok(Frame::Response(response)) => self.router.handle_response(link, response),
                Ok(Frame::Request(request)) => self.answer(transport.as_ref(), request).await,
                Ok(Frame::Handshake(_)) => {
                    tracing::warn!(device = %device_id, link = %link, "ignoring repeated handshake");
                }
                Err(e) => tracing::warn!(device = %device_id, link = %link, error = %e, "dropping malformed frame"),
            }
        };

        tracing::debug!(device = %device_id, link = %link, reason = %reason, "link closed");
        self.devices.remove(&device_id, link);
        self.router.reject_link(link);
    }

    async fn await_handshake(&self, link: LinkId, transport: &dyn Transport) -> Option<Handshake> {
        let received = tokio::time::timeout(self.config.handshake_timeout, transport.recv()).await;
        let text = match received {
            Ok(Ok(Some(text))) => text,
            Ok(Ok(None)) => {
                tracing::debug!(link = %link, "link closed before handshake");
                return None;
            }
            Ok(Err(e)) => {
                tracing::debug!(link = %link, error = %e, "link failed before handshake");
                return None;
            }
            Err(_) => {
                tracing::warn!(link = %link, "handshake timed out");
                return None;
            }
        };

        match Frame::decode(&text) {
            Ok(Frame::Handshake(handshake)) => Some(handshake),
            Ok(other) => {
                tracing::warn!(link = %link, kind = other.kind(), "first frame was not a handshake");
                None
            }
            Err(e) => {
                tracing::warn!(link = %link, error = %e, "malformed handshake");
                None
            }
        }
    }

    async fn answer(&self, transport: &dyn Transport, request: Request) {
        let response = match request.method.as_str() {
            "ping" => Response::ok(request.id, json!("pong")),
            other => Response::err(request.id, ErrorBody::unknown_method(other)),
        };
        match Frame::from(response).encode() {
            Ok(text) => {
                if let Err(e) = transport.send(&text).await {
                    tracing::debug!(error = %e, "reply to client request not delivered");
                }
            }
            Err(e) => tracing::warn!(error = %e, "reply to client request not encodable"),
        }
    }
}

async fn accept_loop<S, Fut>(mut accept: impl FnMut() -> Fut, mut on_stream: impl FnMut(S, SocketAddr))
where
    Fut: Future<Output = std::io::Result<(S, SocketAddr)>>,
{
    loop {
        match accept().await {
            Ok((stream, peer)) => on_stream(stream, peer),
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}
