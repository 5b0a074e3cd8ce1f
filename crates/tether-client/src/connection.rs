//! # Client Connection
//!
//! Keeps one link to the coordinator alive and pumps inbound requests into
//! the [`Dispatcher`].
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──ok──▶ Connected
//!       ▲                         │                  │
//!       └────── failure / close ◀─┴──────────────────┘
//!                    │
//!                    └─ auto-reconnect after a fixed delay
//! ```
//!
//! ## Invariants
//! - **One Timer**: at most one reconnect timer is pending; scheduling while
//!   one is pending is a no-op.
//!   A successful connect cancels a pending timer.
//! - **Counted Retries**: the attempt counter increments per scheduled retry
//!   and resets to zero on a successful connect.
//! - **Stale Pumps Are Inert**: each attempt takes a fresh generation number.
//!   A pump whose generation is no longer current cannot change state or
//!   schedule retries.
//! - **Explicit Disconnect Wins**: `disconnect` cancels any pending timer and
//!   no retry happens until the next `connect`.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tether_proto::Frame;
use tether_proto::ProtocolError;
use tether_proto::Transport;
use tether_proto::transport;
use tether_proto::ws;
use tokio::task::JoinHandle;

use crate::dispatcher::Dispatcher;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] transport::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Connection attempt superseded")]
    Superseded,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Produces a fresh link to the coordinator.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> transport::Result<Arc<dyn Transport>>;
}

/// Dials the coordinator over WebSocket.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> transport::Result<Arc<dyn Transport>> {
        let transport = ws::connect(&self.url).await?;
        Ok(Arc::new(transport))
    }
}

struct Shared {
    state: ConnectionState,
    transport: Option<Arc<dyn Transport>>,
    retry: Option<JoinHandle<()>>,
    /// Cleared by `disconnect`; retries only run while set.
    enabled: bool,
}

struct Inner {
    connector: Arc<dyn Connector>,
    dispatcher: Dispatcher,
    reconnect_delay: Duration,
    auto_reconnect: bool,
    shared: Mutex<Shared>,
    attempts: AtomicU32,
    generation: AtomicU64,
}

/// The client side of one coordinator link, with reconnect.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub fn new(
        connector: Arc<dyn Connector>,
        dispatcher: Dispatcher,
        reconnect_delay: Duration,
        auto_reconnect: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                dispatcher,
                reconnect_delay,
                auto_reconnect,
                shared: Mutex::new(Shared {
                    state: ConnectionState::Disconnected,
                    transport: None,
                    retry: None,
                    enabled: false,
                }),
                attempts: AtomicU32::new(0),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Connects and sends the handshake.
    ///
    /// On failure a retry is scheduled (when auto-reconnect is on) and the
    /// error is returned.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut shared = self.inner.lock();
            shared.enabled = true;
            if shared.state == ConnectionState::Connected {
                return Ok(());
            }
        }
        self.inner.attempt().await
    }

    /// Cancels any pending retry and connects immediately, replacing a live
    /// link if there is one.
    pub async fn reconnect_now(&self) -> Result<()> {
        let previous = {
            let mut shared = self.inner.lock();
            shared.enabled = true;
            if let Some(retry) = shared.retry.take() {
                retry.abort();
            }
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            shared.transport.take()
        };
        if let Some(transport) = previous {
            transport.close().await;
        }
        tracing::info!("manual reconnect");
        self.inner.attempt().await
    }

    /// Closes the link and stops reconnecting.
    pub async fn disconnect(&self) {
        let transport = {
            let mut shared = self.inner.lock();
            shared.enabled = false;
            if let Some(retry) = shared.retry.take() {
                retry.abort();
            }
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            shared.state = ConnectionState::Disconnected;
            shared.transport.take()
        };
        if let Some(transport) = transport {
            transport.close().await;
            tracing::info!("disconnected from coordinator");
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn attempt(self: &Arc<Self>) -> Result<()> {
        let generation = {
            let mut shared = self.lock();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            if shared.enabled {
                shared.state = ConnectionState::Connecting;
            }
            generation
        };

        let result = self.open(generation).await;
        if let Err(e) = &result {
            let schedule = {
                let mut shared = self.lock();
                let current = self.is_current(generation);
                if current || !shared.enabled {
                    shared.state = ConnectionState::Disconnected;
                }
                current
            };
            if schedule {
                tracing::warn!(error = %e, "connect failed");
                self.schedule_retry();
            }
        }
        result
    }

    async fn open(self: &Arc<Self>, generation: u64) -> Result<()> {
        let transport = self.connector.connect().await?;

        let handshake = self.dispatcher.context().handshake();
        let text = Frame::from(handshake).encode()?;
        if let Err(e) = transport.send(&text).await {
            transport.close().await;
            return Err(e.into());
        }

        let accepted = {
            let mut shared = self.lock();
            let accepted = shared.enabled && self.is_current(generation);
            if accepted {
                shared.state = ConnectionState::Connected;
                shared.transport = Some(transport.clone());
                if let Some(retry) = shared.retry.take() {
                    retry.abort();
                }
                self.attempts.store(0, Ordering::SeqCst);
            }
            accepted
        };
        if !accepted {
            transport.close().await;
            return Err(Error::Superseded);
        }

        tracing::info!(generation, "connected to coordinator");
        let inner = self.clone();
        tokio::spawn(async move { inner.pump(generation, transport).await });
        Ok(())
    }

    fn schedule_retry(self: &Arc<Self>) {
        if !self.auto_reconnect {
            return;
        }
        let mut shared = self.lock();
        if !shared.enabled || shared.retry.is_some() {
            return;
        }

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.reconnect_delay;
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");

        let inner = self.clone();
        shared.retry = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut shared = inner.lock();
                shared.retry = None;
                // Another attempt got there first.
                if !shared.enabled || shared.state != ConnectionState::Disconnected {
                    return;
                }
            }
            // Failure reschedules from inside `attempt`.
            let _ = inner.attempt().await;
        }));
    }

    async fn pump(self: Arc<Self>, generation: u64, transport: Arc<dyn Transport>) {
        let reason = loop {
            match transport.recv().await {
                Ok(Some(text)) => self.handle_frame(&text, &transport),
                Ok(None) => break "closed by peer".to_string(),
                Err(e) => break e.to_string(),
            }
        };
        self.link_lost(generation, &reason);
    }

    fn handle_frame(&self, text: &str, transport: &Arc<dyn Transport>) {
        let request = match Frame::decode(text) {
            Ok(Frame::Request(request)) => request,
            Ok(other) => {
                tracing::debug!(kind = other.kind(), "ignoring non-request frame");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
                return;
            }
        };

        let dispatcher = self.dispatcher.clone();
        let transport = transport.clone();
        tokio::spawn(async move {
            let id = request.id;
            let response = dispatcher.dispatch(request).await;
            match Frame::from(response).encode() {
                Ok(text) => {
                    if let Err(e) = transport.send(&text).await {
                        tracing::debug!(id, error = %e, "response not delivered");
                    }
                }
                Err(e) => tracing::warn!(id, error = %e, "response not encodable"),
            }
        });
    }

    fn link_lost(self: &Arc<Self>, generation: u64, reason: &str) {
        {
            let mut shared = self.lock();
            if !self.is_current(generation) {
                tracing::debug!(generation, "stale link closed");
                return;
            }
            shared.state = ConnectionState::Disconnected;
            shared.transport = None;
        }
        tracing::warn!(reason, "link to coordinator lost");
        self.schedule_retry();
    }
}
