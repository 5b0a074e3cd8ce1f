//! # Command Router
//!
//! Sends requests to connected devices and correlates their responses.
//!
//! Each outbound request gets a fresh id and a pending entry holding a oneshot
//! sender. The pending entry is removed exactly once, by whichever happens
//! first: the matching response, the timeout, or the loss of the link the
//! request went out on.
//!
//! ## Invariants
//! - **Settle Once**: every `send_command` resolves or rejects exactly once.
//! - **Late Responses Are Inert**: a response whose id is no longer pending is
//!   logged at debug level and dropped.
//! - **Nothing Sent Without A Target**: with no device connected the call
//!   fails before any frame is written.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tether_proto::Command;
use tether_proto::ErrorBody;
use tether_proto::Frame;
use tether_proto::ProtocolError;
use tether_proto::Request;
use tether_proto::Response;
use tether_proto::transport;
use tokio::sync::oneshot;

use crate::device::DeviceRegistry;
use crate::device::LinkId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("No device connected")]
    NoDevice,
    #[error("Device not connected: {0}")]
    DeviceNotFound(String),
    #[error("Request '{method}' timed out after {}ms", .after.as_millis())]
    Timeout { method: String, after: Duration },
    #[error("Device {0} disconnected before responding")]
    Disconnected(String),
    #[error("Remote error: {0}")]
    Remote(ErrorBody),
    #[error(transparent)]
    Transport(#[from] transport::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, Error>;

struct Pending {
    device: String,
    link: LinkId,
    tx: oneshot::Sender<Result<Value>>,
}

struct PendingGuard<'a> {
    pending: &'a DashMap<u64, Pending>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

pub struct Router {
    devices: Arc<DeviceRegistry>,
    pending: DashMap<u64, Pending>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl Router {
    pub fn new(devices: Arc<DeviceRegistry>, timeout: Duration) -> Self {
        Self {
            devices,
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.devices
    }

    /// Number of requests awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Sends a typed command to `device`, or to the primary device when `None`.
    pub async fn send(&self, device: Option<&str>, command: &Command) -> Result<Value> {
        self.send_command(device, command.method(), command.params()?).await
    }

    /// Sends `method` with `params` and waits for the matching response.
    pub async fn send_command(&self, device: Option<&str>, method: &str, params: Value) -> Result<Value> {
        let target = match device {
            Some(id) => self.devices.get(id).ok_or_else(|| Error::DeviceNotFound(id.to_string()))?,
            None => self.devices.primary().ok_or(Error::NoDevice)?,
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, Pending {
            device: target.id.clone(),
            link: target.link,
            tx,
        });
        // Removes the entry on every exit, including a dropped caller.
        let _guard = PendingGuard { pending: &self.pending, id };

        let text = Frame::from(Request::new(id, method, params)).encode()?;
        tracing::debug!(id, device = %target.id, method, "sending request");
        target.transport.send(&text).await?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Disconnected(target.id.clone())),
            Err(_) => {
                tracing::warn!(id, device = %target.id, method, "request timed out");
                Err(Error::Timeout {
                    method: method.to_string(),
                    after: self.timeout,
                })
            }
        }
    }

    /// Settles the pending request `response` answers, if `link` sent it.
    pub fn handle_response(&self, link: LinkId, response: Response) {
        let Some((_, pending)) = self.pending.remove_if(&response.id, |_, p| p.link == link) else {
            tracing::debug!(id = response.id, link = %link, "discarding late or unmatched response");
            return;
        };
        let result = response.outcome.map_err(Error::Remote);
        let _ = pending.tx.send(result);
    }

    /// Rejects every request sent over `link` with `disconnected`.
    pub fn reject_link(&self, link: LinkId) -> usize {
        let ids: Vec<u64> = self
            .pending
            .iter()
            .filter(|p| p.link == link)
            .map(|p| *p.key())
            .collect();

        let mut rejected = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.tx.send(Err(Error::Disconnected(pending.device)));
                rejected += 1;
            }
        }
        if rejected > 0 {
            tracing::info!(link = %link, rejected, "rejected in-flight requests for lost link");
        }
        rejected
    }
}
