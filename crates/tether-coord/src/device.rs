//! # Device Registry
//!
//! Tracks every client that has completed a handshake, keyed by the device
//! id it announced.
//!
//! ## Invariants
//! - **One Live Link Per Id**: a second handshake with the same id replaces
//!   the first device outright (the caller closes the old link).
//! - **Owner-Only Removal**: a link can only remove the entry it registered.
//!   A superseded link that closes late leaves its replacement alone.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use dashmap::DashMap;
use serde::Serialize;
use tether_proto::Handshake;
use tether_proto::Transport;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Device not connected: {0}")]
    NotConnected(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Identifies one accepted socket, independent of the device id it carries.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// One connected client.
pub struct Device {
    pub id: String,
    pub handshake: Handshake,
    pub link: LinkId,
    pub transport: Arc<dyn Transport>,
    /// Milliseconds since the Unix epoch.
    pub connected_at: u64,
    last_seen: AtomicU64,
    order: u64,
}

impl Device {
    pub fn touch(&self) {
        self.last_seen.store(epoch_millis(), Ordering::Relaxed);
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen.load(Ordering::Relaxed)
    }
}

/// Listing entry for `list_devices`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub id: String,
    pub platform: String,
    pub app_name: String,
    pub app_version: String,
    pub capabilities: Vec<String>,
    pub connected_at: u64,
    pub last_seen: u64,
    pub primary: bool,
}

#[derive(Default)]
pub struct DeviceRegistry {
    devices: DashMap<String, Arc<Device>>,
    selected: Mutex<Option<String>>,
    next_order: AtomicU64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the device announced on `link`. Returns the device it
    /// replaced, if the id was already connected.
    pub fn register(&self, handshake: Handshake, link: LinkId, transport: Arc<dyn Transport>) -> Option<Arc<Device>> {
        let now = epoch_millis();
        let device = Arc::new(Device {
            id: handshake.device_id.clone(),
            handshake,
            link,
            transport,
            connected_at: now,
            last_seen: AtomicU64::new(now),
            order: self.next_order.fetch_add(1, Ordering::Relaxed),
        });
        tracing::info!(
            device = %device.id,
            link = %link,
            platform = %device.handshake.platform,
            app = %device.handshake.app_name,
            "device connected"
        );
        self.devices.insert(device.id.clone(), device)
    }

    /// Removes `id` only if it is still owned by `link`.
    pub fn remove(&self, id: &str, link: LinkId) -> bool {
        let removed = self.devices.remove_if(id, |_, device| device.link == link).is_some();
        if removed {
            tracing::info!(device = id, link = %link, "device disconnected");
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.get(id).map(|d| d.value().clone())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Makes `id` the primary device.
    pub fn select(&self, id: &str) -> Result<()> {
        if !self.devices.contains_key(id) {
            return Err(Error::NotConnected(id.to_string()));
        }
        *self.selected.lock().unwrap_or_else(|e| e.into_inner()) = Some(id.to_string());
        tracing::info!(device = id, "primary device selected");
        Ok(())
    }

    /// The selected device if it is still connected, else the
    /// earliest-connected live device.
    pub fn primary(&self) -> Option<Arc<Device>> {
        let selected = self.selected.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(device) = selected.as_deref().and_then(|id| self.get(id)) {
            return Some(device);
        }
        self.devices
            .iter()
            .min_by_key(|d| d.order)
            .map(|d| d.value().clone())
    }

    /// Connected devices, earliest first.
    pub fn list(&self) -> Vec<DeviceInfo> {
        let primary = self.primary().map(|d| d.id.clone());
        let mut devices: Vec<Arc<Device>> = self.devices.iter().map(|d| d.value().clone()).collect();
        devices.sort_by_key(|d| d.order);
        devices
            .into_iter()
            .map(|d| DeviceInfo {
                id: d.id.clone(),
                platform: d.handshake.platform.clone(),
                app_name: d.handshake.app_name.clone(),
                app_version: d.handshake.app_version.clone(),
                capabilities: d.handshake.capabilities.clone(),
                connected_at: d.connected_at,
                last_seen: d.last_seen(),
                primary: primary.as_deref() == Some(d.id.as_str()),
            })
            .collect()
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use tether_proto::mock_transport::DuplexChannelTransport;

    use super::*;

    fn handshake(id: &str) -> Handshake {
        Handshake {
            platform: "android".into(),
            app_name: "shop".into(),
            app_version: "1.0.0".into(),
            device_id: id.into(),
            capabilities: vec![],
        }
    }

    fn link() -> Arc<dyn Transport> {
        Arc::new(DuplexChannelTransport::pair().0)
    }

    #[test]
    fn rehandshake_replaces_and_stale_link_cannot_remove() {
        let registry = DeviceRegistry::new();
        assert!(registry.register(handshake("a"), LinkId(1), link()).is_none());
        let old = registry.register(handshake("a"), LinkId(2), link()).unwrap();
        assert_eq!(old.link, LinkId(1));
        assert_eq!(registry.len(), 1);

        assert!(!registry.remove("a", LinkId(1)));
        assert_eq!(registry.get("a").unwrap().link, LinkId(2));
        assert!(registry.remove("a", LinkId(2)));
        assert!(registry.is_empty());
    }

    #[test]
    fn primary_prefers_selection_then_earliest() {
        let registry = DeviceRegistry::new();
        assert!(registry.primary().is_none());

        registry.register(handshake("first"), LinkId(1), link());
        registry.register(handshake("second"), LinkId(2), link());
        assert_eq!(registry.primary().unwrap().id, "first");

        registry.select("second").unwrap();
        assert_eq!(registry.primary().unwrap().id, "second");
        assert!(registry.list()[1].primary);

        registry.remove("second", LinkId(2));
        assert_eq!(registry.primary().unwrap().id, "first");

        assert_eq!(registry.select("ghost"), Err(Error::NotConnected("ghost".into())));
    }
}
