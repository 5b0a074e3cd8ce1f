//! Collaborator seams the host platform fills in.
//!
//! The bridge defines only the request and result shapes; how a view tree is
//! produced or where key-value data lives is up to the implementation.

use serde::Serialize;
use serde_json::Value;

/// Encoded screen capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Screenshot {
    /// Image encoding, e.g. `png`.
    pub format: String,
    /// Base64 image bytes.
    pub data: String,
    pub width: u32,
    pub height: u32,
}

#[async_trait::async_trait]
pub trait UiProvider: Send + Sync + 'static {
    /// Serialized native view hierarchy.
    async fn view_hierarchy(&self) -> Result<Value, String>;

    async fn screenshot(&self) -> Result<Screenshot, String>;
}

#[async_trait::async_trait]
pub trait StorageProvider: Send + Sync + 'static {
    async fn keys(&self) -> Result<Vec<String>, String>;

    async fn get(&self, key: &str) -> Result<Option<Value>, String>;
}
