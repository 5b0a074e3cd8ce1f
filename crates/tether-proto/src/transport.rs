//! # Transport Abstraction
//!
//! A minimal, async interface for moving text frames across one link.
//!
//! ## Philosophy
//!
//! - **Text-Oriented**: The Transport knows nothing about envelopes or commands.
//!   It moves opaque strings. Frame parsing happens above it.
//! - **Duplex**: `send` and `recv` are independent; a pump task owns `recv`
//!   while any number of tasks call `send` concurrently.

/// Errors that occur at the link layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    /// Establishing the link failed.
    #[error("Connect failed: {0}")]
    Connect(String),
    /// Generic I/O error or internal transport failure.
    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A bidirectional text-frame link.
///
/// This trait is object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one frame.
    ///
    /// # invariants
    /// - Must not interpret the payload.
    /// - Must return `Err` once the link is gone.
    async fn send(&self, frame: &str) -> Result<()>;

    /// Receives the next frame.
    ///
    /// Returns `Ok(None)` when the peer closed the link cleanly.
    async fn recv(&self) -> Result<Option<String>>;

    /// Closes the link. Pending and future `recv` calls observe the close.
    async fn close(&self);
}
