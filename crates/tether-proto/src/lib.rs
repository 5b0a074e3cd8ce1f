//! # tether-proto
//!
//! The wire half of the tether bridge: the canonical frame envelope, the
//! closed command vocabulary, and the transports that carry frames between a
//! coordinator and its instrumented clients.

pub mod command;
pub mod error;
pub mod frame;
pub mod mock_transport;
pub mod transport;
pub mod ws;

pub use command::Command;
pub use error::ErrorBody;
pub use error::ErrorCode;
pub use error::ProtocolError;
pub use frame::Frame;
pub use frame::Handshake;
pub use frame::Request;
pub use frame::Response;
pub use transport::Transport;

#[cfg(test)]
mod tests;
