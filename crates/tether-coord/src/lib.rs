//! # tether-coord
//!
//! The external half of the tether bridge. Instrumented clients dial in over
//! WebSocket and announce themselves with a handshake; the coordinator keeps
//! a registry of live devices and routes commands to them, correlating each
//! response with its request.

pub mod config;
pub mod control;
pub mod device;
pub mod router;
pub mod server;

pub use config::CoordinatorConfig;
pub use device::DeviceRegistry;
pub use router::Router;
pub use server::Coordinator;
