//! # tether-client
//!
//! The in-process half of the tether bridge. An application builds one
//! [`Bridge`], registers state getters, actions, UI components and feature
//! flags on it, and the bridge answers coordinator commands against them over
//! a self-healing link.

pub mod action;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod context;
pub mod dispatcher;
pub mod flags;
pub mod navigation;
pub mod network;
pub mod providers;
pub mod state;
pub mod trace;
pub mod ui;

pub use bridge::Bridge;
pub use bridge::BridgeBuilder;
pub use config::ClientConfig;
pub use connection::ConnectionState;
pub use connection::Connector;
pub use dispatcher::Dispatcher;
pub use trace::TraceId;
pub use trace::TraceInfo;
pub use ui::Component;
pub use ui::Rect;
