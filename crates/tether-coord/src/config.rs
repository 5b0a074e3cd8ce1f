//! Coordinator configuration.

use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::time::Duration;

use tether_proto::ws::DEFAULT_PORT;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Listen address. Loopback only by default; there is no authentication.
    pub bind: SocketAddr,
    /// How long a routed request waits for its response.
    pub request_timeout: Duration,
    /// How long a new link may take to send its handshake.
    pub handshake_timeout: Duration,
}

impl CoordinatorConfig {
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}
