//! Controller configuration.

use std::net::SocketAddr;
use std::time::Duration;
use vdlink_protocol::DeviceId;

/// Maximum number of simultaneously connected detectors.
pub const MAX_SESSIONS: usize = 64;

/// Interval between heartbeat queries to each established session.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// A session whose last heartbeat is older than this is disconnected.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(15);

/// Configuration for the controller server.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Address to listen on.
    pub bind_addr: SocketAddr,
    /// Identity placed in the sender field of every outbound frame.
    pub device: DeviceId,
    /// Session table capacity; further connections are closed on accept.
    pub max_sessions: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

impl ControllerConfig {
    pub fn new(bind_addr: SocketAddr, device: DeviceId) -> Self {
        Self {
            bind_addr,
            device,
            max_sessions: MAX_SESSIONS,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            heartbeat_timeout: HEARTBEAT_TIMEOUT,
        }
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }
}
