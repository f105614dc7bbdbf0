//! Per-client session state.

use std::net::SocketAddr;
use std::time::{Duration, Instant};
use vdlink_protocol::DeviceId;

/// State for one connected detector.
///
/// A session is created on accept and becomes established once the
/// peer identifies itself with a connection request. Any well-formed
/// communication-object frame from the peer refreshes the heartbeat.
#[derive(Debug)]
pub struct Session {
    remote_addr: SocketAddr,
    peer: Option<DeviceId>,
    last_heartbeat: Instant,
}

impl Session {
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            peer: None,
            last_heartbeat: Instant::now(),
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The peer identity learned from the handshake, if any.
    pub fn peer(&self) -> Option<DeviceId> {
        self.peer
    }

    pub fn is_established(&self) -> bool {
        self.peer.is_some()
    }

    /// Records the peer identity from a connection request.
    pub fn establish(&mut self, peer: DeviceId) {
        self.peer = Some(peer);
        self.touch();
    }

    /// Refreshes the heartbeat clock.
    pub fn touch(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    pub fn heartbeat_age(&self) -> Duration {
        self.last_heartbeat.elapsed()
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.heartbeat_age() > timeout
    }
}
