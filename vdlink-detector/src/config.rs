//! Detector configuration.

use std::net::SocketAddr;
use std::time::Duration;
use vdlink_protocol::{DeviceId, DeviceType};

/// Interval between connect attempts while disconnected.
pub const CONNECT_RETRY: Duration = Duration::from_secs(5);

/// Interval between realtime traffic uploads.
pub const REALTIME_INTERVAL: Duration = Duration::from_secs(2);

/// Interval between statistics uploads.
pub const STATISTICS_INTERVAL: Duration = Duration::from_secs(60);

/// The connection is abandoned once the controller has been silent on
/// the communication object for this long.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(15);

/// Configuration for the detector client.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Controller address to connect to.
    pub server_addr: SocketAddr,
    /// Identity placed in the sender field of every outbound frame.
    pub device: DeviceId,
    /// Identity of the controller, used as the receiver field.
    pub controller: DeviceId,
    pub connect_retry: Duration,
    pub connect_timeout: Duration,
    pub realtime_interval: Duration,
    pub statistics_interval: Duration,
    /// Work-status upload cadence; `None` leaves status uploads to the
    /// application calling the engine directly.
    pub status_interval: Option<Duration>,
    pub heartbeat_timeout: Duration,
    /// Number of simulated detection channels.
    pub channels: u8,
}

impl DetectorConfig {
    /// Creates a configuration for a detector talking to the controller
    /// at `server_addr`. The controller identity defaults to device 1 of
    /// the same administrative division.
    pub fn new(server_addr: SocketAddr, device: DeviceId) -> Self {
        Self {
            server_addr,
            device,
            controller: DeviceId::new(device.admin_code, DeviceType::SIGNAL, 1),
            connect_retry: CONNECT_RETRY,
            connect_timeout: Duration::from_secs(5),
            realtime_interval: REALTIME_INTERVAL,
            statistics_interval: STATISTICS_INTERVAL,
            status_interval: None,
            heartbeat_timeout: HEARTBEAT_TIMEOUT,
            channels: 4,
        }
    }

    pub fn with_controller(mut self, controller: DeviceId) -> Self {
        self.controller = controller;
        self
    }

    pub fn with_connect_retry(mut self, interval: Duration) -> Self {
        self.connect_retry = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_realtime_interval(mut self, interval: Duration) -> Self {
        self.realtime_interval = interval;
        self
    }

    pub fn with_statistics_interval(mut self, interval: Duration) -> Self {
        self.statistics_interval = interval;
        self
    }

    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = Some(interval);
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_channels(mut self, channels: u8) -> Self {
        self.channels = channels;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_controller_identity() {
        let device = DeviceId::new(0x1AD24, DeviceType::LOOP, 100);
        let config = DetectorConfig::new("127.0.0.1:40000".parse().unwrap(), device);

        assert_eq!(config.connect_retry, Duration::from_secs(5));
        assert_eq!(config.realtime_interval, Duration::from_secs(2));
        assert_eq!(config.statistics_interval, Duration::from_secs(60));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(15));
        assert!(config.status_interval.is_none());

        assert_eq!(config.controller.admin_code, 0x1AD24);
        assert_eq!(config.controller.device_type, DeviceType::SIGNAL);
        assert_eq!(config.controller.device_id, 1);
    }

    #[test]
    fn controller_identity_override() {
        let device = DeviceId::new(0x1AD24, DeviceType::RADAR, 7);
        let controller = DeviceId::new(0x2B0001, DeviceType::SIGNAL, 9);
        let config = DetectorConfig::new("10.0.0.1:40000".parse().unwrap(), device)
            .with_controller(controller);
        assert_eq!(config.controller, controller);
    }
}
