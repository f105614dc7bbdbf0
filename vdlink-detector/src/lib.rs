//! # vdlink-detector
//!
//! The vehicle-detector end of the link.
//!
//! This crate provides:
//! - A reconnecting TCP client with connect backoff
//! - Handshake, heartbeat replies and timeout-driven reconnect
//! - Periodic realtime, statistics and work-status uploads
//! - A simulated traffic-data source for the demonstration binary

pub mod config;
pub mod detector;
pub mod error;
pub mod simulate;

pub use config::DetectorConfig;
pub use detector::Detector;
pub use error::DetectorError;
pub use simulate::TrafficSimulator;
