//! Detector error types.

use thiserror::Error;

/// Errors surfaced by the detector engine.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] vdlink_protocol::ProtocolError),

    #[error("connection closed by controller")]
    ConnectionClosed,

    #[error("heartbeat timeout")]
    HeartbeatTimeout,
}
