//! Controller error types.

use thiserror::Error;

/// Errors surfaced by the controller server.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] vdlink_protocol::ProtocolError),
}
