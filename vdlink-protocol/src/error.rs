//! Protocol error types.

use thiserror::Error;

/// Errors produced by the codecs and the stream reassembler.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid argument: {0}")]
    InvalidParam(&'static str),

    #[error("output buffer too small: need {needed} bytes, have {capacity}")]
    BufferSmall { needed: usize, capacity: usize },

    #[error("frame is not delimited by 0xC0 at both ends")]
    Format,

    #[error("illegal escape sequence in frame")]
    Escape,

    #[error("frame too short: {len} unescaped bytes (minimum {min})")]
    Incomplete { len: usize, min: usize },

    #[error("CRC mismatch: received {received:#06x}, calculated {calculated:#06x}")]
    Crc { received: u16, calculated: u16 },

    #[error("frame too large: {size} unescaped bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
}
