//! Stream reassembly: turning a TCP byte stream into frames.
//!
//! TCP delivers bytes, not messages. One read may carry a fragment of a
//! frame, exactly one frame, or several frames back to back with
//! trailing partial data. The [`Decoder`] buffers arrivals and yields
//! each complete delimited slice to the frame codec, resynchronizing on
//! the 0xC0 delimiter across noise and malformed frames.

use crate::error::ProtocolError;
use crate::frame::DataTable;
use crate::{ESCAPE, FRAME_DELIMITER};
use bytes::BytesMut;

/// Capacity of the per-connection receive buffer. At least twice the
/// maximum escaped frame size so a full frame always fits behind a
/// partial one.
pub const RX_CAP: usize = 4096;

/// Buffering frame extractor, one per connection.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(RX_CAP),
        }
    }

    /// Appends bytes read from the socket.
    ///
    /// If the arrival would overflow [`RX_CAP`], the buffered bytes are
    /// dropped, killing any in-progress frame, and extraction restarts
    /// from the new data. This bounds per-connection memory.
    pub fn extend(&mut self, data: &[u8]) {
        if self.buffer.len() + data.len() > RX_CAP {
            tracing::warn!(
                "Receive buffer overflow ({} buffered, {} incoming), dropping buffered bytes",
                self.buffer.len(),
                data.len()
            );
            self.buffer.clear();
        }
        if data.len() > RX_CAP {
            // Even an empty buffer cannot hold this; the head is
            // unrecoverable, resynchronization happens on a later
            // delimiter inside the tail.
            self.buffer.extend_from_slice(&data[data.len() - RX_CAP..]);
        } else {
            self.buffer.extend_from_slice(data);
        }
    }

    /// Extracts the next complete frame, if any.
    ///
    /// Returns `None` when the buffer holds no complete frame; a later
    /// [`extend`](Self::extend) may complete it. A malformed frame is
    /// returned as `Some(Err(..))` and consumed, so extraction continues
    /// with the following frame. Callers drain with
    /// `while let Some(result) = decoder.next_frame()`.
    pub fn next_frame(&mut self) -> Option<Result<DataTable, ProtocolError>> {
        // Resynchronize: everything before the first delimiter is noise.
        match self.buffer.iter().position(|&b| b == FRAME_DELIMITER) {
            None => {
                self.buffer.clear();
                return None;
            }
            Some(0) => {}
            Some(start) => {
                let _ = self.buffer.split_to(start);
            }
        }

        // The escape discipline keeps 0xC0 out of the frame interior, so
        // the next delimiter ends the frame. A delimiter right behind an
        // escape byte is treated as escape-related and skipped, matching
        // the deployed extractor.
        let end = self.buffer[1..]
            .iter()
            .zip(self.buffer.iter())
            .position(|(&b, &prev)| b == FRAME_DELIMITER && prev != ESCAPE)
            .map(|i| i + 1);

        let Some(end) = end else {
            return None;
        };

        let frame = self.buffer.split_to(end + 1);
        let result = DataTable::decode(&frame);
        if let Err(ProtocolError::Crc { .. }) = result {
            tracing::debug!("Raw frame bytes for CRC mismatch: {}", hex_dump(&frame));
        }
        Some(result)
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Discards all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Hex rendering of at most 64 bytes for diagnostics.
fn hex_dump(data: &[u8]) -> String {
    use std::fmt::Write;

    let shown = data.len().min(64);
    let mut out = String::with_capacity(shown * 3 + 24);
    for byte in &data[..shown] {
        let _ = write!(out, "{byte:02X} ");
    }
    if data.len() > shown {
        let _ = write!(out, "... ({} more bytes)", data.len() - shown);
    }
    out
}
