//! Data-table serialization and the frame codec.
//!
//! On-wire layout of the unescaped data table, all multi-byte fields
//! little-endian:
//!
//! ```text
//! +-----------+--------+----------+---------+----+--------+---------+------+
//! | link_addr | sender | receiver | version | op | object | content | CRC  |
//! |     2     |   7    |    7     |    1    | 1  |   2    |   0..n  |  2   |
//! +-----------+--------+----------+---------+----+--------+---------+------+
//! ```
//!
//! A frame is the escaped table wrapped in a pair of 0xC0 delimiters.
//! The CRC covers the unescaped header and content but not the
//! delimiters nor itself.

use crate::crc::crc16;
use crate::error::ProtocolError;
use crate::escape::{escape_into, unescape_into};
use crate::message::{DeviceId, Operation};
use crate::{FRAME_DELIMITER, MAX_CONTENT_SIZE, MAX_FRAME_SIZE, PROTOCOL_VERSION};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the fixed data-table header (2+7+7+1+1+2).
pub const HEADER_SIZE: usize = 20;

/// Size of the CRC trailer.
pub const CRC_SIZE: usize = 2;

/// Minimum unescaped frame size: fixed header plus CRC.
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + CRC_SIZE;

/// The logical message carried by one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataTable {
    /// Link address, reserved as 0x0000.
    pub link_addr: u16,
    pub sender: DeviceId,
    pub receiver: DeviceId,
    /// Protocol version byte, 0x10 for this revision.
    pub protocol_version: u8,
    /// Raw operation byte; see [`Operation`] for the known values.
    pub operation: u8,
    pub object_id: u16,
    pub content: Bytes,
}

impl DataTable {
    /// Creates a data table with the reserved link address and current
    /// protocol version. Fails if `content` exceeds the 1500-byte limit.
    pub fn new(
        sender: DeviceId,
        receiver: DeviceId,
        operation: Operation,
        object_id: u16,
        content: Bytes,
    ) -> Result<Self, ProtocolError> {
        if content.len() > MAX_CONTENT_SIZE {
            return Err(ProtocolError::InvalidParam("content exceeds 1500 bytes"));
        }
        Ok(Self {
            link_addr: 0x0000,
            sender,
            receiver,
            protocol_version: PROTOCOL_VERSION,
            operation: operation as u8,
            object_id,
            content,
        })
    }

    /// Encodes the table into a complete wire frame.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        if self.content.len() > MAX_CONTENT_SIZE {
            return Err(ProtocolError::InvalidParam("content exceeds 1500 bytes"));
        }

        let mut table = BytesMut::with_capacity(MIN_FRAME_SIZE + self.content.len());
        table.put_u16_le(self.link_addr);
        self.sender.write_to(&mut table);
        self.receiver.write_to(&mut table);
        table.put_u8(self.protocol_version);
        table.put_u8(self.operation);
        table.put_u16_le(self.object_id);
        table.put_slice(&self.content);

        let crc = crc16(&table);
        table.put_u16_le(crc);

        // Worst case every byte escapes to two; the content cap keeps
        // this within bounds.
        let mut escaped = [0u8; 2 * MAX_FRAME_SIZE];
        let escaped_len = escape_into(&table, &mut escaped)?;

        let mut frame = BytesMut::with_capacity(escaped_len + 2);
        frame.put_u8(FRAME_DELIMITER);
        frame.put_slice(&escaped[..escaped_len]);
        frame.put_u8(FRAME_DELIMITER);
        Ok(frame)
    }

    /// Decodes one delimited frame into a data table.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() < 2
            || frame[0] != FRAME_DELIMITER
            || frame[frame.len() - 1] != FRAME_DELIMITER
        {
            return Err(ProtocolError::Format);
        }

        let mut unescaped = [0u8; MAX_FRAME_SIZE];
        let len = unescape_into(&frame[1..frame.len() - 1], &mut unescaped).map_err(|err| {
            match err {
                ProtocolError::BufferSmall { .. } => ProtocolError::FrameTooLarge {
                    size: frame.len(),
                    max: MAX_FRAME_SIZE,
                },
                other => other,
            }
        })?;

        if len < MIN_FRAME_SIZE {
            return Err(ProtocolError::Incomplete {
                len,
                min: MIN_FRAME_SIZE,
            });
        }
        if len - MIN_FRAME_SIZE > MAX_CONTENT_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: MIN_FRAME_SIZE + MAX_CONTENT_SIZE,
            });
        }

        let (body, crc_bytes) = unescaped[..len].split_at(len - CRC_SIZE);
        let received = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
        let calculated = crc16(body);
        if received != calculated {
            return Err(ProtocolError::Crc {
                received,
                calculated,
            });
        }

        Ok(Self {
            link_addr: u16::from_le_bytes([body[0], body[1]]),
            sender: DeviceId::read_from(&body[2..9]),
            receiver: DeviceId::read_from(&body[9..16]),
            protocol_version: body[16],
            operation: body[17],
            object_id: u16::from_le_bytes([body[18], body[19]]),
            content: Bytes::copy_from_slice(&body[HEADER_SIZE..]),
        })
    }
}
