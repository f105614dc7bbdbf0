//! Device identities, operation codes, object identifiers and the
//! message classifier.

use crate::frame::DataTable;
use bytes::BufMut;
use std::fmt;

/// Communication connection (handshake and heartbeat).
pub const OBJ_COMMUNICATION: u16 = 0x0101;
/// Device time.
pub const OBJ_DEVICE_TIME: u16 = 0x0201;
/// Serial link parameters.
pub const OBJ_SERIAL_PARAMS: u16 = 0x0202;
/// Ethernet link parameters.
pub const OBJ_ETHERNET_PARAMS: u16 = 0x0203;
/// Detector configuration parameters.
pub const OBJ_DETECTOR_CONFIG: u16 = 0x0204;
/// Detector work status.
pub const OBJ_DETECTOR_STATUS: u16 = 0x0205;
/// Traffic realtime information.
pub const OBJ_TRAFFIC_REALTIME: u16 = 0x0301;
/// Traffic statistics.
pub const OBJ_TRAFFIC_STATS: u16 = 0x0302;
/// Traffic history.
pub const OBJ_TRAFFIC_HISTORY: u16 = 0x0303;
/// Object id carried by error responses.
pub const OBJ_ERROR: u16 = 0x0000;

/// Operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operation {
    QueryRequest = 0x80,
    SetRequest = 0x81,
    Upload = 0x82,
    QueryResponse = 0x83,
    SetResponse = 0x84,
    UploadResponse = 0x85,
    ErrorResponse = 0x86,
}

impl TryFrom<u8> for Operation {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x80 => Ok(Operation::QueryRequest),
            0x81 => Ok(Operation::SetRequest),
            0x82 => Ok(Operation::Upload),
            0x83 => Ok(Operation::QueryResponse),
            0x84 => Ok(Operation::SetResponse),
            0x85 => Ok(Operation::UploadResponse),
            0x86 => Ok(Operation::ErrorResponse),
            other => Err(other),
        }
    }
}

/// Device type bitmask. The low eight bits each name one detector
/// technology; bit 0 marks the signal controller itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DeviceType(u16);

impl DeviceType {
    pub const SIGNAL: DeviceType = DeviceType(1 << 0);
    pub const LOOP: DeviceType = DeviceType(1 << 1);
    pub const MAGNETIC: DeviceType = DeviceType(1 << 2);
    pub const ULTRASONIC: DeviceType = DeviceType(1 << 3);
    pub const VIDEO: DeviceType = DeviceType(1 << 4);
    pub const MICROWAVE: DeviceType = DeviceType(1 << 5);
    pub const RADAR: DeviceType = DeviceType(1 << 6);
    pub const RFID: DeviceType = DeviceType(1 << 7);

    pub fn from_bits(bits: u16) -> Self {
        DeviceType(bits)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    /// Human-readable name of the device kind encoded in the low byte.
    pub fn describe(&self) -> &'static str {
        match *self {
            DeviceType::SIGNAL => "signal controller",
            DeviceType::LOOP => "inductive loop",
            DeviceType::MAGNETIC => "magnetic",
            DeviceType::ULTRASONIC => "ultrasonic",
            DeviceType::VIDEO => "video",
            DeviceType::MICROWAVE => "microwave",
            DeviceType::RADAR => "radar",
            DeviceType::RFID => "RFID",
            _ => "unknown",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Stable identifier for either endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DeviceId {
    /// Administrative division code, 24 bits effective.
    pub admin_code: u32,
    pub device_type: DeviceType,
    pub device_id: u16,
}

/// Serialized size of a device identifier.
pub const DEVICE_ID_SIZE: usize = 7;

impl DeviceId {
    /// Creates a device identifier. The administrative code is masked to
    /// its 24 effective bits.
    pub fn new(admin_code: u32, device_type: DeviceType, device_id: u16) -> Self {
        Self {
            admin_code: admin_code & 0xFF_FFFF,
            device_type,
            device_id,
        }
    }

    /// Appends the 7-byte little-endian wire form.
    pub(crate) fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_u8((self.admin_code & 0xFF) as u8);
        buf.put_u8(((self.admin_code >> 8) & 0xFF) as u8);
        buf.put_u8(((self.admin_code >> 16) & 0xFF) as u8);
        buf.put_u16_le(self.device_type.bits());
        buf.put_u16_le(self.device_id);
    }

    /// Parses the 7-byte wire form.
    pub(crate) fn read_from(bytes: &[u8]) -> Self {
        Self {
            admin_code: bytes[0] as u32 | (bytes[1] as u32) << 8 | (bytes[2] as u32) << 16,
            device_type: DeviceType::from_bits(u16::from_le_bytes([bytes[3], bytes[4]])),
            device_id: u16::from_le_bytes([bytes[5], bytes[6]]),
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "admin={:06X} type={:04X} id={:04X}",
            self.admin_code,
            self.device_type.bits(),
            self.device_id
        )
    }
}

/// Error codes carried in the single content byte of an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameErrorCode {
    FrameStart = 1,
    FrameEnd = 2,
    Crc = 3,
    LinkAddr = 4,
    ProtocolVersion = 5,
    OperationType = 6,
    ObjectId = 7,
    Content = 128,
}

impl FrameErrorCode {
    /// Maps a decode failure onto the wire error code. The reassembler
    /// only yields delimited slices, so a structural failure reports as
    /// a frame-start error; escape and truncation faults report as
    /// content errors.
    pub fn from_decode_error(err: &crate::error::ProtocolError) -> Self {
        use crate::error::ProtocolError;
        match err {
            ProtocolError::Format => FrameErrorCode::FrameStart,
            ProtocolError::Crc { .. } => FrameErrorCode::Crc,
            _ => FrameErrorCode::Content,
        }
    }
}

/// Semantic classification of a decoded data table.
///
/// Unknown `(object, operation)` pairs land in [`MessageKind::Unknown`]
/// for the handler to log and drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// SET_REQ on COMMUNICATION: the client handshake.
    ConnectRequest,
    /// SET_RESP on COMMUNICATION: the server accepting the handshake.
    ConnectAck,
    /// QUERY_REQ on COMMUNICATION issued by the server.
    HeartbeatQuery,
    /// QUERY_RESP on COMMUNICATION answered by the client.
    HeartbeatReply,
    /// UPLOAD on TRAFFIC_REALTIME; unacknowledged.
    RealtimeUpload,
    /// UPLOAD on TRAFFIC_STATS; acknowledged with UPLOAD_RESP.
    StatisticsUpload,
    StatisticsAck,
    /// UPLOAD on DETECTOR_STATUS; acknowledged with UPLOAD_RESP.
    StatusUpload,
    StatusAck,
    /// ERROR_RESP with a [`FrameErrorCode`] byte as content.
    ErrorReport { code: Option<u8> },
    Unknown { operation: u8, object_id: u16 },
}

impl MessageKind {
    /// Classifies a decoded data table by `(object_id, operation)`.
    pub fn classify(table: &DataTable) -> MessageKind {
        let unknown = MessageKind::Unknown {
            operation: table.operation,
            object_id: table.object_id,
        };
        let Ok(op) = Operation::try_from(table.operation) else {
            return unknown;
        };
        if op == Operation::ErrorResponse {
            return MessageKind::ErrorReport {
                code: table.content.first().copied(),
            };
        }
        match (table.object_id, op) {
            (OBJ_COMMUNICATION, Operation::SetRequest) => MessageKind::ConnectRequest,
            (OBJ_COMMUNICATION, Operation::SetResponse) => MessageKind::ConnectAck,
            (OBJ_COMMUNICATION, Operation::QueryRequest) => MessageKind::HeartbeatQuery,
            (OBJ_COMMUNICATION, Operation::QueryResponse) => MessageKind::HeartbeatReply,
            (OBJ_TRAFFIC_REALTIME, Operation::Upload) => MessageKind::RealtimeUpload,
            (OBJ_TRAFFIC_STATS, Operation::Upload) => MessageKind::StatisticsUpload,
            (OBJ_TRAFFIC_STATS, Operation::UploadResponse) => MessageKind::StatisticsAck,
            (OBJ_DETECTOR_STATUS, Operation::Upload) => MessageKind::StatusUpload,
            (OBJ_DETECTOR_STATUS, Operation::UploadResponse) => MessageKind::StatusAck,
            _ => unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn table(operation: Operation, object_id: u16, content: &[u8]) -> DataTable {
        DataTable::new(
            DeviceId::new(0x1AD24, DeviceType::LOOP, 100),
            DeviceId::new(0x1AD24, DeviceType::SIGNAL, 1),
            operation,
            object_id,
            Bytes::copy_from_slice(content),
        )
        .unwrap()
    }

    #[test]
    fn operation_roundtrip() {
        for byte in 0x80..=0x86u8 {
            let op = Operation::try_from(byte).unwrap();
            assert_eq!(op as u8, byte);
        }
        assert_eq!(Operation::try_from(0x7F), Err(0x7F));
        assert_eq!(Operation::try_from(0x87), Err(0x87));
    }

    #[test]
    fn admin_code_masked_to_24_bits() {
        let id = DeviceId::new(0xFF_123456, DeviceType::VIDEO, 7);
        assert_eq!(id.admin_code, 0x123456);
    }

    #[test]
    fn device_id_wire_roundtrip() {
        let id = DeviceId::new(0x1AD24, DeviceType::RADAR, 0x0102);
        let mut buf = bytes::BytesMut::new();
        id.write_to(&mut buf);
        assert_eq!(buf.len(), DEVICE_ID_SIZE);
        assert_eq!(&buf[..3], &[0x24, 0xAD, 0x01]);
        assert_eq!(DeviceId::read_from(&buf), id);
    }

    #[test]
    fn classify_session_messages() {
        let cases = [
            (Operation::SetRequest, OBJ_COMMUNICATION, MessageKind::ConnectRequest),
            (Operation::SetResponse, OBJ_COMMUNICATION, MessageKind::ConnectAck),
            (Operation::QueryRequest, OBJ_COMMUNICATION, MessageKind::HeartbeatQuery),
            (Operation::QueryResponse, OBJ_COMMUNICATION, MessageKind::HeartbeatReply),
            (Operation::Upload, OBJ_TRAFFIC_REALTIME, MessageKind::RealtimeUpload),
            (Operation::Upload, OBJ_TRAFFIC_STATS, MessageKind::StatisticsUpload),
            (Operation::Upload, OBJ_DETECTOR_STATUS, MessageKind::StatusUpload),
        ];
        for (op, object, expected) in cases {
            assert_eq!(MessageKind::classify(&table(op, object, &[])), expected);
        }
    }

    #[test]
    fn classify_error_report() {
        let t = table(Operation::ErrorResponse, OBJ_ERROR, &[3]);
        assert_eq!(
            MessageKind::classify(&t),
            MessageKind::ErrorReport { code: Some(3) }
        );
    }

    #[test]
    fn classify_unknown_object() {
        let t = table(Operation::Upload, 0x0701, &[]);
        assert_eq!(
            MessageKind::classify(&t),
            MessageKind::Unknown {
                operation: 0x82,
                object_id: 0x0701
            }
        );
    }

    #[test]
    fn classify_unknown_operation_byte() {
        let mut t = table(Operation::Upload, OBJ_TRAFFIC_REALTIME, &[]);
        t.operation = 0x42;
        assert!(matches!(
            MessageKind::classify(&t),
            MessageKind::Unknown { operation: 0x42, .. }
        ));
    }

    #[test]
    fn decode_error_code_mapping() {
        use crate::error::ProtocolError;
        assert_eq!(
            FrameErrorCode::from_decode_error(&ProtocolError::Format),
            FrameErrorCode::FrameStart
        );
        assert_eq!(
            FrameErrorCode::from_decode_error(&ProtocolError::Crc {
                received: 1,
                calculated: 2
            }),
            FrameErrorCode::Crc
        );
        assert_eq!(
            FrameErrorCode::from_decode_error(&ProtocolError::Escape),
            FrameErrorCode::Content
        );
    }

    #[test]
    fn device_type_names() {
        assert_eq!(DeviceType::SIGNAL.describe(), "signal controller");
        assert_eq!(DeviceType::LOOP.describe(), "inductive loop");
        assert_eq!(DeviceType::from_bits(0x0300).describe(), "unknown");
    }
}
