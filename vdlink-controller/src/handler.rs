//! Frame dispatch for the controller.

use crate::session::Session;
use bytes::Bytes;
use vdlink_protocol::message::{OBJ_COMMUNICATION, OBJ_DETECTOR_STATUS, OBJ_ERROR, OBJ_TRAFFIC_STATS};
use vdlink_protocol::{
    DataTable, DeviceId, FrameErrorCode, MessageKind, Operation, ProtocolError, PROTOCOL_VERSION,
};

/// Classifies decoded frames and produces the controller's responses.
pub struct FrameHandler {
    device: DeviceId,
}

impl FrameHandler {
    pub fn new(device: DeviceId) -> Self {
        Self { device }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Handles one decoded data table, returning the response frame to
    /// send back, if any.
    pub fn handle_frame(
        &self,
        session: &mut Session,
        table: &DataTable,
    ) -> Result<Option<DataTable>, ProtocolError> {
        let addr = session.remote_addr();

        if Operation::try_from(table.operation).is_err() {
            tracing::warn!("[{}] Unknown operation byte {:#04x}", addr, table.operation);
            return self
                .error_response(session, FrameErrorCode::OperationType)
                .map(Some);
        }
        if table.link_addr != 0x0000 {
            tracing::warn!("[{}] Nonzero link address {:#06x}", addr, table.link_addr);
            return self
                .error_response(session, FrameErrorCode::LinkAddr)
                .map(Some);
        }
        if table.protocol_version != PROTOCOL_VERSION {
            tracing::warn!(
                "[{}] Incompatible protocol version {:#04x}",
                addr,
                table.protocol_version
            );
            return self
                .error_response(session, FrameErrorCode::ProtocolVersion)
                .map(Some);
        }

        // Any well-formed communication frame proves peer liveness.
        if table.object_id == OBJ_COMMUNICATION {
            session.touch();
        }

        match MessageKind::classify(table) {
            MessageKind::ConnectRequest => {
                session.establish(table.sender);
                tracing::info!("[{}] Connection request from device {}", addr, table.sender);
                self.reply(session, Operation::SetResponse, OBJ_COMMUNICATION)
                    .map(Some)
            }
            MessageKind::HeartbeatReply => {
                tracing::debug!("[{}] Heartbeat response", addr);
                Ok(None)
            }
            MessageKind::RealtimeUpload => {
                // Realtime samples are unacknowledged.
                tracing::info!(
                    "[{}] Received realtime traffic data, {} bytes",
                    addr,
                    table.content.len()
                );
                Ok(None)
            }
            MessageKind::StatisticsUpload => {
                tracing::info!(
                    "[{}] Received statistics data, {} bytes",
                    addr,
                    table.content.len()
                );
                self.reply(session, Operation::UploadResponse, OBJ_TRAFFIC_STATS)
                    .map(Some)
            }
            MessageKind::StatusUpload => {
                tracing::info!(
                    "[{}] Received detector status, {} bytes",
                    addr,
                    table.content.len()
                );
                self.reply(session, Operation::UploadResponse, OBJ_DETECTOR_STATUS)
                    .map(Some)
            }
            MessageKind::ErrorReport { code } => {
                tracing::warn!("[{}] Peer reported frame error {:?}", addr, code);
                Ok(None)
            }
            _ => {
                tracing::warn!(
                    "[{}] Ignoring message: object {:#06x}, operation {:#04x}",
                    addr,
                    table.object_id,
                    table.operation
                );
                Ok(None)
            }
        }
    }

    /// Builds the error response for a frame that failed to decode. The
    /// session survives; only the offending frame's bytes were consumed.
    pub fn decode_failure(
        &self,
        session: &Session,
        err: &ProtocolError,
    ) -> Result<DataTable, ProtocolError> {
        self.error_response(session, FrameErrorCode::from_decode_error(err))
    }

    /// Builds the periodic heartbeat query.
    pub fn heartbeat_query(&self, session: &Session) -> Result<DataTable, ProtocolError> {
        self.reply(session, Operation::QueryRequest, OBJ_COMMUNICATION)
    }

    fn reply(
        &self,
        session: &Session,
        operation: Operation,
        object_id: u16,
    ) -> Result<DataTable, ProtocolError> {
        DataTable::new(
            self.device,
            session.peer().unwrap_or_default(),
            operation,
            object_id,
            Bytes::new(),
        )
    }

    fn error_response(
        &self,
        session: &Session,
        code: FrameErrorCode,
    ) -> Result<DataTable, ProtocolError> {
        DataTable::new(
            self.device,
            session.peer().unwrap_or_default(),
            Operation::ErrorResponse,
            OBJ_ERROR,
            Bytes::copy_from_slice(&[code as u8]),
        )
    }
}
