//! TCP server for the signal controller.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::handler::FrameHandler;
use crate::session::Session;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use vdlink_protocol::{Decoder, MAX_FRAME_SIZE};

/// Server counters.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub frames_total: AtomicU64,
    pub decode_errors_total: AtomicU64,
}

/// The signal-controller TCP server.
///
/// Accepts detector connections, reassembles their byte streams into
/// frames, and drives the handshake / heartbeat / upload session per
/// connection. Each connection runs in its own task; the heartbeat
/// query fires on a per-session interval and a session whose peer has
/// been silent past the timeout is disconnected.
pub struct Server {
    config: ControllerConfig,
    handler: Arc<FrameHandler>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    pub fn new(config: ControllerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let handler = Arc::new(FrameHandler::new(config.device));
        Self {
            config,
            handler,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(&self) -> Result<(), ControllerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serves connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ControllerError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            "Signal controller listening on {} ({})",
            listener.local_addr()?,
            self.config.device
        );

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.accept_connection(stream, addr),
                        Err(e) => tracing::error!("Accept error: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Controller shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn accept_connection(&self, stream: TcpStream, addr: SocketAddr) {
        if self.stats.connections_active.load(Ordering::Relaxed)
            >= self.config.max_sessions as u64
        {
            tracing::warn!("Session table full, closing connection from {}", addr);
            // Dropping the stream closes the socket.
            return;
        }

        self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

        let handler = self.handler.clone();
        let stats = self.stats.clone();
        let config = self.config.clone();
        let mut conn_shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let result =
                Self::handle_connection(stream, addr, handler, config, &stats, &mut conn_shutdown)
                    .await;
            if let Err(e) = result {
                tracing::debug!("Connection {} error: {}", addr, e);
            }
            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            tracing::info!("Detector disconnected: {}", addr);
        });
    }

    async fn handle_connection(
        mut stream: TcpStream,
        addr: SocketAddr,
        handler: Arc<FrameHandler>,
        config: ControllerConfig,
        stats: &ServerStats,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ControllerError> {
        tracing::info!("Detector connected: {}", addr);
        stream.set_nodelay(true).ok();

        let mut session = Session::new(addr);
        let mut decoder = Decoder::new();
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let mut heartbeat = tokio::time::interval(config.heartbeat_interval);

        loop {
            tokio::select! {
                result = stream.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("[{}] Connection closed by peer", addr);
                            return Ok(());
                        }
                        Ok(n) => {
                            tracing::debug!("[{}] Received {} bytes", addr, n);
                            decoder.extend(&buf[..n]);
                            Self::drain_frames(
                                &mut stream,
                                &mut session,
                                &mut decoder,
                                &handler,
                                stats,
                            )
                            .await?;
                        }
                        Err(e) => return Err(ControllerError::Io(e)),
                    }
                }
                _ = heartbeat.tick() => {
                    if session.is_expired(config.heartbeat_timeout) {
                        tracing::warn!("[{}] Heartbeat timeout, disconnecting", addr);
                        return Ok(());
                    }
                    if session.is_established() {
                        let query = handler.heartbeat_query(&session)?;
                        stream.write_all(&query.encode()?).await?;
                        tracing::debug!("[{}] Heartbeat query sent", addr);
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Shutdown signal received", addr);
                    return Ok(());
                }
            }
        }
    }

    /// Processes every complete frame sitting in the reassembly buffer.
    ///
    /// A decode failure answers with an error response and keeps the
    /// session; only network errors tear the connection down.
    async fn drain_frames(
        stream: &mut TcpStream,
        session: &mut Session,
        decoder: &mut Decoder,
        handler: &FrameHandler,
        stats: &ServerStats,
    ) -> Result<(), ControllerError> {
        let addr = session.remote_addr();
        while let Some(result) = decoder.next_frame() {
            match result {
                Ok(table) => {
                    stats.frames_total.fetch_add(1, Ordering::Relaxed);
                    if let Some(reply) = handler.handle_frame(session, &table)? {
                        stream.write_all(&reply.encode()?).await?;
                    }
                }
                Err(err) => {
                    stats.decode_errors_total.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("[{}] Failed to decode frame: {}", addr, err);
                    let error_frame = handler.decode_failure(session, &err)?;
                    stream.write_all(&error_frame.encode()?).await?;
                }
            }
        }
        Ok(())
    }

    /// Initiates shutdown; `run` returns once the accept loop observes it.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;
    use vdlink_protocol::message::{OBJ_COMMUNICATION, OBJ_TRAFFIC_STATS};
    use vdlink_protocol::{DataTable, DeviceId, DeviceType, Operation};

    fn controller_id() -> DeviceId {
        DeviceId::new(0x1AD24, DeviceType::SIGNAL, 1)
    }

    fn detector_id() -> DeviceId {
        DeviceId::new(0x1AD24, DeviceType::LOOP, 100)
    }

    fn fast_config() -> ControllerConfig {
        ControllerConfig::new("127.0.0.1:0".parse().unwrap(), controller_id())
            .with_heartbeat_interval(Duration::from_millis(100))
            .with_heartbeat_timeout(Duration::from_millis(500))
    }

    async fn start_server(config: ControllerConfig) -> (Arc<Server>, SocketAddr) {
        let listener = TcpListener::bind(config.bind_addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(Server::new(config));
        let serve = server.clone();
        let _ = tokio::spawn(async move { serve.serve(listener).await });
        (server, addr)
    }

    fn client_frame(operation: Operation, object_id: u16, content: &[u8]) -> Vec<u8> {
        DataTable::new(
            detector_id(),
            controller_id(),
            operation,
            object_id,
            Bytes::copy_from_slice(content),
        )
        .unwrap()
        .encode()
        .unwrap()
        .to_vec()
    }

    async fn read_frame(stream: &mut TcpStream, decoder: &mut Decoder) -> DataTable {
        tokio::time::timeout(Duration::from_secs(5), async {
            let mut buf = [0u8; MAX_FRAME_SIZE];
            loop {
                if let Some(result) = decoder.next_frame() {
                    return result.unwrap();
                }
                let n = stream.read(&mut buf).await.unwrap();
                assert_ne!(n, 0, "server closed the connection unexpectedly");
                decoder.extend(&buf[..n]);
            }
        })
        .await
        .expect("timed out waiting for a frame")
    }

    #[tokio::test]
    async fn handshake_then_heartbeat_query() {
        let (server, addr) = start_server(fast_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut decoder = Decoder::new();

        stream
            .write_all(&client_frame(Operation::SetRequest, OBJ_COMMUNICATION, &[]))
            .await
            .unwrap();

        let ack = read_frame(&mut stream, &mut decoder).await;
        assert_eq!(ack.operation, Operation::SetResponse as u8);
        assert_eq!(ack.object_id, OBJ_COMMUNICATION);
        assert_eq!(ack.receiver, detector_id());

        // With no further traffic the server must query for liveness
        // within one heartbeat interval.
        let query = read_frame(&mut stream, &mut decoder).await;
        assert_eq!(query.operation, Operation::QueryRequest as u8);
        assert_eq!(query.object_id, OBJ_COMMUNICATION);

        server.shutdown();
    }

    #[tokio::test]
    async fn statistics_upload_is_acknowledged() {
        let (server, addr) = start_server(fast_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut decoder = Decoder::new();

        stream
            .write_all(&client_frame(Operation::SetRequest, OBJ_COMMUNICATION, &[]))
            .await
            .unwrap();
        let _ack = read_frame(&mut stream, &mut decoder).await;

        stream
            .write_all(&client_frame(Operation::Upload, OBJ_TRAFFIC_STATS, &[0; 13]))
            .await
            .unwrap();

        loop {
            let frame = read_frame(&mut stream, &mut decoder).await;
            if frame.operation == Operation::UploadResponse as u8 {
                assert_eq!(frame.object_id, OBJ_TRAFFIC_STATS);
                break;
            }
            // Heartbeat queries may interleave.
            assert_eq!(frame.operation, Operation::QueryRequest as u8);
        }

        server.shutdown();
    }

    #[tokio::test]
    async fn corrupted_frame_gets_error_response_and_session_survives() {
        let (server, addr) = start_server(fast_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut decoder = Decoder::new();

        let mut bad = client_frame(Operation::SetRequest, OBJ_COMMUNICATION, &[]);
        let len = bad.len();
        bad[len - 2] ^= 0xFF;
        bad[len - 3] ^= 0xFF;
        stream.write_all(&bad).await.unwrap();

        let error = read_frame(&mut stream, &mut decoder).await;
        assert_eq!(error.operation, Operation::ErrorResponse as u8);
        assert_eq!(error.content.as_ref(), &[3u8]);

        // The same connection still completes a handshake.
        stream
            .write_all(&client_frame(Operation::SetRequest, OBJ_COMMUNICATION, &[]))
            .await
            .unwrap();
        let ack = read_frame(&mut stream, &mut decoder).await;
        assert_eq!(ack.operation, Operation::SetResponse as u8);

        server.shutdown();
    }

    #[tokio::test]
    async fn silent_peer_is_disconnected() {
        let (server, addr) = start_server(fast_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut decoder = Decoder::new();

        stream
            .write_all(&client_frame(Operation::SetRequest, OBJ_COMMUNICATION, &[]))
            .await
            .unwrap();
        let _ack = read_frame(&mut stream, &mut decoder).await;

        // Never answer the heartbeat queries; the server must hang up
        // once the timeout passes.
        let disconnected = tokio::time::timeout(Duration::from_secs(5), async {
            let mut buf = [0u8; MAX_FRAME_SIZE];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        })
        .await;
        assert!(disconnected.is_ok(), "server never dropped the session");

        server.shutdown();
    }

    #[tokio::test]
    async fn session_table_capacity_is_enforced() {
        let config = fast_config().with_max_sessions(1);
        let (server, addr) = start_server(config).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut decoder = Decoder::new();
        first
            .write_all(&client_frame(Operation::SetRequest, OBJ_COMMUNICATION, &[]))
            .await
            .unwrap();
        let _ack = read_frame(&mut first, &mut decoder).await;

        // The table is full; the second connection is closed on accept.
        let mut second = TcpStream::connect(addr).await.unwrap();
        let n = tokio::time::timeout(Duration::from_secs(5), async {
            let mut buf = [0u8; 16];
            second.read(&mut buf).await.unwrap()
        })
        .await
        .expect("second connection was not closed");
        assert_eq!(n, 0);

        server.shutdown();
    }

    #[tokio::test]
    async fn shutdown_stops_the_server() {
        let (server, addr) = start_server(fast_config()).await;
        let _stream = TcpStream::connect(addr).await.unwrap();
        assert!(server.is_running());
        server.shutdown();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!server.is_running());
    }
}
