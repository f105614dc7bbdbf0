//! The detector engine: connection lifecycle, uploads and heartbeat.

use crate::config::DetectorConfig;
use crate::error::DetectorError;
use crate::simulate::TrafficSimulator;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use vdlink_protocol::message::{
    OBJ_COMMUNICATION, OBJ_DETECTOR_STATUS, OBJ_TRAFFIC_REALTIME, OBJ_TRAFFIC_STATS,
};
use vdlink_protocol::{DataTable, Decoder, MessageKind, Operation, MAX_FRAME_SIZE};

/// Returns true when `interval` has elapsed since the last firing,
/// arming the timer. A timer that has never fired is due immediately.
fn due(last: &mut Option<Instant>, interval: Duration) -> bool {
    match last {
        Some(at) if at.elapsed() < interval => false,
        _ => {
            *last = Some(Instant::now());
            true
        }
    }
}

/// The vehicle-detector client.
///
/// Maintains a single connection to the controller: connects with
/// backoff, performs the handshake, answers heartbeat queries and
/// drives the periodic uploads. Loss of heartbeat or the socket tears
/// the session down and reconnection starts over.
pub struct Detector {
    config: DetectorConfig,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Runs the detector until shutdown.
    pub async fn run(&self) -> Result<(), DetectorError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            "Vehicle detector starting - device {}, server {}",
            self.config.device,
            self.config.server_addr
        );

        let mut simulator = TrafficSimulator::new(self.config.channels);
        let mut shutdown_rx = self.shutdown.subscribe();
        let result = self.connect_loop(&mut simulator, &mut shutdown_rx).await;

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Vehicle detector stopped");
        result
    }

    async fn connect_loop(
        &self,
        simulator: &mut TrafficSimulator,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), DetectorError> {
        loop {
            let connect = tokio::time::timeout(
                self.config.connect_timeout,
                TcpStream::connect(self.config.server_addr),
            );
            let stream = tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                result = connect => match result {
                    Ok(Ok(stream)) => Some(stream),
                    Ok(Err(e)) => {
                        tracing::debug!("Failed to connect to controller: {}", e);
                        None
                    }
                    Err(_) => {
                        tracing::debug!("Connect attempt timed out");
                        None
                    }
                },
            };

            let Some(mut stream) = stream else {
                tokio::select! {
                    _ = shutdown.recv() => return Ok(()),
                    _ = tokio::time::sleep(self.config.connect_retry) => continue,
                }
            };

            stream.set_nodelay(true).ok();
            tracing::info!("Connected to controller {}", self.config.server_addr);

            match self.run_session(&mut stream, simulator, shutdown).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!("Session ended ({}), reconnecting", e);
                    // The retry window applies to failed attempts; a
                    // session that lived past it reconnects immediately.
                }
            }
        }
    }

    /// Drives one established connection. Returns `Ok(())` only on
    /// shutdown; every other exit is an error that triggers reconnect.
    async fn run_session(
        &self,
        stream: &mut TcpStream,
        simulator: &mut TrafficSimulator,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), DetectorError> {
        self.send(
            stream,
            self.message(Operation::SetRequest, OBJ_COMMUNICATION, Bytes::new())?,
        )
        .await?;
        tracing::info!("Connection request sent to controller");

        let mut decoder = Decoder::new();
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        let mut last_heartbeat = Instant::now();
        let mut last_realtime: Option<Instant> = None;
        let mut last_statistics: Option<Instant> = None;
        let mut last_status: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                result = stream.read(&mut buf) => {
                    match result {
                        Ok(0) => return Err(DetectorError::ConnectionClosed),
                        Ok(n) => {
                            decoder.extend(&buf[..n]);
                            while let Some(frame) = decoder.next_frame() {
                                match frame {
                                    Ok(table) => {
                                        self.handle_frame(stream, &table, &mut last_heartbeat)
                                            .await?
                                    }
                                    Err(e) => tracing::warn!(
                                        "Failed to decode frame from controller: {}",
                                        e
                                    ),
                                }
                            }
                        }
                        Err(e) => return Err(DetectorError::Io(e)),
                    }
                }
                _ = tick.tick() => {
                    if last_heartbeat.elapsed() > self.config.heartbeat_timeout {
                        return Err(DetectorError::HeartbeatTimeout);
                    }

                    simulator.update();

                    if due(&mut last_realtime, self.config.realtime_interval) {
                        let upload = self.message(
                            Operation::Upload,
                            OBJ_TRAFFIC_REALTIME,
                            simulator.realtime_payload(),
                        )?;
                        // Realtime samples are fire-and-forget; a failed
                        // send drops the sample, not the session.
                        if let Err(e) = self.send(stream, upload).await {
                            tracing::error!("Failed to send realtime data: {}", e);
                        }
                    }

                    if due(&mut last_statistics, self.config.statistics_interval) {
                        let upload = self.message(
                            Operation::Upload,
                            OBJ_TRAFFIC_STATS,
                            simulator.statistics_payload(self.config.statistics_interval),
                        )?;
                        if let Err(e) = self.send(stream, upload).await {
                            tracing::error!("Failed to send statistics data: {}", e);
                        }
                    }

                    if let Some(interval) = self.config.status_interval {
                        if due(&mut last_status, interval) {
                            self.send_status(stream, simulator).await?;
                        }
                    }
                }
            }
        }
    }

    /// Uploads the current work status. Also callable by embedding
    /// applications that schedule status reports themselves.
    pub async fn send_status(
        &self,
        stream: &mut TcpStream,
        simulator: &TrafficSimulator,
    ) -> Result<(), DetectorError> {
        let upload = self.message(
            Operation::Upload,
            OBJ_DETECTOR_STATUS,
            simulator.status_payload(),
        )?;
        self.send(stream, upload).await
    }

    async fn handle_frame(
        &self,
        stream: &mut TcpStream,
        table: &DataTable,
        last_heartbeat: &mut Instant,
    ) -> Result<(), DetectorError> {
        // Any well-formed communication frame proves controller liveness.
        if table.object_id == OBJ_COMMUNICATION {
            *last_heartbeat = Instant::now();
        }

        match MessageKind::classify(table) {
            MessageKind::ConnectAck => {
                tracing::info!("Connection request accepted by controller");
            }
            MessageKind::HeartbeatQuery => {
                tracing::debug!("Received heartbeat query from controller");
                self.send(
                    stream,
                    self.message(Operation::QueryResponse, OBJ_COMMUNICATION, Bytes::new())?,
                )
                .await?;
            }
            MessageKind::StatisticsAck => {
                tracing::debug!("Statistics data upload acknowledged");
            }
            MessageKind::StatusAck => {
                tracing::debug!("Device status upload acknowledged");
            }
            MessageKind::ErrorReport { code } => {
                tracing::warn!("Controller reported frame error {:?}", code);
            }
            _ => {
                tracing::debug!("Received message with object ID {:#06x}", table.object_id);
            }
        }
        Ok(())
    }

    fn message(
        &self,
        operation: Operation,
        object_id: u16,
        content: Bytes,
    ) -> Result<DataTable, DetectorError> {
        DataTable::new(
            self.config.device,
            self.config.controller,
            operation,
            object_id,
            content,
        )
        .map_err(Into::into)
    }

    async fn send(&self, stream: &mut TcpStream, table: DataTable) -> Result<(), DetectorError> {
        let frame = table.encode()?;
        stream.write_all(&frame).await?;
        tracing::debug!(
            "Sent frame: op={:#04x}, obj={:#06x}, len={}",
            table.operation,
            table.object_id,
            frame.len()
        );
        Ok(())
    }

    /// Requests shutdown; `run` returns at the next loop iteration.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use vdlink_protocol::{DeviceId, DeviceType};

    fn detector_id() -> DeviceId {
        DeviceId::new(0x1AD24, DeviceType::LOOP, 100)
    }

    fn fast_config(addr: SocketAddr) -> DetectorConfig {
        DetectorConfig::new(addr, detector_id())
            .with_connect_retry(Duration::from_millis(100))
            .with_connect_timeout(Duration::from_millis(500))
            .with_heartbeat_timeout(Duration::from_secs(5))
            .with_channels(2)
    }

    fn controller_reply(operation: Operation, object_id: u16) -> Vec<u8> {
        DataTable::new(
            DeviceId::new(0x1AD24, DeviceType::SIGNAL, 1),
            detector_id(),
            operation,
            object_id,
            Bytes::new(),
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
                assert_ne!(n, 0, "detector closed the connection unexpectedly");
                decoder.extend(&buf[..n]);
            }
        })
        .await
        .expect("timed out waiting for a frame")
    }

    async fn wait_for(
        stream: &mut TcpStream,
        decoder: &mut Decoder,
        kind: MessageKind,
    ) -> DataTable {
        loop {
            let frame = read_frame(stream, decoder).await;
            if MessageKind::classify(&frame) == kind {
                return frame;
            }
        }
    }

    #[tokio::test]
    async fn handshake_uploads_and_heartbeat_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let detector = Arc::new(Detector::new(fast_config(addr)));
        let runner = detector.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut decoder = Decoder::new();

        // Handshake arrives first.
        let request = wait_for(&mut stream, &mut decoder, MessageKind::ConnectRequest).await;
        assert_eq!(request.sender, detector_id());
        stream
            .write_all(&controller_reply(Operation::SetResponse, OBJ_COMMUNICATION))
            .await
            .unwrap();

        // Realtime and statistics uploads follow on their timers.
        let realtime = wait_for(&mut stream, &mut decoder, MessageKind::RealtimeUpload).await;
        assert_eq!(realtime.content.len(), 7 + 2 * 19);
        let stats = wait_for(&mut stream, &mut decoder, MessageKind::StatisticsUpload).await;
        assert_eq!(stats.content.len(), 13 + 2 * 20);

        // A heartbeat query is answered promptly.
        stream
            .write_all(&controller_reply(Operation::QueryRequest, OBJ_COMMUNICATION))
            .await
            .unwrap();
        let reply = wait_for(&mut stream, &mut decoder, MessageKind::HeartbeatReply).await;
        assert_eq!(reply.object_id, OBJ_COMMUNICATION);

        detector.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn status_uploads_when_configured() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = fast_config(addr).with_status_interval(Duration::from_millis(100));
        let detector = Arc::new(Detector::new(config));
        let runner = detector.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut decoder = Decoder::new();

        let status = wait_for(&mut stream, &mut decoder, MessageKind::StatusUpload).await;
        assert_eq!(status.content.len(), 7 + 2 * 4);

        detector.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn reconnects_after_losing_the_controller() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let detector = Arc::new(Detector::new(fast_config(addr)));
        let runner = detector.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        // First session: accept the handshake, then hang up.
        {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut decoder = Decoder::new();
            let _ = wait_for(&mut stream, &mut decoder, MessageKind::ConnectRequest).await;
        }

        // The detector must come back with a fresh handshake.
        let (mut stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("detector did not reconnect")
            .unwrap();
        let mut decoder = Decoder::new();
        let request = wait_for(&mut stream, &mut decoder, MessageKind::ConnectRequest).await;
        assert_eq!(request.sender, detector_id());

        detector.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn keeps_retrying_until_the_controller_appears() {
        // Reserve an address, then close the listener so the first
        // attempts fail.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let detector = Arc::new(Detector::new(fast_config(addr)));
        let runner = detector.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        // Give the detector a failed attempt or two, then start
        // listening.
        tokio::time::sleep(Duration::from_millis(250)).await;
        let listener = TcpListener::bind(addr).await.unwrap();

        let (mut stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("detector never connected")
            .unwrap();
        let mut decoder = Decoder::new();
        let _ = wait_for(&mut stream, &mut decoder, MessageKind::ConnectRequest).await;

        detector.shutdown();
        handle.await.unwrap().unwrap();
    }
}
