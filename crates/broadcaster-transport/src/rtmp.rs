//! RTMP client implementation.
//!
//! Each [`RtmpConnection`] owns one background task that holds the socket and
//! the `rml_rtmp` client session. The connection handle and any
//! [`RtmpStream`] publish handles talk to that task over channels: a small
//! control channel for publish/close requests and a bounded media queue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rml_rtmp::handshake::{Handshake, HandshakeProcessResult, PeerType};
use rml_rtmp::sessions::{
    ClientSession, ClientSessionConfig, ClientSessionEvent, ClientSessionResult,
    PublishRequestType, StreamMetadata,
};
use rml_rtmp::time::RtmpTimestamp;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use broadcaster_encoder::EncodedPacket;
use broadcaster_ipc::VideoCodecSettings;

use crate::connection::{
    status_codes, ConnectResult, Connection, ConnectionState, ConnectionStatus, PublishResult,
    Publisher, StatusLevel, StatusStream, Transport, TransportStatistics,
};
use crate::endpoint::RtmpEndpoint;
use crate::error::TransportError;
use crate::{
    TransportResult, DEFAULT_REQUEST_TIMEOUT_MS, PACKET_CHANNEL_CAPACITY, STATUS_CHANNEL_CAPACITY,
};

const READ_BUFFER_SIZE: usize = 4096;
const CONTROL_CHANNEL_CAPACITY: usize = 8;
const ENCODER_NAME: &str = "broadcaster";

/// Creates [`RtmpConnection`]s.
#[derive(Debug, Clone)]
pub struct RtmpTransport {
    request_timeout: Duration,
}

impl RtmpTransport {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Default for RtmpTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS))
    }
}

impl Transport for RtmpTransport {
    fn new_connection(&self) -> Box<dyn Connection> {
        Box::new(RtmpConnection::new(self.request_timeout))
    }
}

/// State shared between the handle, its publishers and the connection task.
#[derive(Default)]
struct Shared {
    state: RwLock<ConnectionState>,
    bytes_sent: AtomicU64,
    packets_sent: AtomicU64,
    packets_dropped: AtomicU64,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        self.state.read().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    fn statistics(&self) -> TransportStatistics {
        TransportStatistics {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
        }
    }
}

enum Control {
    Publish {
        stream_name: String,
        settings: Option<VideoCodecSettings>,
        reply: oneshot::Sender<TransportResult<()>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// RTMP implementation of [`Connection`].
pub struct RtmpConnection {
    request_timeout: Duration,
    shared: Arc<Shared>,
    status_tx: Option<mpsc::Sender<ConnectionStatus>>,
    status_rx: Option<StatusStream>,
    control_tx: Option<mpsc::Sender<Control>>,
    media_tx: Option<mpsc::Sender<EncodedPacket>>,
    task: Option<JoinHandle<()>>,
}

impl RtmpConnection {
    pub fn new(request_timeout: Duration) -> Self {
        let (status_tx, status_rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            request_timeout,
            shared: Arc::new(Shared::default()),
            status_tx: Some(status_tx),
            status_rx: Some(status_rx),
            control_tx: None,
            media_tx: None,
            task: None,
        }
    }

    /// Get transport statistics.
    pub fn statistics(&self) -> TransportStatistics {
        self.shared.statistics()
    }

    fn fail_connect(
        &self,
        status_tx: mpsc::Sender<ConnectionStatus>,
        error: TransportError,
    ) -> TransportError {
        let status = match &error {
            TransportError::ConnectionRejected(description) => {
                ConnectionStatus::rejected(description.clone())
            }
            other => ConnectionStatus::failed(other.to_string()),
        };
        emit_status(&status_tx, status);
        self.shared.set_state(ConnectionState::Failed {
            reason: error.to_string(),
        });
        error
    }
}

#[async_trait]
impl Connection for RtmpConnection {
    #[instrument(name = "rtmp_connect", skip(self))]
    async fn connect(&mut self, endpoint: &str) -> TransportResult<ConnectResult> {
        if matches!(
            self.shared.state(),
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Err(TransportError::AlreadyConnected);
        }
        let endpoint = RtmpEndpoint::parse(endpoint)?;
        let status_tx = self
            .status_tx
            .take()
            .ok_or(TransportError::AlreadyConnected)?;

        info!(host = %endpoint.host, port = endpoint.port, app = %endpoint.app, "Connecting to RTMP server");
        self.shared.set_state(ConnectionState::Connecting);

        let established = match tokio::time::timeout(self.request_timeout, establish(&endpoint)).await
        {
            Ok(Ok(established)) => established,
            Ok(Err(e)) => return Err(self.fail_connect(status_tx, e)),
            Err(_) => {
                return Err(self.fail_connect(status_tx, TransportError::Timeout("connect acceptance")))
            }
        };

        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (media_tx, media_rx) = mpsc::channel(PACKET_CHANNEL_CAPACITY);

        self.shared.set_state(ConnectionState::Connected);
        emit_status(&status_tx, ConnectionStatus::connect_success());

        let task = ConnectionTask {
            reader: established.reader,
            writer: established.writer,
            session: established.session,
            control_rx,
            media_rx,
            status_tx,
            shared: Arc::clone(&self.shared),
            pending_publish: None,
            publishing: false,
            media_open: true,
        };
        self.task = Some(tokio::spawn(task.run()));
        self.control_tx = Some(control_tx);
        self.media_tx = Some(media_tx);

        info!("RTMP connection established");

        Ok(ConnectResult {
            host: endpoint.host,
            port: endpoint.port,
            app: endpoint.app,
        })
    }

    #[instrument(name = "rtmp_close", skip(self))]
    async fn close(&mut self) -> TransportResult<()> {
        self.media_tx = None;
        self.status_tx = None;

        let Some(task) = self.task.take() else {
            self.control_tx = None;
            if !self.shared.state().is_failed() {
                self.shared.set_state(ConnectionState::Disconnected);
            }
            return Ok(());
        };

        info!("Disconnecting from RTMP server");

        if let Some(control) = self.control_tx.take() {
            let (reply, done) = oneshot::channel();
            if control.send(Control::Close { reply }).await.is_ok() {
                let _ = done.await;
            }
        }

        let joined = task.await;
        self.shared.set_state(ConnectionState::Disconnected);

        if let Err(e) = joined {
            return Err(TransportError::ConnectionLost(format!(
                "connection task ended abnormally: {}",
                e
            )));
        }

        info!("Disconnected from RTMP server");
        Ok(())
    }

    fn take_status_stream(&mut self) -> Option<StatusStream> {
        self.status_rx.take()
    }

    fn publisher(&self) -> TransportResult<Arc<dyn Publisher>> {
        if !self.shared.state().is_connected() {
            return Err(TransportError::NotConnected);
        }
        let (Some(control), Some(media)) = (&self.control_tx, &self.media_tx) else {
            return Err(TransportError::NotConnected);
        };

        Ok(Arc::new(RtmpStream {
            control: control.clone(),
            media: media.clone(),
            shared: Arc::clone(&self.shared),
            settings: Mutex::new(None),
            published: AtomicBool::new(false),
            request_timeout: self.request_timeout,
        }))
    }

    fn state(&self) -> ConnectionState {
        self.shared.state()
    }
}

impl Drop for RtmpConnection {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Publish handle for an [`RtmpConnection`].
pub struct RtmpStream {
    control: mpsc::Sender<Control>,
    media: mpsc::Sender<EncodedPacket>,
    shared: Arc<Shared>,
    settings: Mutex<Option<VideoCodecSettings>>,
    published: AtomicBool,
    request_timeout: Duration,
}

#[async_trait]
impl Publisher for RtmpStream {
    async fn apply_video_settings(&self, settings: VideoCodecSettings) -> TransportResult<()> {
        if self.published.load(Ordering::SeqCst) {
            return Err(TransportError::AlreadyPublishing);
        }

        debug!(
            width = settings.width,
            height = settings.height,
            bitrate_kbps = settings.bitrate_kbps(),
            profile = settings.profile_level.profile_name(),
            "Applying video settings"
        );
        *self.settings.lock() = Some(settings);
        Ok(())
    }

    #[instrument(name = "rtmp_publish", skip_all)]
    async fn publish(&self, stream_name: &str) -> TransportResult<PublishResult> {
        let state = self.shared.state();
        assert!(
            !matches!(
                state,
                ConnectionState::Disconnected | ConnectionState::Connecting
            ),
            "publish called on a connection that is not connected"
        );
        if let ConnectionState::Failed { reason } = state {
            return Err(TransportError::ConnectionLost(reason));
        }
        if self.published.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyPublishing);
        }

        debug!("Requesting publish");
        let settings = self.settings.lock().clone();
        let (reply, response) = oneshot::channel();
        self.control
            .send(Control::Publish {
                stream_name: stream_name.to_string(),
                settings,
                reply,
            })
            .await
            .map_err(|_| TransportError::ChannelDisconnected)?;

        match tokio::time::timeout(self.request_timeout, response).await {
            Ok(Ok(result)) => result.map(|()| PublishResult {
                publishing_since: Instant::now(),
            }),
            Ok(Err(_)) => Err(TransportError::ChannelDisconnected),
            Err(_) => Err(TransportError::Timeout("publish acceptance")),
        }
    }

    fn send(&self, packet: EncodedPacket) -> TransportResult<()> {
        match self.media.try_send(packet) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.shared.packets_dropped.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(TransportError::ChannelDisconnected),
        }
    }

    fn statistics(&self) -> TransportStatistics {
        self.shared.statistics()
    }
}

fn emit_status(status_tx: &mpsc::Sender<ConnectionStatus>, status: ConnectionStatus) {
    if let Err(TrySendError::Full(status)) = status_tx.try_send(status) {
        warn!(code = %status.code, "Status stream full, dropping status");
    }
}

struct Established {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    session: ClientSession,
}

async fn write_result(writer: &mut OwnedWriteHalf, result: ClientSessionResult) -> TransportResult<()> {
    if let ClientSessionResult::OutboundResponse(packet) = result {
        writer.write_all(&packet.bytes).await?;
    }
    Ok(())
}

/// TCP connect, handshake and connect request, up to acceptance.
async fn establish(endpoint: &RtmpEndpoint) -> TransportResult<Established> {
    let stream = TcpStream::connect(endpoint.socket_addr())
        .await
        .map_err(|e| TransportError::ConnectionFailed(format!("TCP connect failed: {}", e)))?;
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    debug!("TCP connection established, starting handshake");

    let mut handshake = Handshake::new(PeerType::Client);
    let p0_p1 = handshake
        .generate_outbound_p0_and_p1()
        .map_err(|e| TransportError::Protocol(format!("Handshake generation failed: {:?}", e)))?;
    writer.write_all(&p0_p1).await?;

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let leftover = loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(TransportError::ConnectionFailed(
                "Connection closed during handshake".to_string(),
            ));
        }

        match handshake.process_bytes(&buf[..n]) {
            Ok(HandshakeProcessResult::InProgress { response_bytes }) => {
                if !response_bytes.is_empty() {
                    writer.write_all(&response_bytes).await?;
                }
            }
            Ok(HandshakeProcessResult::Completed {
                response_bytes,
                remaining_bytes,
            }) => {
                if !response_bytes.is_empty() {
                    writer.write_all(&response_bytes).await?;
                }
                break remaining_bytes;
            }
            Err(e) => {
                return Err(TransportError::Protocol(format!("Handshake failed: {:?}", e)));
            }
        }
    };

    debug!("Handshake complete, creating RTMP session");

    let (mut session, initial_results) = ClientSession::new(ClientSessionConfig::new())
        .map_err(|e| TransportError::Protocol(format!("Session creation failed: {:?}", e)))?;
    for result in initial_results {
        write_result(&mut writer, result).await?;
    }

    if !leftover.is_empty() {
        let results = session
            .handle_input(&leftover)
            .map_err(|e| TransportError::Protocol(format!("Session input error: {:?}", e)))?;
        for result in results {
            write_result(&mut writer, result).await?;
        }
    }

    debug!(app = %endpoint.app, "Requesting RTMP connection");
    let request = session
        .request_connection(endpoint.app.clone())
        .map_err(|e| TransportError::Protocol(format!("Connection request failed: {:?}", e)))?;
    write_result(&mut writer, request).await?;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(TransportError::ConnectionFailed(
                "Connection closed before acceptance".to_string(),
            ));
        }

        let results = session
            .handle_input(&buf[..n])
            .map_err(|e| TransportError::Protocol(format!("Session input error: {:?}", e)))?;

        let mut accepted = false;
        for result in results {
            match result {
                ClientSessionResult::OutboundResponse(packet) => {
                    writer.write_all(&packet.bytes).await?;
                }
                ClientSessionResult::RaisedEvent(ClientSessionEvent::ConnectionRequestAccepted) => {
                    debug!("Connection accepted by server");
                    accepted = true;
                }
                ClientSessionResult::RaisedEvent(
                    ClientSessionEvent::ConnectionRequestRejected { description },
                ) => {
                    return Err(TransportError::ConnectionRejected(description));
                }
                ClientSessionResult::RaisedEvent(event) => {
                    trace!("Received event: {:?}", event);
                }
                _ => {}
            }
        }

        if accepted {
            return Ok(Established {
                reader,
                writer,
                session,
            });
        }
    }
}

struct PendingPublish {
    settings: Option<VideoCodecSettings>,
    reply: oneshot::Sender<TransportResult<()>>,
}

/// Owns the socket and session of one established connection.
struct ConnectionTask {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    session: ClientSession,
    control_rx: mpsc::Receiver<Control>,
    media_rx: mpsc::Receiver<EncodedPacket>,
    status_tx: mpsc::Sender<ConnectionStatus>,
    shared: Arc<Shared>,
    pending_publish: Option<PendingPublish>,
    publishing: bool,
    media_open: bool,
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            tokio::select! {
                control = self.control_rx.recv() => match control {
                    Some(Control::Publish { stream_name, settings, reply }) => {
                        if let Err(e) = self.request_publish(stream_name, settings, reply).await {
                            self.fail(e);
                            break;
                        }
                    }
                    Some(Control::Close { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                packet = self.media_rx.recv(), if self.publishing && self.media_open => match packet {
                    Some(packet) => {
                        if let Err(e) = self.send_packet(&packet).await {
                            self.fail(e);
                            break;
                        }
                    }
                    None => self.media_open = false,
                },
                read = self.reader.read(&mut buf) => match read {
                    Ok(0) => {
                        warn!("Server closed the connection");
                        emit_status(&self.status_tx, ConnectionStatus::closed("Server closed the connection"));
                        self.lost("server closed the connection".to_string());
                        break;
                    }
                    Ok(n) => {
                        if let Err(e) = self.handle_input(&buf[..n]).await {
                            self.fail(e);
                            break;
                        }
                    }
                    Err(e) => {
                        self.fail(e.into());
                        break;
                    }
                },
            }
        }

        debug!("RTMP connection task finished");
    }

    async fn request_publish(
        &mut self,
        stream_name: String,
        settings: Option<VideoCodecSettings>,
        reply: oneshot::Sender<TransportResult<()>>,
    ) -> TransportResult<()> {
        if self.publishing || self.pending_publish.is_some() {
            let _ = reply.send(Err(TransportError::AlreadyPublishing));
            return Ok(());
        }

        let request = match self
            .session
            .request_publishing(stream_name, PublishRequestType::Live)
        {
            Ok(request) => request,
            Err(e) => {
                let _ = reply.send(Err(TransportError::Protocol(format!(
                    "Publish request failed: {:?}",
                    e
                ))));
                return Ok(());
            }
        };

        write_result(&mut self.writer, request).await?;
        self.pending_publish = Some(PendingPublish { settings, reply });
        Ok(())
    }

    async fn handle_input(&mut self, bytes: &[u8]) -> TransportResult<()> {
        let results = self
            .session
            .handle_input(bytes)
            .map_err(|e| TransportError::Protocol(format!("Session input error: {:?}", e)))?;

        for result in results {
            match result {
                ClientSessionResult::OutboundResponse(packet) => {
                    self.writer.write_all(&packet.bytes).await?;
                }
                ClientSessionResult::RaisedEvent(event) => self.handle_event(event).await?,
                _ => {}
            }
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: ClientSessionEvent) -> TransportResult<()> {
        match event {
            ClientSessionEvent::PublishRequestAccepted => {
                let Some(pending) = self.pending_publish.take() else {
                    return Ok(());
                };
                self.publishing = true;
                if let Some(settings) = &pending.settings {
                    self.send_metadata(settings).await?;
                }
                info!("Publish request accepted");
                let _ = pending.reply.send(Ok(()));
            }
            ClientSessionEvent::UnhandleableOnStatusCode { code } => {
                if code.starts_with("NetConnection.") {
                    let level = if code == status_codes::CONNECT_FAILED
                        || code == status_codes::CONNECT_REJECTED
                    {
                        StatusLevel::Error
                    } else {
                        StatusLevel::Status
                    };
                    emit_status(
                        &self.status_tx,
                        ConnectionStatus::new(code, level, "Reported by server"),
                    );
                } else if let Some(pending) = self.pending_publish.take() {
                    warn!(code = %code, "Publish request refused");
                    let _ = pending.reply.send(Err(TransportError::PublishRejected(code)));
                } else {
                    debug!(code = %code, "Unhandled stream status");
                }
            }
            other => trace!("Received event: {:?}", other),
        }
        Ok(())
    }

    async fn send_metadata(&mut self, settings: &VideoCodecSettings) -> TransportResult<()> {
        let mut metadata = StreamMetadata::new();
        metadata.video_width = Some(settings.width);
        metadata.video_height = Some(settings.height);
        metadata.video_bitrate_kbps = Some(settings.bitrate_kbps());
        metadata.encoder = Some(ENCODER_NAME.to_string());

        let result = self
            .session
            .publish_metadata(&metadata)
            .map_err(|e| TransportError::Protocol(format!("Failed to publish metadata: {:?}", e)))?;
        write_result(&mut self.writer, result).await
    }

    async fn send_packet(&mut self, packet: &EncodedPacket) -> TransportResult<()> {
        let timestamp = RtmpTimestamp::new(packet.timestamp_ms);

        let result = if packet.is_video() {
            self.session
                .publish_video_data(packet.data.clone(), timestamp, packet.can_be_dropped())
        } else {
            self.session
                .publish_audio_data(packet.data.clone(), timestamp, packet.can_be_dropped())
        };

        let session_result = result
            .map_err(|e| TransportError::Protocol(format!("Failed to publish data: {:?}", e)))?;
        write_result(&mut self.writer, session_result).await?;

        self.shared
            .bytes_sent
            .fetch_add(packet.data.len() as u64, Ordering::Relaxed);
        self.shared.packets_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flush queued media and shut the socket down.
    async fn shutdown(&mut self) {
        if self.publishing {
            let mut flushed = 0u32;
            while let Ok(packet) = self.media_rx.try_recv() {
                if let Err(e) = self.send_packet(&packet).await {
                    warn!(error = %e, "Failed to flush queued media");
                    break;
                }
                flushed += 1;
            }
            debug!(flushed, "Flushed queued media");
        }

        if let Err(e) = self.writer.shutdown().await {
            debug!(error = %e, "Socket shutdown failed");
        }
    }

    fn fail(&mut self, error: TransportError) {
        error!(error = %error, "RTMP connection error");
        emit_status(&self.status_tx, ConnectionStatus::failed(error.to_string()));
        self.lost(error.to_string());
    }

    fn lost(&mut self, reason: String) {
        if let Some(pending) = self.pending_publish.take() {
            let _ = pending
                .reply
                .send(Err(TransportError::ConnectionLost(reason.clone())));
        }
        self.shared.set_state(ConnectionState::Failed { reason });
    }
}
