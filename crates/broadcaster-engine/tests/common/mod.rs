//! In-memory capture and transport backends for driving the controller.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use broadcaster_capture::{
    CaptureConfiguration, CaptureError, CaptureObserver, CaptureResult, CaptureSource,
    ContentFilter, Sample, SampleHandler, StreamConfiguration, Track,
};
use broadcaster_encoder::{
    passthrough_factory, EncodedPacket, EncoderFactory, EncoderResult, PassthroughEncoder,
    SampleEncoder,
};
use broadcaster_engine::BroadcastController;
use broadcaster_ipc::{BroadcastConfig, BroadcastState, PublishTarget, VideoCodecSettings};
use broadcaster_transport::{
    ConnectResult, Connection, ConnectionState, ConnectionStatus, PublishResult, Publisher,
    StatusStream, Transport, TransportError, TransportResult, TransportStatistics,
};

pub const ENDPOINT: &str = "rtmp://ingest.example.com/app/";
pub const STREAM_KEY: &str = "live_abc123";

pub fn target() -> PublishTarget {
    PublishTarget::new(ENDPOINT, STREAM_KEY)
}

pub fn config() -> BroadcastConfig {
    BroadcastConfig {
        close_timeout_ms: 100,
        request_timeout_ms: 100,
        ..BroadcastConfig::default()
    }
}

#[derive(Default)]
pub struct FakeCapture {
    active: AtomicBool,
    pub fail_updates: AtomicBool,
    /// Number of upcoming `add_output` calls to refuse.
    pub fail_registrations: AtomicUsize,
    pub starts: Mutex<Vec<CaptureConfiguration>>,
    pub filter_updates: Mutex<Vec<ContentFilter>>,
    pub config_updates: Mutex<Vec<StreamConfiguration>>,
    handlers: Mutex<HashMap<Track, Arc<dyn SampleHandler>>>,
    observer: Mutex<Option<Arc<dyn CaptureObserver>>>,
}

impl FakeCapture {
    /// Deliver a sample the way the capture subsystem would.
    pub fn deliver(&self, sample: Sample) {
        let handler = self.handlers.lock().get(&sample.track).cloned();
        if let Some(handler) = handler {
            handler.on_sample(sample);
        }
    }

    pub fn stop_with_error(&self, error: CaptureError) {
        self.active.store(false, Ordering::SeqCst);
        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            observer.did_stop_with_error(&error);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

#[async_trait]
impl CaptureSource for FakeCapture {
    fn add_output(&self, track: Track, handler: Arc<dyn SampleHandler>) -> CaptureResult<()> {
        let refuse = self
            .fail_registrations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(CaptureError::SourceNotFound(format!("{:?}", track)));
        }
        self.handlers.lock().insert(track, handler);
        Ok(())
    }

    fn set_observer(&self, observer: Arc<dyn CaptureObserver>) {
        *self.observer.lock() = Some(observer);
    }

    async fn start_capture(&self, configuration: &CaptureConfiguration) -> CaptureResult<()> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyStarted);
        }
        self.starts.lock().push(configuration.clone());
        Ok(())
    }

    async fn update_content_filter(&self, filter: ContentFilter) -> CaptureResult<()> {
        self.filter_updates.lock().push(filter);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(CaptureError::UpdateRejected("filter refused".into()));
        }
        Ok(())
    }

    async fn update_configuration(&self, configuration: StreamConfiguration) -> CaptureResult<()> {
        self.config_updates.lock().push(configuration);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(CaptureError::UpdateRejected("configuration refused".into()));
        }
        Ok(())
    }

    async fn stop_capture(&self) -> CaptureResult<()> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Err(CaptureError::NotStarted);
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Shared record of everything the fake connections did.
#[derive(Default)]
pub struct TransportLog {
    pub fail_connect: AtomicBool,
    pub reject_publish: AtomicBool,
    pub fail_close: AtomicBool,
    pub hang_close: AtomicBool,
    /// Holds publish requests until released.
    pub gate_publish: AtomicBool,
    pub publish_gate: tokio::sync::Notify,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub published: Mutex<Vec<String>>,
    pub settings: Mutex<Vec<VideoCodecSettings>>,
    pub packets: Mutex<Vec<EncodedPacket>>,
    pub status_senders: Mutex<Vec<mpsc::Sender<ConnectionStatus>>>,
}

impl TransportLog {
    /// Push a status onto the newest connection's status stream.
    pub fn emit_status(&self, status: ConnectionStatus) {
        let sender = self.status_senders.lock().last().cloned();
        if let Some(sender) = sender {
            let _ = sender.try_send(status);
        }
    }
}

#[derive(Default)]
pub struct FakeTransport {
    pub log: Arc<TransportLog>,
}

impl Transport for FakeTransport {
    fn new_connection(&self) -> Box<dyn Connection> {
        Box::new(FakeConnection {
            log: Arc::clone(&self.log),
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            status_rx: None,
        })
    }
}

struct FakeConnection {
    log: Arc<TransportLog>,
    state: Arc<Mutex<ConnectionState>>,
    status_rx: Option<StatusStream>,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn connect(&mut self, _endpoint: &str) -> TransportResult<ConnectResult> {
        self.log.connects.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = ConnectionState::Connecting;

        if self.log.fail_connect.load(Ordering::SeqCst) {
            *self.state.lock() = ConnectionState::Failed {
                reason: "refused".into(),
            };
            return Err(TransportError::ConnectionFailed("refused".into()));
        }

        let (tx, rx) = mpsc::channel(16);
        let _ = tx.try_send(ConnectionStatus::connect_success());
        self.log.status_senders.lock().push(tx);
        self.status_rx = Some(rx);
        *self.state.lock() = ConnectionState::Connected;

        Ok(ConnectResult {
            host: "ingest.example.com".into(),
            port: 1935,
            app: "app".into(),
        })
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        if self.log.hang_close.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        *self.state.lock() = ConnectionState::Disconnected;
        if self.log.fail_close.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionLost("socket already gone".into()));
        }
        Ok(())
    }

    fn take_status_stream(&mut self) -> Option<StatusStream> {
        self.status_rx.take()
    }

    fn publisher(&self) -> TransportResult<Arc<dyn Publisher>> {
        if !self.state.lock().is_connected() {
            return Err(TransportError::NotConnected);
        }
        Ok(Arc::new(FakePublisher {
            log: Arc::clone(&self.log),
        }))
    }

    fn state(&self) -> ConnectionState {
        self.state.lock().clone()
    }
}

struct FakePublisher {
    log: Arc<TransportLog>,
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn apply_video_settings(&self, settings: VideoCodecSettings) -> TransportResult<()> {
        self.log.settings.lock().push(settings);
        Ok(())
    }

    async fn publish(&self, stream_name: &str) -> TransportResult<PublishResult> {
        self.log.published.lock().push(stream_name.to_string());
        if self.log.gate_publish.load(Ordering::SeqCst) {
            self.log.publish_gate.notified().await;
        }
        if self.log.reject_publish.load(Ordering::SeqCst) {
            return Err(TransportError::PublishRejected(
                "NetStream.Publish.BadName".into(),
            ));
        }
        Ok(PublishResult {
            publishing_since: Instant::now(),
        })
    }

    fn send(&self, packet: EncodedPacket) -> TransportResult<()> {
        self.log.packets.lock().push(packet);
        Ok(())
    }

    fn statistics(&self) -> TransportStatistics {
        TransportStatistics {
            packets_sent: self.log.packets.lock().len() as u64,
            ..TransportStatistics::default()
        }
    }
}

pub struct Harness {
    pub controller: BroadcastController,
    pub capture: Arc<FakeCapture>,
    pub transport: Arc<TransportLog>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: BroadcastConfig) -> Self {
        Self::build(config, passthrough_factory())
    }

    pub fn with_encoder(encoder_factory: EncoderFactory) -> Self {
        Self::build(config(), encoder_factory)
    }

    fn build(config: BroadcastConfig, encoder_factory: EncoderFactory) -> Self {
        let capture = Arc::new(FakeCapture::default());
        let transport = FakeTransport::default();
        let log = Arc::clone(&transport.log);
        let controller = BroadcastController::new(
            config,
            Arc::clone(&capture) as Arc<dyn CaptureSource>,
            Arc::new(transport),
            encoder_factory,
        );

        Self {
            controller,
            capture,
            transport: log,
        }
    }

    /// Start capture and go live.
    pub async fn live() -> Self {
        let harness = Self::new();
        harness.controller.start_capture().await.unwrap();
        harness
            .controller
            .start_broadcast(Some(target()))
            .await
            .unwrap();
        assert!(harness.controller.state().is_live());
        harness
    }

    pub async fn wait_for_state(&self, predicate: impl Fn(&BroadcastState) -> bool) {
        let mut rx = self.controller.subscribe();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if predicate(&rx.borrow_and_update()) {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .expect("state not reached in time");
    }
}

/// Poll until `condition` holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Holds every packet until flushed.
#[derive(Default)]
pub struct BufferingEncoder {
    inner: PassthroughEncoder,
    held: Vec<EncodedPacket>,
}

impl BufferingEncoder {
    pub fn factory() -> EncoderFactory {
        Arc::new(|| Box::new(BufferingEncoder::default()) as Box<dyn SampleEncoder>)
    }
}

impl SampleEncoder for BufferingEncoder {
    fn configure(&mut self, settings: &VideoCodecSettings) -> EncoderResult<()> {
        self.inner.configure(settings)
    }

    fn encode(&mut self, sample: &Sample) -> EncoderResult<Option<EncodedPacket>> {
        if let Some(packet) = self.inner.encode(sample)? {
            self.held.push(packet);
        }
        Ok(None)
    }

    fn flush(&mut self) -> EncoderResult<Vec<EncodedPacket>> {
        Ok(std::mem::take(&mut self.held))
    }

    fn name(&self) -> &'static str {
        "buffering"
    }
}
