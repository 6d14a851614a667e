//! Top-level broadcast state machine and live reconfiguration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use broadcaster_capture::{
    CaptureConfiguration, CaptureError, CaptureObserver, CaptureSource, CaptureTrackAdapter,
    SampleHandler, SampleReceiver, Track,
};
use broadcaster_encoder::EncoderFactory;
use broadcaster_ipc::{
    BroadcastConfig, BroadcastState, CaptureSettings, CaptureSettingsUpdate, EngineEvent,
    PublishTarget, StartupPhase, StopReason, StreamMetrics,
};
use broadcaster_transport::{Connection, StatusLevel, StatusStream, Transport};

use crate::consumer::TrackConsumers;
use crate::error::EngineError;
use crate::metrics::MetricsCollector;
use crate::mixer::{MediaMixer, MediaSink};
use crate::publish::PublishSession;
use crate::EngineResult;

/// Connection and publish session of the attempt currently holding the
/// broadcast. At most one exists at a time.
struct ActiveBroadcast {
    generation: u64,
    connection: Box<dyn Connection>,
    session: Option<Arc<PublishSession>>,
    monitor: Option<JoinHandle<()>>,
    /// Set by the status monitor when the connection reports a disconnect.
    disconnect: DisconnectSlot,
}

type DisconnectSlot = Arc<Mutex<Option<String>>>;

struct ControllerInner {
    config: BroadcastConfig,
    capture: Arc<dyn CaptureSource>,
    transport: Arc<dyn Transport>,
    encoder_factory: EncoderFactory,
    mixer: Arc<MediaMixer>,
    adapters: Vec<Arc<CaptureTrackAdapter>>,
    pending_receivers: Mutex<Vec<(Track, SampleReceiver)>>,
    consumers: Mutex<TrackConsumers>,
    state: watch::Sender<BroadcastState>,
    /// Serializes start, stop and failure handling.
    active: AsyncMutex<Option<ActiveBroadcast>>,
    generation: AtomicU64,
    /// Desired capture settings. Also serializes reconfiguration.
    settings: AsyncMutex<CaptureSettings>,
    /// Configuration the capture subsystem has acknowledged.
    applied: RwLock<Arc<CaptureConfiguration>>,
    metrics: MetricsCollector,
    session: RwLock<Option<Arc<PublishSession>>>,
    events: RwLock<Option<Sender<EngineEvent>>>,
}

/// Owns the broadcast lifecycle: the mixer, the per-track adapters and
/// consumers, and the connection/publish session of each attempt.
///
/// [`BroadcastState`] is the only state exposed to callers. Start, stop and
/// connection failures are linearized through one async lock; live
/// reconfiguration never changes the broadcast state.
#[derive(Clone)]
pub struct BroadcastController {
    inner: Arc<ControllerInner>,
}

impl BroadcastController {
    /// Create a controller. Adapters and their channels live as long as the
    /// controller.
    pub fn new(
        config: BroadcastConfig,
        capture: Arc<dyn CaptureSource>,
        transport: Arc<dyn Transport>,
        encoder_factory: EncoderFactory,
    ) -> Self {
        let mut adapters = Vec::with_capacity(Track::ALL.len());
        let mut receivers = Vec::with_capacity(Track::ALL.len());
        for track in Track::ALL {
            let (adapter, receiver) = CaptureTrackAdapter::new(track);
            adapters.push(Arc::new(adapter));
            receivers.push((track, receiver));
        }

        let applied = CaptureConfiguration::from_settings(&config.capture, &config.display, &config.app_id);
        let (state, _) = watch::channel(BroadcastState::Idle);

        Self {
            inner: Arc::new(ControllerInner {
                settings: AsyncMutex::new(config.capture.clone()),
                config,
                capture,
                transport,
                encoder_factory,
                mixer: Arc::new(MediaMixer::new()),
                adapters,
                pending_receivers: Mutex::new(receivers),
                consumers: Mutex::new(TrackConsumers::default()),
                state,
                active: AsyncMutex::new(None),
                generation: AtomicU64::new(0),
                applied: RwLock::new(Arc::new(applied)),
                metrics: MetricsCollector::default(),
                session: RwLock::new(None),
                events: RwLock::new(None),
            }),
        }
    }

    /// Forward state changes, statuses and failures as [`EngineEvent`]s.
    pub fn set_event_sender(&self, events: Sender<EngineEvent>) {
        *self.inner.events.write() = Some(events);
    }

    /// Current broadcast state.
    pub fn state(&self) -> BroadcastState {
        self.inner.state.borrow().clone()
    }

    /// Watch broadcast state changes.
    pub fn subscribe(&self) -> watch::Receiver<BroadcastState> {
        self.inner.state.subscribe()
    }

    pub fn mixer(&self) -> &Arc<MediaMixer> {
        &self.inner.mixer
    }

    /// The configuration the capture subsystem last acknowledged.
    pub fn capture_configuration(&self) -> Arc<CaptureConfiguration> {
        Arc::clone(&self.inner.applied.read())
    }

    /// The desired capture settings.
    pub async fn capture_settings(&self) -> CaptureSettings {
        self.inner.settings.lock().await.clone()
    }

    /// Register the adapters with the capture subsystem, spawn the track
    /// consumers and start capturing with the current configuration.
    #[instrument(name = "start_capture", skip(self))]
    pub async fn start_capture(&self) -> EngineResult<()> {
        {
            // Receivers stay pending until every adapter is registered, so a
            // failed registration can be retried.
            let mut pending = self.inner.pending_receivers.lock();
            if !pending.is_empty() {
                for adapter in &self.inner.adapters {
                    let handler: Arc<dyn SampleHandler> = Arc::clone(adapter) as Arc<dyn SampleHandler>;
                    self.inner.capture.add_output(adapter.track(), handler)?;
                }
                self.inner.capture.set_observer(Arc::new(CaptureStopObserver {
                    controller: Arc::downgrade(&self.inner),
                }));
                let receivers = std::mem::take(&mut *pending);
                self.inner
                    .consumers
                    .lock()
                    .spawn(receivers, &self.inner.mixer);
            }
        }

        let _settings = self.inner.settings.lock().await;
        let configuration = self.capture_configuration();
        self.inner.capture.start_capture(&configuration).await?;

        info!(
            width = configuration.stream.width,
            height = configuration.stream.height,
            frame_rate = configuration.stream.frame_rate,
            "Capture started"
        );
        Ok(())
    }

    /// Stop capturing. Samples stop arriving; consumers stay parked.
    #[instrument(name = "stop_capture", skip(self))]
    pub async fn stop_capture(&self) -> EngineResult<()> {
        let _settings = self.inner.settings.lock().await;
        self.inner.capture.stop_capture().await?;
        info!("Capture stopped");
        Ok(())
    }

    /// Connect, publish and start the mixer.
    ///
    /// A no-op while starting or live. Starting from `Failed` is the explicit
    /// restart after a failure. Uses `target`, or the configured target when
    /// `None`.
    #[instrument(name = "start_broadcast", skip_all)]
    pub async fn start_broadcast(&self, target: Option<PublishTarget>) -> EngineResult<()> {
        if !self.state().can_start() {
            debug!("Already starting or live, ignoring start");
            return Ok(());
        }

        let mut active = self.inner.active.lock().await;
        if !self.state().can_start() {
            debug!("Already starting or live, ignoring start");
            return Ok(());
        }

        let target = target
            .or_else(|| self.inner.config.target.clone())
            .ok_or(EngineError::NoTarget)?;

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            endpoint = %target.endpoint_url,
            bandwidth_test = target.bandwidth_test,
            generation,
            "Starting broadcast"
        );
        self.enter_phase(StartupPhase::Connect);

        let mut attempt = ActiveBroadcast {
            generation,
            connection: self.inner.transport.new_connection(),
            session: None,
            monitor: None,
            disconnect: DisconnectSlot::default(),
        };

        match self.establish(&mut attempt, &target).await {
            Ok(session) => {
                self.inner
                    .mixer
                    .set_frame_rate(self.inner.config.display.frame_rate);
                self.inner.mixer.add_output(Arc::clone(&session) as Arc<dyn MediaSink>);
                self.inner.mixer.set_running(true);

                *self.inner.session.write() = Some(session);
                self.inner.metrics.start();
                *active = Some(attempt);

                self.transition_to(BroadcastState::Live {
                    endpoint: target.endpoint_url,
                });
                info!("Broadcast live");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Broadcast start failed");
                self.teardown(attempt).await;
                self.transition_to(BroadcastState::Failed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        attempt: &mut ActiveBroadcast,
        target: &PublishTarget,
    ) -> EngineResult<Arc<PublishSession>> {
        let connected = attempt.connection.connect(&target.endpoint_url).await?;
        debug!(host = %connected.host, port = connected.port, app = %connected.app, "Connected");

        if let Some(statuses) = attempt.connection.take_status_stream() {
            attempt.monitor = Some(self.spawn_status_monitor(
                attempt.generation,
                statuses,
                Arc::clone(&attempt.disconnect),
            ));
        }

        self.enter_phase(StartupPhase::Publish);

        let publisher = attempt.connection.publisher()?;
        let session = Arc::new(PublishSession::new(
            publisher,
            (self.inner.encoder_factory)(),
        ));
        attempt.session = Some(Arc::clone(&session));

        session.apply_video_settings(&self.inner.config.codec).await?;
        session.publish(target).await?;

        // A disconnect reported while starting fails the attempt before it goes live.
        if let Some(reason) = attempt.disconnect.lock().take() {
            return Err(EngineError::Disconnected(reason));
        }

        self.enter_phase(StartupPhase::StartMixer);
        Ok(session)
    }

    /// Stop the mixer and close the connection. Always ends in `Idle`.
    ///
    /// Waits for an in-progress start to finish first.
    #[instrument(name = "stop_broadcast", skip(self))]
    pub async fn stop_broadcast(&self, reason: StopReason) {
        let mut active = self.inner.active.lock().await;

        if self.state().is_idle() && active.is_none() {
            debug!("Already idle, ignoring stop");
            return;
        }

        info!(reason = reason.message(), "Stopping broadcast");
        self.transition_to(BroadcastState::Stopping { reason });

        match active.take() {
            Some(attempt) => self.teardown(attempt).await,
            None => self.inner.mixer.set_running(false),
        }

        self.transition_to(BroadcastState::Idle);
        info!("Broadcast stopped");
    }

    /// Stop broadcasting and capturing and cancel the track consumers.
    #[instrument(name = "controller_shutdown", skip(self))]
    pub async fn shutdown(&self) {
        self.stop_broadcast(StopReason::Shutdown).await;

        if self.inner.capture.is_active() {
            if let Err(e) = self.stop_capture().await {
                warn!(error = %e, "Failed to stop capture during shutdown");
            }
        }

        self.inner.consumers.lock().abort_all();
    }

    /// Turn exclusion of this application's windows on or off.
    #[instrument(name = "update_capture_filter", skip(self))]
    pub async fn update_capture_filter(&self, exclude_app_from_stream: bool) -> EngineResult<()> {
        self.reconfigure(move |settings| settings.exclude_app_from_stream = exclude_app_from_stream)
            .await
    }

    /// Apply capture toggle changes to the running capture.
    #[instrument(name = "update_capture_settings", skip(self))]
    pub async fn update_capture_settings(&self, update: CaptureSettingsUpdate) -> EngineResult<()> {
        self.reconfigure(move |settings| update.apply_to(settings))
            .await
    }

    /// Switch the microphone device. `None` selects the system default.
    pub async fn select_microphone(&self, device: Option<String>) -> EngineResult<()> {
        self.update_capture_settings(CaptureSettingsUpdate::microphone_device(device))
            .await
    }

    /// Rebuild the configuration snapshot and push the parts that differ
    /// from what the capture subsystem last acknowledged.
    async fn reconfigure(&self, change: impl FnOnce(&mut CaptureSettings) + Send) -> EngineResult<()> {
        let mut settings = self.inner.settings.lock().await;
        change(&mut *settings);

        let config = &self.inner.config;
        let next = CaptureConfiguration::from_settings(&settings, &config.display, &config.app_id);
        let applied = self.capture_configuration();

        if next == *applied {
            debug!("Capture configuration unchanged");
            return Ok(());
        }

        if !self.inner.capture.is_active() {
            debug!("Capture not running, storing configuration for next start");
            *self.inner.applied.write() = Arc::new(next);
            return Ok(());
        }

        let mut result = Ok(());

        if next.filter != applied.filter {
            match self
                .inner
                .capture
                .update_content_filter(next.filter.clone())
                .await
            {
                Ok(()) => {
                    let mut current = self.inner.applied.write();
                    *current = Arc::new(CaptureConfiguration {
                        filter: next.filter.clone(),
                        stream: current.stream.clone(),
                    });
                    info!(
                        app_excluded = next.excludes_application(&config.app_id),
                        "Content filter updated"
                    );
                }
                Err(e) => {
                    result = Err(self.reconfiguration_failed("content filter", e));
                }
            }
        }

        if next.stream != applied.stream {
            match self
                .inner
                .capture
                .update_configuration(next.stream.clone())
                .await
            {
                Ok(()) => {
                    let mut current = self.inner.applied.write();
                    *current = Arc::new(CaptureConfiguration {
                        filter: current.filter.clone(),
                        stream: next.stream.clone(),
                    });
                    info!(
                        microphone = next.stream.captures_microphone,
                        system_audio = next.stream.captures_audio,
                        app_audio_excluded = next.stream.excludes_current_process_audio,
                        "Stream configuration updated"
                    );
                }
                Err(e) => {
                    result = Err(self.reconfiguration_failed("stream configuration", e));
                }
            }
        }

        result
    }

    fn reconfiguration_failed(&self, what: &str, error: CaptureError) -> EngineError {
        error!(error = %error, "Failed to update {}", what);
        self.emit(EngineEvent::ReconfigurationFailed {
            message: format!("Failed to update {}: {}", what, error),
        });
        error.into()
    }

    /// Snapshot of all pipeline counters.
    pub fn metrics(&self) -> StreamMetrics {
        let publish = self.inner.session.read().as_ref().map(|s| s.stats());
        self.inner.metrics.snapshot(
            self.inner.adapters.iter().map(|a| a.as_ref()),
            self.inner.mixer.stats(),
            publish,
        )
    }

    /// Metrics snapshot if live and a report is due.
    pub fn take_metrics_report(&self) -> Option<StreamMetrics> {
        if !self.state().is_live() || !self.inner.metrics.should_report() {
            return None;
        }
        self.inner.metrics.mark_reported();
        Some(self.metrics())
    }

    fn spawn_status_monitor(
        &self,
        generation: u64,
        mut statuses: StatusStream,
        disconnect: DisconnectSlot,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            while let Some(status) = statuses.recv().await {
                match status.level {
                    StatusLevel::Error => error!(
                        code = %status.code,
                        description = %status.description,
                        "Connection status"
                    ),
                    _ => info!(
                        code = %status.code,
                        description = %status.description,
                        "Connection status"
                    ),
                }

                let lost = status
                    .indicates_disconnect()
                    .then(|| format!("{}: {}", status.code, status.description));
                if let Some(reason) = &lost {
                    *disconnect.lock() = Some(reason.clone());
                }

                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let controller = BroadcastController { inner };
                controller.emit(EngineEvent::ConnectionStatus {
                    code: status.code.clone(),
                    level: status.level.as_str().to_string(),
                    description: status.description.clone(),
                });

                if let Some(reason) = lost {
                    controller.fail_attempt(generation, reason).await;
                    return;
                }
            }
            debug!(generation, "Status stream ended");
        })
    }

    /// Fail the given attempt if it still holds the broadcast.
    async fn fail_attempt(&self, generation: u64, reason: String) {
        let mut active = self.inner.active.lock().await;

        if active.as_ref().map(|a| a.generation) != Some(generation) {
            debug!(generation, "Ignoring status from a finished attempt");
            return;
        }
        let Some(mut attempt) = active.take() else {
            return;
        };
        // Called from the monitor itself; it finishes on its own.
        attempt.monitor = None;

        error!(reason = %reason, "Connection lost, broadcast failed");
        self.teardown(attempt).await;
        self.transition_to(BroadcastState::Failed { reason });
    }

    /// Stop the mixer, detach the session and close the connection best-effort.
    async fn teardown(&self, mut attempt: ActiveBroadcast) {
        self.inner.mixer.set_running(false);
        if let Some(session) = attempt.session.take() {
            let sink: Arc<dyn MediaSink> = Arc::clone(&session) as Arc<dyn MediaSink>;
            self.inner.mixer.remove_output(&sink);
            session.finish();
        }
        *self.inner.session.write() = None;
        self.inner.metrics.stop();

        if let Some(monitor) = attempt.monitor.take() {
            monitor.abort();
        }

        let close_timeout = Duration::from_millis(self.inner.config.close_timeout_ms);
        match tokio::time::timeout(close_timeout, attempt.connection.close()).await {
            Ok(Ok(())) => debug!("Connection closed"),
            Ok(Err(e)) => warn!(error = %e, "Connection close failed"),
            Err(_) => warn!(timeout_ms = self.inner.config.close_timeout_ms, "Connection close timed out"),
        }
    }

    fn enter_phase(&self, phase: StartupPhase) {
        info!(phase = phase.name(), "Startup phase");
        self.transition_to(BroadcastState::Starting { phase });
    }

    fn transition_to(&self, new_state: BroadcastState) {
        let previous = self.inner.state.send_replace(new_state.clone());

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        self.emit(EngineEvent::StateChanged {
            previous: Box::new(previous),
            current: Box::new(new_state),
        });
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(events) = self.inner.events.read().as_ref() {
            if let Err(e) = events.try_send(event) {
                warn!("Failed to send event: {}", e);
            }
        }
    }
}

/// Reports capture stopping on its own.
struct CaptureStopObserver {
    controller: Weak<ControllerInner>,
}

impl CaptureObserver for CaptureStopObserver {
    fn did_stop_with_error(&self, error: &CaptureError) {
        error!(error = %error, "Stream stopped with error");

        if let Some(inner) = self.controller.upgrade() {
            BroadcastController { inner }.emit(EngineEvent::CaptureStopped {
                message: error.to_string(),
            });
        }
    }
}
