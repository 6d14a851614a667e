//! Command loop driving the broadcast controller.

use std::future::Future;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, error, info, instrument, warn};

use broadcaster_capture::CaptureSource;
use broadcaster_encoder::EncoderFactory;
use broadcaster_ipc::{
    BroadcastConfig, CaptureSettingsUpdate, EngineCommand, EngineEvent, StopReason,
};
use broadcaster_transport::Transport;

use crate::controller::BroadcastController;
use crate::EngineResult;

/// How long the loop waits for a command before checking for a metrics report.
const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The main broadcast engine.
///
/// Owns a tokio runtime and the [`BroadcastController`], and runs a blocking
/// loop over [`EngineCommand`]s. Meant to live on its own thread; see
/// [`spawn_engine`].
pub struct Engine {
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
    runtime: Runtime,
    controller: BroadcastController,
}

impl Engine {
    /// Create a new engine.
    pub fn new(
        config: BroadcastConfig,
        capture: Arc<dyn CaptureSource>,
        transport: Arc<dyn Transport>,
        encoder_factory: EncoderFactory,
        command_rx: Receiver<EngineCommand>,
        event_tx: Sender<EngineEvent>,
    ) -> EngineResult<Self> {
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .thread_name("broadcaster-runtime")
            .build()?;

        let controller = BroadcastController::new(config, capture, transport, encoder_factory);
        controller.set_event_sender(event_tx.clone());

        Ok(Self {
            command_rx,
            event_tx,
            runtime,
            controller,
        })
    }

    pub fn controller(&self) -> &BroadcastController {
        &self.controller
    }

    /// Run the engine (blocking).
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) {
        info!("Engine starting");

        if let Err(e) = self.block_on(self.controller.start_capture()) {
            error!(error = %e, "Failed to start capture");
            self.send_event(EngineEvent::CaptureStopped {
                message: e.to_string(),
            });
        }

        self.send_event(EngineEvent::Ready);

        loop {
            match self.command_rx.recv_timeout(COMMAND_POLL_INTERVAL) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    if let Some(metrics) = self.controller.take_metrics_report() {
                        self.send_event(EngineEvent::Metrics(metrics));
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    info!("Command channel disconnected, shutting down");
                    self.block_on(self.controller.shutdown());
                    break;
                }
            }
        }

        info!("Engine stopped");
    }

    /// Handle a command. Returns false if engine should stop.
    fn handle_command(&self, command: EngineCommand) -> bool {
        debug!(?command, "Handling command");

        match command {
            EngineCommand::StartBroadcast { target } => {
                if let Err(e) = self.block_on(self.controller.start_broadcast(target)) {
                    warn!(error = %e, "Start broadcast failed");
                }
            }
            EngineCommand::StopBroadcast => {
                self.block_on(self.controller.stop_broadcast(StopReason::UserRequested))
            }
            EngineCommand::SetExcludeAppFromStream(exclude) => {
                self.reconfigure(self.controller.update_capture_filter(exclude))
            }
            EngineCommand::SetMicrophoneEnabled(enabled) => self.reconfigure(
                self.controller
                    .update_capture_settings(CaptureSettingsUpdate::microphone(enabled)),
            ),
            EngineCommand::SetSystemAudioEnabled(enabled) => self.reconfigure(
                self.controller
                    .update_capture_settings(CaptureSettingsUpdate::system_audio(enabled)),
            ),
            EngineCommand::SetAppAudioExcluded(excluded) => self.reconfigure(
                self.controller
                    .update_capture_settings(CaptureSettingsUpdate::app_audio_excluded(excluded)),
            ),
            EngineCommand::SelectMicrophone(device) => {
                self.reconfigure(self.controller.select_microphone(device))
            }
            EngineCommand::GetState => self.send_state(),
            EngineCommand::Shutdown => {
                self.block_on(self.controller.shutdown());
                self.send_event(EngineEvent::Shutdown);
                return false;
            }
        }

        true
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Failures are already logged and reported by the controller.
    fn reconfigure(&self, update: impl Future<Output = EngineResult<()>>) {
        if let Err(e) = self.block_on(update) {
            debug!(error = %e, "Reconfiguration not applied");
        }
    }

    fn send_state(&self) {
        let state = self.controller.state();
        self.send_event(EngineEvent::StateChanged {
            previous: Box::new(state.clone()),
            current: Box::new(state),
        });
    }

    fn send_event(&self, event: EngineEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

/// Run an engine on a dedicated thread.
pub fn spawn_engine(mut engine: Engine) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("broadcaster-engine".to_string())
        .spawn(move || engine.run())
}
