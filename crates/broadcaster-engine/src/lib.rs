//! Core orchestrator for the broadcaster.
//!
//! This crate coordinates capture, encoding and transport: per-track
//! consumers feed the [`MediaMixer`], which feeds the [`PublishSession`] of
//! the active broadcast attempt. [`BroadcastController`] owns the lifecycle
//! and [`Engine`] drives it from IPC commands.

mod consumer;
mod controller;
mod error;
mod metrics;
mod mixer;
mod orchestrator;
mod publish;

pub use consumer::TrackConsumers;
pub use controller::BroadcastController;
pub use error::EngineError;
pub use metrics::{MetricsCollector, METRICS_REPORT_INTERVAL};
pub use mixer::{MediaMixer, MediaSink, MixerStats};
pub use orchestrator::{spawn_engine, Engine};
pub use publish::{PublishSession, PublishState, PublishStats};

use std::sync::Arc;

use broadcaster_capture::CaptureSource;
use broadcaster_encoder::EncoderFactory;
use broadcaster_ipc::{BroadcastConfig, EngineCommand, EngineEvent};
use broadcaster_transport::Transport;
use crossbeam_channel::{Receiver, Sender};

pub use error::EngineResult;

/// Create an engine instance with IPC channels.
pub fn create_engine(
    config: BroadcastConfig,
    capture: Arc<dyn CaptureSource>,
    transport: Arc<dyn Transport>,
    encoder_factory: EncoderFactory,
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
) -> EngineResult<Engine> {
    Engine::new(
        config,
        capture,
        transport,
        encoder_factory,
        command_rx,
        event_tx,
    )
}
