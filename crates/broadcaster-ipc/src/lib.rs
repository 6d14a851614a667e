//! Typed front-end<->engine messages for the broadcaster.
//!
//! This crate defines the message types used for communication between
//! the console front-end and the engine core, plus the serde types that
//! make up the engine configuration.

mod commands;
mod events;
mod state;
mod types;

pub use commands::EngineCommand;
pub use events::EngineEvent;
pub use state::{BroadcastState, StartupPhase, StopReason};
pub use types::{
    BitrateMode, BroadcastConfig, CaptureSettings, CaptureSettingsUpdate, DisplaySettings,
    ProfileLevel, PublishTarget, StreamMetrics, TrackMetrics, VideoCodecSettings,
    BANDWIDTH_TEST_QUERY,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (front-end → Engine).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (Engine → front-end).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<EngineCommand>, Receiver<EngineCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<EngineEvent>, Receiver<EngineEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
