//! Events sent from the engine to the front-end.

use serde::{Deserialize, Serialize};

use crate::state::BroadcastState;
use crate::types::StreamMetrics;

/// Events that the engine can send to the front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Broadcast state has changed.
    StateChanged {
        /// Previous state.
        previous: Box<BroadcastState>,

        /// Current state.
        current: Box<BroadcastState>,
    },

    /// Updated stream metrics.
    Metrics(StreamMetrics),

    /// A status reported by the streaming endpoint connection.
    ConnectionStatus {
        code: String,
        level: String,
        description: String,
    },

    /// A capture filter or configuration update was not applied.
    /// Capture continues with the previous configuration.
    ReconfigurationFailed { message: String },

    /// The capture subsystem stopped with an error.
    CaptureStopped { message: String },

    /// Engine is ready.
    Ready,

    /// Engine has shut down.
    Shutdown,
}
