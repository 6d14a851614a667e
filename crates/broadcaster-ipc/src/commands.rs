//! Commands sent from the front-end to the engine.

use serde::{Deserialize, Serialize};

use crate::types::PublishTarget;

/// Commands that the front-end can send to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineCommand {
    /// Start broadcasting. Uses the configured target when `None`.
    StartBroadcast { target: Option<PublishTarget> },

    /// Stop the current broadcast.
    StopBroadcast,

    /// Hide or show this application's windows in the captured display.
    SetExcludeAppFromStream(bool),

    /// Start or stop capturing the microphone.
    SetMicrophoneEnabled(bool),

    /// Start or stop capturing system audio.
    SetSystemAudioEnabled(bool),

    /// Exclude or include this application's audio.
    SetAppAudioExcluded(bool),

    /// Select the microphone device (None for the system default).
    SelectMicrophone(Option<String>),

    /// Request current broadcast state.
    GetState,

    /// Shutdown the engine completely.
    Shutdown,
}
