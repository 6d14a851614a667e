//! Broadcast state machine types.

use serde::{Deserialize, Serialize};

/// The current state of a broadcast, as seen by callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastState {
    /// Not broadcasting.
    #[default]
    Idle,

    /// A broadcast attempt is starting.
    Starting {
        /// Current startup phase.
        phase: StartupPhase,
    },

    /// Publishing to the endpoint.
    Live {
        /// Endpoint being published to.
        endpoint: String,
    },

    /// The broadcast is being torn down.
    Stopping {
        /// Reason for stopping.
        reason: StopReason,
    },

    /// The broadcast attempt failed. An explicit restart is required.
    Failed {
        /// Human-readable reason.
        reason: String,
    },
}

impl BroadcastState {
    /// Returns true if not broadcasting.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the broadcast is starting.
    pub fn is_starting(&self) -> bool {
        matches!(self, Self::Starting { .. })
    }

    /// Returns true if the broadcast is live.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }

    /// Returns true if the broadcast is stopping.
    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Stopping { .. })
    }

    /// Returns true if the last attempt failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Returns true if a new broadcast attempt may begin from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Failed { .. })
    }

    /// Returns true while an attempt owns a connection (Starting or Live).
    pub fn is_active(&self) -> bool {
        self.is_starting() || self.is_live()
    }

    /// The failure reason, if failed.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Starting { .. } => "Starting",
            Self::Live { .. } => "Live",
            Self::Stopping { .. } => "Stopping",
            Self::Failed { .. } => "Failed",
        }
    }
}

/// Startup phases of a broadcast attempt, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupPhase {
    /// Connecting to the RTMP server.
    Connect,

    /// Applying codec settings and requesting to publish.
    Publish,

    /// Starting the mixer.
    StartMixer,
}

impl StartupPhase {
    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::Connect => "Connecting to server",
            Self::Publish => "Requesting to publish",
            Self::StartMixer => "Starting stream",
        }
    }
}

/// Reason for stopping a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// User requested stop.
    UserRequested,

    /// The engine is shutting down.
    Shutdown,
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> &'static str {
        match self {
            Self::UserRequested => "Broadcast stopped by user",
            Self::Shutdown => "Engine shutting down",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_start_only_from_idle_or_failed() {
        assert!(BroadcastState::Idle.can_start());
        assert!(BroadcastState::Failed {
            reason: "boom".into()
        }
        .can_start());
        assert!(!BroadcastState::Starting {
            phase: StartupPhase::Connect
        }
        .can_start());
        assert!(!BroadcastState::Live {
            endpoint: "rtmp://localhost/app".into()
        }
        .can_start());
        assert!(!BroadcastState::Stopping {
            reason: StopReason::UserRequested
        }
        .can_start());
    }

    #[test]
    fn test_startup_phase_names() {
        assert_eq!(StartupPhase::Connect.name(), "Connecting to server");
        assert_eq!(StartupPhase::StartMixer.name(), "Starting stream");
        assert_eq!(
            BroadcastState::Starting {
                phase: StartupPhase::Publish
            }
            .name(),
            "Starting"
        );
    }
}
