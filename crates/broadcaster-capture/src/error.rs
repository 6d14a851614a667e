//! Error types for the capture module.

use thiserror::Error;

/// Errors that can occur during capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Capture source not found.
    #[error("Capture source not found: {0}")]
    SourceNotFound(String),

    /// Capture already started.
    #[error("Capture already started")]
    AlreadyStarted,

    /// Capture not started.
    #[error("Capture not started")]
    NotStarted,

    /// The capture subsystem refused a filter or configuration update.
    #[error("Capture update rejected: {0}")]
    UpdateRejected(String),

    /// Capture stopped unexpectedly.
    #[error("Capture stopped: {0}")]
    Stopped(String),

    /// Permission denied for capture.
    #[error("Permission denied for capture")]
    PermissionDenied,

    /// Producer thread could not be spawned.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
