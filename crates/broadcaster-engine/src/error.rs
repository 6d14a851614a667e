//! Error types for the engine.

use thiserror::Error;

use broadcaster_capture::CaptureError;
use broadcaster_encoder::EncoderError;
use broadcaster_transport::TransportError;

/// Errors surfaced by the broadcast controller and engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Capture subsystem error.
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Codec error.
    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    /// Connection or publish error.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The connection reported a disconnect while the broadcast was starting.
    #[error("Connection lost: {0}")]
    Disconnected(String),

    /// Start requested without a target.
    #[error("No publish target configured")]
    NoTarget,

    /// Codec settings changed after publishing began.
    #[error("Video settings are fixed once publishing has started")]
    SettingsLocked,

    /// Runtime setup failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
