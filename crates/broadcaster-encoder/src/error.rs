//! Error types for the encoder module.

use thiserror::Error;

/// Errors that can occur during encoding operations.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// Settings rejected by the encoder.
    #[error("Unsupported codec settings: {0}")]
    UnsupportedSettings(String),

    /// Settings were applied twice.
    #[error("Encoder already configured")]
    AlreadyConfigured,

    /// General encoding error.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Invalid input data.
    #[error("Invalid input data: {0}")]
    InvalidInput(String),

    /// Encoder not configured.
    #[error("Encoder not initialized")]
    NotInitialized,
}
