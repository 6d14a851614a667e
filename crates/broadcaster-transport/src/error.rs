//! Error types for the transport module.

use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The server refused the connect request.
    #[error("Connection rejected: {0}")]
    ConnectionRejected(String),

    /// Connection lost.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Invalid RTMP URL.
    #[error("Invalid RTMP URL: {0}")]
    InvalidUrl(String),

    /// URL scheme this client cannot speak.
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// The server refused the publish request.
    #[error("Publish rejected: {0}")]
    PublishRejected(String),

    /// Codec settings applied after publishing began.
    #[error("Stream is already publishing")]
    AlreadyPublishing,

    /// A request got no answer in time.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// Outgoing media queue is full; the packet was dropped.
    #[error("Media queue full")]
    QueueFull,

    /// Not connected.
    #[error("Not connected")]
    NotConnected,

    /// Already connected.
    #[error("Already connected")]
    AlreadyConnected,

    /// Channel disconnected.
    #[error("Channel disconnected")]
    ChannelDisconnected,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// RTMP protocol error.
    #[error("RTMP protocol error: {0}")]
    Protocol(String),
}
