//! Connection state, status events and the capability traits.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use broadcaster_encoder::EncodedPacket;
use broadcaster_ipc::VideoCodecSettings;

use crate::TransportResult;

/// Status codes carried on the status stream.
pub mod status_codes {
    pub const CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";
    pub const CONNECT_CLOSED: &str = "NetConnection.Connect.Closed";
    pub const CONNECT_FAILED: &str = "NetConnection.Connect.Failed";
    pub const CONNECT_REJECTED: &str = "NetConnection.Connect.Rejected";
}

/// Connection state for the RTMP client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,

    /// Connecting to server.
    Connecting,

    /// Connected to the server application.
    Connected,

    /// Connection failed or was lost.
    Failed { reason: String },
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Get status message for logs.
    pub fn message(&self) -> String {
        match self {
            Self::Disconnected => "Disconnected".to_string(),
            Self::Connecting => "Connecting...".to_string(),
            Self::Connected => "Connected".to_string(),
            Self::Failed { reason } => format!("Failed: {}", reason),
        }
    }
}

/// Severity of a status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Status,
    Warning,
    Error,
}

impl StatusLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event on a connection's status stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub code: String,
    pub level: StatusLevel,
    pub description: String,
}

impl ConnectionStatus {
    pub fn new(code: impl Into<String>, level: StatusLevel, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            level,
            description: description.into(),
        }
    }

    pub fn connect_success() -> Self {
        Self::new(
            status_codes::CONNECT_SUCCESS,
            StatusLevel::Status,
            "Connection succeeded.",
        )
    }

    pub fn closed(description: impl Into<String>) -> Self {
        Self::new(status_codes::CONNECT_CLOSED, StatusLevel::Status, description)
    }

    pub fn failed(description: impl Into<String>) -> Self {
        Self::new(status_codes::CONNECT_FAILED, StatusLevel::Error, description)
    }

    pub fn rejected(description: impl Into<String>) -> Self {
        Self::new(status_codes::CONNECT_REJECTED, StatusLevel::Error, description)
    }

    pub fn is_connect_success(&self) -> bool {
        self.code == status_codes::CONNECT_SUCCESS
    }

    /// Returns true if an observer should treat this status as a lost
    /// connection: anything at error level, or any code other than
    /// connect success.
    pub fn indicates_disconnect(&self) -> bool {
        self.level == StatusLevel::Error || !self.is_connect_success()
    }
}

/// Status events of one connection. Ends when the connection goes away.
pub type StatusStream = mpsc::Receiver<ConnectionStatus>;

/// Outcome of a successful connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResult {
    pub host: String,
    pub port: u16,
    pub app: String,
}

/// Outcome of a successful publish request.
#[derive(Debug, Clone, Copy)]
pub struct PublishResult {
    pub publishing_since: Instant,
}

/// Counters for packets handed to a publisher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStatistics {
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub packets_dropped: u64,
}

/// A network session with a streaming endpoint.
#[async_trait]
pub trait Connection: Send {
    /// Establish the session. Fails if already connected.
    async fn connect(&mut self, endpoint: &str) -> TransportResult<ConnectResult>;

    /// Tear the session down. Safe to call repeatedly and before connect.
    async fn close(&mut self) -> TransportResult<()>;

    /// Take the status stream. Returns `None` after the first call.
    fn take_status_stream(&mut self) -> Option<StatusStream>;

    /// Publish handle bound to this session. Requires a live connection.
    fn publisher(&self) -> TransportResult<Arc<dyn Publisher>>;

    /// Current connection state.
    fn state(&self) -> ConnectionState;
}

/// A publish handle on a connected session.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Apply codec settings. Only allowed before [`Publisher::publish`].
    async fn apply_video_settings(&self, settings: VideoCodecSettings) -> TransportResult<()>;

    /// Begin publishing under `stream_name`.
    ///
    /// # Panics
    ///
    /// Panics if the underlying connection was never established.
    async fn publish(&self, stream_name: &str) -> TransportResult<PublishResult>;

    /// Queue one packet without blocking.
    fn send(&self, packet: EncodedPacket) -> TransportResult<()>;

    /// Packet counters.
    fn statistics(&self) -> TransportStatistics;
}

/// Factory for per-attempt connections.
pub trait Transport: Send + Sync {
    fn new_connection(&self) -> Box<dyn Connection>;
}
