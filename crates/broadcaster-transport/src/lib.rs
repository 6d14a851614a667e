//! RTMP streaming client.
//!
//! This crate provides the connection and publish capabilities the engine
//! drives, plus an RTMP implementation of both. A [`Connection`] is created
//! fresh for every broadcast attempt through a [`Transport`].

mod connection;
mod endpoint;
mod error;
mod rtmp;

pub use connection::{
    status_codes, ConnectResult, Connection, ConnectionState, ConnectionStatus, PublishResult,
    Publisher, StatusLevel, StatusStream, Transport, TransportStatistics,
};
pub use endpoint::RtmpEndpoint;
pub use error::TransportError;
pub use rtmp::{RtmpConnection, RtmpStream, RtmpTransport};

/// Channel capacity for outgoing packets.
pub const PACKET_CHANNEL_CAPACITY: usize = 30;

/// Channel capacity for connection status events.
pub const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Port used when the endpoint URL carries none.
pub const DEFAULT_RTMP_PORT: u16 = 1935;

/// Default timeout for connect and publish requests in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
