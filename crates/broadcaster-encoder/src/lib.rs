//! Codec boundary between captured samples and the publisher.
//!
//! Encoding internals are a black box behind [`SampleEncoder`]: the engine
//! configures an encoder once with [`VideoCodecSettings`] and then hands it
//! uncompressed samples, receiving packets ready for the wire.

mod error;
mod passthrough;

pub use error::EncoderError;
pub use passthrough::PassthroughEncoder;

use std::sync::Arc;

use bytes::Bytes;

use broadcaster_capture::Sample;
use broadcaster_ipc::VideoCodecSettings;

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

/// Creates a fresh encoder for each broadcast attempt.
pub type EncoderFactory = Arc<dyn Fn() -> Box<dyn SampleEncoder> + Send + Sync>;

/// Kind of media carried by a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Video,
    Audio,
}

/// An encoded packet ready to be published.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    /// Packet data.
    pub data: Bytes,

    /// Presentation timestamp in milliseconds.
    pub timestamp_ms: u32,

    /// Video or audio.
    pub kind: PacketKind,

    /// Whether this is a keyframe (for video).
    pub is_keyframe: bool,

    /// Whether this carries decoder configuration rather than media.
    pub is_sequence_header: bool,
}

impl EncodedPacket {
    /// Returns true for video packets.
    pub fn is_video(&self) -> bool {
        self.kind == PacketKind::Video
    }

    /// Non-keyframe video may be dropped under congestion; everything else may not.
    pub fn can_be_dropped(&self) -> bool {
        self.is_video() && !self.is_keyframe && !self.is_sequence_header
    }
}

/// A codec configured once, before publishing.
pub trait SampleEncoder: Send {
    /// Apply codec settings. Called once, before the first sample.
    fn configure(&mut self, settings: &VideoCodecSettings) -> EncoderResult<()>;

    /// Encode one sample. `Ok(None)` means the encoder is buffering.
    fn encode(&mut self, sample: &Sample) -> EncoderResult<Option<EncodedPacket>>;

    /// Flush any buffered output.
    fn flush(&mut self) -> EncoderResult<Vec<EncodedPacket>>;

    /// Get encoder name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Factory producing [`PassthroughEncoder`]s.
pub fn passthrough_factory() -> EncoderFactory {
    Arc::new(|| Box::new(PassthroughEncoder::new()) as Box<dyn SampleEncoder>)
}
