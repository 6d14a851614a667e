//! Encoder that forwards sample payloads unchanged.

use tracing::{debug, instrument, trace};

use broadcaster_capture::{Sample, SampleFormat};
use broadcaster_ipc::VideoCodecSettings;

use crate::error::EncoderError;
use crate::{EncodedPacket, EncoderResult, PacketKind, SampleEncoder};

/// Video frames between forced keyframes.
pub const KEYFRAME_INTERVAL: u64 = 120;

/// Frames the payload as-is. Stands in for a hardware codec in tests and
/// the console front-end.
#[derive(Debug, Default)]
pub struct PassthroughEncoder {
    settings: Option<VideoCodecSettings>,
    video_frames: u64,
}

impl PassthroughEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings applied by [`SampleEncoder::configure`], if any.
    pub fn settings(&self) -> Option<&VideoCodecSettings> {
        self.settings.as_ref()
    }
}

impl SampleEncoder for PassthroughEncoder {
    #[instrument(name = "passthrough_configure", skip(self))]
    fn configure(&mut self, settings: &VideoCodecSettings) -> EncoderResult<()> {
        if self.settings.is_some() {
            return Err(EncoderError::AlreadyConfigured);
        }
        if settings.width == 0 || settings.height == 0 {
            return Err(EncoderError::UnsupportedSettings(format!(
                "invalid size {}x{}",
                settings.width, settings.height
            )));
        }
        if settings.bitrate_bps == 0 {
            return Err(EncoderError::UnsupportedSettings("zero bitrate".into()));
        }

        debug!(
            width = settings.width,
            height = settings.height,
            bitrate_kbps = settings.bitrate_kbps(),
            profile = settings.profile_level.profile_name(),
            "Passthrough encoder configured"
        );
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn encode(&mut self, sample: &Sample) -> EncoderResult<Option<EncodedPacket>> {
        if self.settings.is_none() {
            return Err(EncoderError::NotInitialized);
        }
        if !sample.valid {
            return Err(EncoderError::InvalidInput("sample buffer is not valid".into()));
        }
        if sample.is_compressed() {
            return Err(EncoderError::InvalidInput(
                "compressed sample buffers are not supported".into(),
            ));
        }

        // RTMP timestamps are 32-bit and wrap.
        let timestamp_ms = sample.pts_ms() as u32;

        let packet = match (sample.track.is_audio(), sample.format) {
            (true, Some(SampleFormat::Audio { .. }) | None) => EncodedPacket {
                data: sample.data.clone(),
                timestamp_ms,
                kind: PacketKind::Audio,
                is_keyframe: false,
                is_sequence_header: false,
            },
            (false, Some(SampleFormat::Video { .. }) | None) => {
                let is_keyframe = self.video_frames % KEYFRAME_INTERVAL == 0;
                self.video_frames += 1;
                trace!(frame = self.video_frames, pts = timestamp_ms, "Framing video sample");
                EncodedPacket {
                    data: sample.data.clone(),
                    timestamp_ms,
                    kind: PacketKind::Video,
                    is_keyframe,
                    is_sequence_header: false,
                }
            }
            (_, Some(format)) => {
                return Err(EncoderError::InvalidInput(format!(
                    "{} sample with mismatched format {:?}",
                    sample.track, format
                )))
            }
        };

        Ok(Some(packet))
    }

    fn flush(&mut self) -> EncoderResult<Vec<EncodedPacket>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}
