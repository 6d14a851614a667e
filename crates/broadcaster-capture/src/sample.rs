//! Captured sample types.

use std::fmt;
use std::time::Instant;

use bytes::Bytes;

/// An independent capture source merged by the mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Track {
    Screen,
    Microphone,
    SystemAudio,
}

impl Track {
    /// All tracks, in mixer order.
    pub const ALL: [Track; 3] = [Track::Screen, Track::Microphone, Track::SystemAudio];

    /// Returns true for the audio tracks.
    pub fn is_audio(self) -> bool {
        matches!(self, Self::Microphone | Self::SystemAudio)
    }

    /// Returns a short name for logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Screen => "screen",
            Self::Microphone => "microphone",
            Self::SystemAudio => "system_audio",
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-frame status reported by the capture subsystem for screen samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// New content was rendered.
    Complete,
    /// Nothing changed since the previous frame.
    Idle,
    /// The frame is blank.
    Blank,
    /// Capture is suspended.
    Suspended,
    /// First frame after capture started.
    Started,
    /// Capture has stopped.
    Stopped,
}

/// Format description attached to a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Video frame.
    Video {
        width: u32,
        height: u32,
        /// Frame is already codec-compressed.
        compressed: bool,
    },

    /// Interleaved audio buffer.
    Audio { sample_rate: u32, channels: u16 },
}

impl SampleFormat {
    /// Returns true if the payload is codec-compressed.
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Video { compressed: true, .. })
    }
}

/// Timestamp for a captured sample.
#[derive(Debug, Clone, Copy)]
pub struct CaptureTimestamp {
    /// Monotonic timestamp when the sample was captured.
    pub capture_time: Instant,

    /// Presentation timestamp in 100ns units.
    pub pts_100ns: u64,
}

impl CaptureTimestamp {
    /// Create a timestamp relative to a capture start time.
    pub fn now(start_time: Instant) -> Self {
        let capture_time = Instant::now();
        let elapsed = capture_time.duration_since(start_time);
        let pts_100ns = elapsed.as_nanos() as u64 / 100;

        Self {
            capture_time,
            pts_100ns,
        }
    }

    /// Create a timestamp with an explicit presentation time.
    pub fn from_pts_100ns(pts_100ns: u64) -> Self {
        Self {
            capture_time: Instant::now(),
            pts_100ns,
        }
    }

    /// Get the presentation timestamp in milliseconds.
    pub fn pts_ms(&self) -> u64 {
        self.pts_100ns / 10_000
    }
}

/// One unit of captured media.
///
/// Deliberately not `Clone`: a sample moves from the capture callback into
/// the track channel and from there into the mixer, with a single owner at
/// every step.
#[derive(Debug)]
pub struct Sample {
    /// Track this sample belongs to.
    pub track: Track,

    /// Media payload.
    pub data: Bytes,

    /// Capture timestamp.
    pub timestamp: CaptureTimestamp,

    /// Format description, if the capture subsystem attached one.
    pub format: Option<SampleFormat>,

    /// Frame status metadata (screen samples only).
    pub frame_status: Option<FrameStatus>,

    /// Whether the underlying buffer is usable.
    pub valid: bool,

    /// Monotonically increasing per-track sequence number.
    pub sequence: u64,
}

impl Sample {
    /// A complete, uncompressed screen frame.
    pub fn video(
        data: Bytes,
        width: u32,
        height: u32,
        timestamp: CaptureTimestamp,
        sequence: u64,
    ) -> Self {
        Self {
            track: Track::Screen,
            data,
            timestamp,
            format: Some(SampleFormat::Video {
                width,
                height,
                compressed: false,
            }),
            frame_status: Some(FrameStatus::Complete),
            valid: true,
            sequence,
        }
    }

    /// An audio buffer for the given track.
    pub fn audio(
        track: Track,
        data: Bytes,
        sample_rate: u32,
        channels: u16,
        timestamp: CaptureTimestamp,
        sequence: u64,
    ) -> Self {
        Self {
            track,
            data,
            timestamp,
            format: Some(SampleFormat::Audio {
                sample_rate,
                channels,
            }),
            frame_status: None,
            valid: true,
            sequence,
        }
    }

    /// Replace the frame status metadata.
    pub fn with_frame_status(mut self, status: Option<FrameStatus>) -> Self {
        self.frame_status = status;
        self
    }

    /// Replace the format description.
    pub fn with_format(mut self, format: Option<SampleFormat>) -> Self {
        self.format = format;
        self
    }

    /// Mark the buffer as invalid.
    pub fn invalidated(mut self) -> Self {
        self.valid = false;
        self
    }

    /// Returns true if the payload is codec-compressed.
    pub fn is_compressed(&self) -> bool {
        self.format.map(|f| f.is_compressed()).unwrap_or(false)
    }

    /// Returns true if this is a screen frame with new content.
    pub fn is_complete_frame(&self) -> bool {
        self.frame_status == Some(FrameStatus::Complete)
    }

    /// Presentation timestamp in milliseconds.
    pub fn pts_ms(&self) -> u64 {
        self.timestamp.pts_ms()
    }
}
