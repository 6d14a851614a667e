//! Common types used across IPC messages and configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Query string appended to the publish name when a bandwidth test is requested.
pub const BANDWIDTH_TEST_QUERY: &str = "?bandwidthtest=true";

/// Where a broadcast attempt publishes to.
///
/// Supplied once per broadcast attempt.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishTarget {
    /// RTMP endpoint URL (e.g., "rtmp://live.example.com/app/").
    pub endpoint_url: String,

    /// Stream key. Secret, never logged.
    pub stream_key: String,

    /// Ask the ingest server to treat this session as a bandwidth test.
    #[serde(default)]
    pub bandwidth_test: bool,
}

impl PublishTarget {
    /// Create a target without the bandwidth test flag.
    pub fn new(endpoint_url: impl Into<String>, stream_key: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            stream_key: stream_key.into(),
            bandwidth_test: false,
        }
    }

    /// The name passed to the publish request.
    ///
    /// The bandwidth test parameter is only appended when enabled; servers
    /// have been seen to mishandle an explicit `bandwidthtest=false`.
    pub fn publish_name(&self) -> String {
        if self.bandwidth_test {
            format!("{}{}", self.stream_key, BANDWIDTH_TEST_QUERY)
        } else {
            self.stream_key.clone()
        }
    }
}

impl fmt::Debug for PublishTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishTarget")
            .field("endpoint_url", &self.endpoint_url)
            .field("stream_key", &"<redacted>")
            .field("bandwidth_test", &self.bandwidth_test)
            .finish()
    }
}

/// User-facing capture toggles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Hide this application's own windows from the captured display.
    pub exclude_app_from_stream: bool,

    /// Capture the microphone track.
    pub microphone_enabled: bool,

    /// Capture the system audio track.
    pub system_audio_enabled: bool,

    /// Leave this application's own audio out of the system audio track.
    pub app_audio_excluded: bool,

    /// Microphone device identifier (None for the system default).
    pub microphone_device: Option<String>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            exclude_app_from_stream: true,
            microphone_enabled: false,
            system_audio_enabled: true,
            app_audio_excluded: true,
            microphone_device: None,
        }
    }
}

/// A partial change to [`CaptureSettings`]. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSettingsUpdate {
    pub microphone_enabled: Option<bool>,
    pub system_audio_enabled: Option<bool>,
    pub app_audio_excluded: Option<bool>,
    pub microphone_device: Option<Option<String>>,
}

impl CaptureSettingsUpdate {
    /// Update that only toggles the microphone.
    pub fn microphone(enabled: bool) -> Self {
        Self {
            microphone_enabled: Some(enabled),
            ..Default::default()
        }
    }

    /// Update that only toggles system audio.
    pub fn system_audio(enabled: bool) -> Self {
        Self {
            system_audio_enabled: Some(enabled),
            ..Default::default()
        }
    }

    /// Update that only toggles app audio exclusion.
    pub fn app_audio_excluded(excluded: bool) -> Self {
        Self {
            app_audio_excluded: Some(excluded),
            ..Default::default()
        }
    }

    /// Update that only selects a microphone device.
    pub fn microphone_device(device: Option<String>) -> Self {
        Self {
            microphone_device: Some(device),
            ..Default::default()
        }
    }

    /// Apply this update to the given settings.
    pub fn apply_to(&self, settings: &mut CaptureSettings) {
        if let Some(enabled) = self.microphone_enabled {
            settings.microphone_enabled = enabled;
        }
        if let Some(enabled) = self.system_audio_enabled {
            settings.system_audio_enabled = enabled;
        }
        if let Some(excluded) = self.app_audio_excluded {
            settings.app_audio_excluded = excluded;
        }
        if let Some(ref device) = self.microphone_device {
            settings.microphone_device = device.clone();
        }
    }
}

/// The display being captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    /// Display identifier.
    pub display_id: u32,

    /// Logical width in points.
    pub width: u32,

    /// Logical height in points.
    pub height: u32,

    /// Backing scale factor (pixels per point).
    pub scale_factor: u32,

    /// Capture frame rate.
    pub frame_rate: u32,

    /// Depth of the capture subsystem's frame queue.
    pub queue_depth: u32,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            display_id: 0,
            width: 1920,
            height: 1080,
            scale_factor: 1,
            frame_rate: 60,
            queue_depth: 5,
        }
    }
}

/// Encoder bitrate control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitrateMode {
    Constant,
    Average,
    Variable,
}

/// H.264 profile and level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileLevel {
    BaselineAutoLevel,
    MainAutoLevel,
    HighAutoLevel,
}

impl ProfileLevel {
    /// Profile name as reported in stream metadata.
    pub fn profile_name(self) -> &'static str {
        match self {
            Self::BaselineAutoLevel => "baseline",
            Self::MainAutoLevel => "main",
            Self::HighAutoLevel => "high",
        }
    }
}

/// Fixed codec parameters handed to the publisher. Not negotiated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoCodecSettings {
    /// Target width in pixels.
    pub width: u32,

    /// Target height in pixels.
    pub height: u32,

    /// Target bitrate in bits per second.
    pub bitrate_bps: u32,

    /// Bitrate control mode.
    pub bitrate_mode: BitrateMode,

    /// Profile/level.
    pub profile_level: ProfileLevel,

    /// Allow B-frames.
    pub allow_frame_reordering: bool,
}

impl VideoCodecSettings {
    /// Bitrate in kbps, as used in stream metadata.
    pub fn bitrate_kbps(&self) -> u32 {
        self.bitrate_bps / 1000
    }
}

impl Default for VideoCodecSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            bitrate_bps: 6_000 * 1000,
            bitrate_mode: BitrateMode::Constant,
            profile_level: ProfileLevel::HighAutoLevel,
            allow_frame_reordering: false,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Identifier of this application, used to exclude its own windows/audio.
    pub app_id: String,

    /// Display capture geometry.
    pub display: DisplaySettings,

    /// Initial capture toggles.
    pub capture: CaptureSettings,

    /// Codec parameters applied before publishing.
    pub codec: VideoCodecSettings,

    /// Default publish target.
    pub target: Option<PublishTarget>,

    /// Timeout for connect and publish requests, in milliseconds.
    pub request_timeout_ms: u64,

    /// Timeout for closing the connection, in milliseconds.
    pub close_timeout_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            app_id: "broadcaster".to_string(),
            display: DisplaySettings::default(),
            capture: CaptureSettings::default(),
            codec: VideoCodecSettings::default(),
            target: None,
            request_timeout_ms: 5000,
            close_timeout_ms: 5000,
        }
    }
}

/// Per-track sample counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetrics {
    /// Samples forwarded to the track channel.
    pub accepted: u64,

    /// Samples rejected by validation (invalid, incomplete frames).
    pub rejected: u64,

    /// Pending samples replaced before the consumer took them.
    pub replaced: u64,
}

/// Real-time stream metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamMetrics {
    pub screen: TrackMetrics,
    pub microphone: TrackMetrics,
    pub system_audio: TrackMetrics,

    /// Samples the mixer forwarded to the publish path.
    pub mixer_appended: u64,

    /// Samples the mixer discarded while stopped.
    pub mixer_discarded: u64,

    /// Packets handed to the network.
    pub packets_sent: u64,

    /// Packets dropped because the network queue was full.
    pub packets_dropped: u64,

    /// Broadcast uptime in seconds.
    pub uptime_seconds: u64,
}
