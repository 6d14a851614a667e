//! Immutable capture configuration snapshots handed to the capture subsystem.

use broadcaster_ipc::{CaptureSettings, DisplaySettings};

/// What the screen track includes or leaves out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFilter {
    /// Display being captured.
    pub display_id: u32,

    /// Application identifiers whose windows are excluded.
    pub excluded_applications: Vec<String>,
}

/// Per-stream capture parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfiguration {
    /// Output width in pixels.
    pub width: u32,

    /// Output height in pixels.
    pub height: u32,

    /// Frames per second.
    pub frame_rate: u32,

    /// Depth of the capture subsystem's frame queue.
    pub queue_depth: u32,

    /// Deliver the system audio track.
    pub captures_audio: bool,

    /// Leave this process's own audio out of the system audio track.
    pub excludes_current_process_audio: bool,

    /// Deliver the microphone track.
    pub captures_microphone: bool,

    /// Microphone device, only set while the microphone is captured.
    pub microphone_device_id: Option<String>,
}

/// A complete capture configuration. Replaced as a whole, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfiguration {
    pub filter: ContentFilter,
    pub stream: StreamConfiguration,
}

impl CaptureConfiguration {
    /// Build a snapshot from user settings and display geometry.
    pub fn from_settings(
        settings: &CaptureSettings,
        display: &DisplaySettings,
        app_id: &str,
    ) -> Self {
        let excluded_applications = if settings.exclude_app_from_stream {
            vec![app_id.to_string()]
        } else {
            Vec::new()
        };

        let microphone_device_id = if settings.microphone_enabled {
            settings.microphone_device.clone()
        } else {
            None
        };

        Self {
            filter: ContentFilter {
                display_id: display.display_id,
                excluded_applications,
            },
            stream: StreamConfiguration {
                width: display.width * display.scale_factor,
                height: display.height * display.scale_factor,
                frame_rate: display.frame_rate,
                queue_depth: display.queue_depth,
                captures_audio: settings.system_audio_enabled,
                excludes_current_process_audio: settings.app_audio_excluded,
                captures_microphone: settings.microphone_enabled,
                microphone_device_id,
            },
        }
    }

    /// Returns true if the application id is excluded from the screen track.
    pub fn excludes_application(&self, app_id: &str) -> bool {
        self.filter
            .excluded_applications
            .iter()
            .any(|id| id == app_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_from_default_settings() {
        let display = DisplaySettings {
            width: 1512,
            height: 982,
            scale_factor: 2,
            ..Default::default()
        };

        let config = CaptureConfiguration::from_settings(&CaptureSettings::default(), &display, "app");

        assert!(config.excludes_application("app"));
        assert_eq!(config.stream.width, 3024);
        assert_eq!(config.stream.height, 1964);
        assert_eq!(config.stream.frame_rate, 60);
        assert_eq!(config.stream.queue_depth, 5);
        assert!(config.stream.captures_audio);
        assert!(config.stream.excludes_current_process_audio);
        assert!(!config.stream.captures_microphone);
    }

    #[test]
    fn test_microphone_device_only_set_when_enabled() {
        let mut settings = CaptureSettings {
            microphone_device: Some("usb-mic".to_string()),
            ..Default::default()
        };
        let display = DisplaySettings::default();

        let off = CaptureConfiguration::from_settings(&settings, &display, "app");
        assert_eq!(off.stream.microphone_device_id, None);

        settings.microphone_enabled = true;
        let on = CaptureConfiguration::from_settings(&settings, &display, "app");
        assert_eq!(on.stream.microphone_device_id.as_deref(), Some("usb-mic"));
        assert_eq!(off.filter, on.filter);
    }

    #[test]
    fn test_filter_without_self_exclusion() {
        let settings = CaptureSettings {
            exclude_app_from_stream: false,
            ..Default::default()
        };

        let config = CaptureConfiguration::from_settings(&settings, &DisplaySettings::default(), "app");
        assert!(config.filter.excluded_applications.is_empty());
    }
}
