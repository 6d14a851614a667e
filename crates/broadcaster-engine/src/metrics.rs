//! Metrics collection and reporting.

use std::time::{Duration, Instant};

use parking_lot::RwLock;

use broadcaster_capture::{CaptureTrackAdapter, Track};
use broadcaster_ipc::StreamMetrics;

use crate::mixer::MixerStats;
use crate::publish::PublishStats;

/// Default interval between metrics reports.
pub const METRICS_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Tracks broadcast uptime and report pacing, and assembles
/// [`StreamMetrics`] snapshots from the pipeline's counters.
pub struct MetricsCollector {
    start_time: RwLock<Option<Instant>>,
    last_report_time: RwLock<Instant>,
    report_interval: Duration,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new(report_interval: Duration) -> Self {
        Self {
            start_time: RwLock::new(None),
            last_report_time: RwLock::new(Instant::now()),
            report_interval,
        }
    }

    /// Start metrics collection.
    pub fn start(&self) {
        *self.start_time.write() = Some(Instant::now());
        *self.last_report_time.write() = Instant::now();
    }

    /// Stop metrics collection.
    pub fn stop(&self) {
        *self.start_time.write() = None;
    }

    pub fn uptime(&self) -> Duration {
        self.start_time
            .read()
            .map(|s| s.elapsed())
            .unwrap_or_default()
    }

    /// Returns true once per report interval.
    pub fn should_report(&self) -> bool {
        self.last_report_time.read().elapsed() >= self.report_interval
    }

    /// Update last report time.
    pub fn mark_reported(&self) {
        *self.last_report_time.write() = Instant::now();
    }

    /// Get current metrics snapshot.
    pub fn snapshot<'a>(
        &self,
        adapters: impl IntoIterator<Item = &'a CaptureTrackAdapter>,
        mixer: MixerStats,
        publish: Option<PublishStats>,
    ) -> StreamMetrics {
        let mut metrics = StreamMetrics::default();

        for adapter in adapters {
            let track = adapter.metrics();
            match adapter.track() {
                Track::Screen => metrics.screen = track,
                Track::Microphone => metrics.microphone = track,
                Track::SystemAudio => metrics.system_audio = track,
            }
        }

        metrics.mixer_appended = mixer.appended;
        metrics.mixer_discarded = mixer.discarded;

        if let Some(publish) = publish {
            metrics.packets_sent = publish.transport.packets_sent;
            metrics.packets_dropped = publish.packets_dropped;
        }

        metrics.uptime_seconds = self.uptime().as_secs();
        metrics
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(METRICS_REPORT_INTERVAL)
    }
}
