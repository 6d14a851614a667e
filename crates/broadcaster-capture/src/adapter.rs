//! Per-track capture callback adapter.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{trace, warn};

use broadcaster_ipc::TrackMetrics;

use crate::channel::{sample_channel, SampleReceiver, SampleSender};
use crate::sample::{Sample, Track};
use crate::source::SampleHandler;

/// Validates samples delivered by the capture subsystem for one track and
/// forwards the accepted ones into that track's channel.
///
/// The capture subsystem may call different adapters concurrently but never
/// calls the same adapter concurrently. `on_sample` performs no I/O and
/// never blocks.
pub struct CaptureTrackAdapter {
    track: Track,
    sender: SampleSender,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl CaptureTrackAdapter {
    /// Create an adapter and the receiving end of its channel.
    pub fn new(track: Track) -> (Self, SampleReceiver) {
        let (sender, receiver) = sample_channel();

        let adapter = Self {
            track,
            sender,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        };

        (adapter, receiver)
    }

    /// The track this adapter serves.
    pub fn track(&self) -> Track {
        self.track
    }

    /// Validate and forward a sample. Returns true if it was forwarded.
    ///
    /// # Panics
    ///
    /// Panics if a complete screen frame arrives codec-compressed. The
    /// capture subsystem is configured for raw frames, so this is an
    /// upstream contract breach.
    pub fn accept(&self, sample: Sample) -> bool {
        if !sample.valid {
            trace!(track = %self.track, sequence = sample.sequence, "Dropping invalid sample");
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if sample.track != self.track {
            warn!(
                track = %self.track,
                sample_track = %sample.track,
                "Dropping sample delivered to the wrong track"
            );
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if self.track == Track::Screen {
            if !sample.is_complete_frame() {
                trace!(
                    sequence = sample.sequence,
                    status = ?sample.frame_status,
                    "Dropping incomplete screen frame"
                );
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return false;
            }

            assert!(
                !sample.is_compressed(),
                "Compressed sample buffers are not supported"
            );
        }

        self.sender.send(sample);
        self.accepted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Counters for this track.
    pub fn metrics(&self) -> TrackMetrics {
        TrackMetrics {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            replaced: self.sender.replaced(),
        }
    }
}

impl SampleHandler for CaptureTrackAdapter {
    fn on_sample(&self, sample: Sample) {
        self.accept(sample);
    }
}
