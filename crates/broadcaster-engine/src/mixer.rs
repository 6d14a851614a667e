//! The shared aggregation point for all tracks.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument, trace};

use broadcaster_capture::Sample;

/// Receives the mixer's output while it is running.
///
/// Called with the mixer's lock held; implementations must not block.
pub trait MediaSink: Send + Sync {
    fn append(&self, sample: &Sample);
}

/// Mixer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MixerStats {
    /// Samples forwarded to the outputs.
    pub appended: u64,
    /// Samples discarded while stopped.
    pub discarded: u64,
    /// Stopped to Running transitions.
    pub starts: u64,
    /// Running to Stopped transitions.
    pub stops: u64,
}

struct MixerInner {
    running: bool,
    outputs: Vec<Arc<dyn MediaSink>>,
    stats: MixerStats,
    frame_rate: u32,
    /// Presentation time of the first sample since the last start.
    timeline_origin: Option<u64>,
}

/// Merges samples from every track consumer into one timeline.
///
/// All appends go through a single lock, so concurrent consumers observe a
/// deterministic order and a `set_running(false)` is never interleaved with
/// an in-progress append.
pub struct MediaMixer {
    inner: Mutex<MixerInner>,
}

impl MediaMixer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MixerInner {
                running: false,
                outputs: Vec::new(),
                stats: MixerStats::default(),
                frame_rate: 0,
                timeline_origin: None,
            }),
        }
    }

    /// Gate the output. Safe to call at any time and repeatedly.
    #[instrument(name = "mixer_set_running", skip(self))]
    pub fn set_running(&self, running: bool) {
        let mut inner = self.inner.lock();
        if inner.running == running {
            return;
        }

        inner.running = running;
        if running {
            inner.stats.starts += 1;
            inner.timeline_origin = None;
        } else {
            inner.stats.stops += 1;
        }
        debug!(running, outputs = inner.outputs.len(), "Mixer state changed");
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    /// Forward a sample to every output. Returns false if it was discarded
    /// because the mixer is stopped.
    pub fn append(&self, mut sample: Sample) -> bool {
        let mut inner = self.inner.lock();
        if !inner.running {
            inner.stats.discarded += 1;
            trace!(track = %sample.track, "Mixer stopped, discarding sample");
            return false;
        }

        let origin = *inner
            .timeline_origin
            .get_or_insert(sample.timestamp.pts_100ns);
        sample.timestamp.pts_100ns = sample.timestamp.pts_100ns.saturating_sub(origin);

        for output in &inner.outputs {
            output.append(&sample);
        }
        inner.stats.appended += 1;
        true
    }

    /// Register an output. Registering the same sink twice has no effect.
    pub fn add_output(&self, output: Arc<dyn MediaSink>) {
        let mut inner = self.inner.lock();
        if inner.outputs.iter().any(|o| same_sink(o, &output)) {
            return;
        }
        inner.outputs.push(output);
    }

    /// Detach an output. Returns true if it was registered.
    pub fn remove_output(&self, output: &Arc<dyn MediaSink>) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.outputs.len();
        inner.outputs.retain(|o| !same_sink(o, output));
        inner.outputs.len() != before
    }

    pub fn output_count(&self) -> usize {
        self.inner.lock().outputs.len()
    }

    pub fn set_frame_rate(&self, frame_rate: u32) {
        self.inner.lock().frame_rate = frame_rate;
    }

    pub fn frame_rate(&self) -> u32 {
        self.inner.lock().frame_rate
    }

    pub fn stats(&self) -> MixerStats {
        self.inner.lock().stats
    }
}

impl Default for MediaMixer {
    fn default() -> Self {
        Self::new()
    }
}

fn same_sink(a: &Arc<dyn MediaSink>, b: &Arc<dyn MediaSink>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
