//! One consumer task per track, draining its channel into the mixer.

use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use broadcaster_capture::{SampleReceiver, Track};

use crate::mixer::MediaMixer;

/// Handles of the running track consumers.
///
/// Consumers hold only a weak reference to the mixer, so they never keep it
/// alive; dropping this aborts them.
#[derive(Default)]
pub struct TrackConsumers {
    handles: Vec<(Track, JoinHandle<()>)>,
}

impl TrackConsumers {
    /// Spawn a consumer for each receiver on the current runtime.
    pub fn spawn(&mut self, receivers: Vec<(Track, SampleReceiver)>, mixer: &Arc<MediaMixer>) {
        for (track, receiver) in receivers {
            let handle = tokio::spawn(consume(track, receiver, Arc::downgrade(mixer)));
            self.handles.push((track, handle));
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every consumer. A pending receive is dropped immediately.
    pub fn abort_all(&mut self) {
        for (track, handle) in self.handles.drain(..) {
            debug!(track = %track, "Cancelling track consumer");
            handle.abort();
        }
    }
}

impl Drop for TrackConsumers {
    fn drop(&mut self) {
        self.abort_all();
    }
}

async fn consume(track: Track, mut receiver: SampleReceiver, mixer: Weak<MediaMixer>) {
    debug!(track = %track, "Track consumer started");

    while let Some(sample) = receiver.receive().await {
        let Some(mixer) = mixer.upgrade() else {
            break;
        };
        if !mixer.append(sample) {
            trace!(track = %track, "Sample discarded by stopped mixer");
        }
    }

    debug!(track = %track, "Track consumer finished");
}
