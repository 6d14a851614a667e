//! The publish half of one broadcast attempt.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, trace, warn};

use broadcaster_capture::Sample;
use broadcaster_encoder::{EncodedPacket, SampleEncoder};
use broadcaster_ipc::{PublishTarget, VideoCodecSettings};
use broadcaster_transport::{PublishResult, Publisher, TransportError, TransportStatistics};

use crate::error::EngineError;
use crate::mixer::MediaSink;
use crate::EngineResult;

/// Publish lifecycle of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PublishState {
    #[default]
    Idle,
    Requesting,
    Publishing,
    Failed {
        reason: String,
    },
}

impl PublishState {
    pub fn is_publishing(&self) -> bool {
        matches!(self, Self::Publishing)
    }
}

/// Counters for one publish session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub encode_errors: u64,
    pub packets_queued: u64,
    pub packets_dropped: u64,
    pub transport: TransportStatistics,
}

/// Owns the publish handle and codec of one broadcast attempt and acts as
/// the mixer's sink while publishing.
pub struct PublishSession {
    publisher: Arc<dyn Publisher>,
    encoder: Mutex<Box<dyn SampleEncoder>>,
    state: RwLock<PublishState>,
    encode_errors: AtomicU64,
    packets_queued: AtomicU64,
    packets_dropped: AtomicU64,
}

impl PublishSession {
    pub fn new(publisher: Arc<dyn Publisher>, encoder: Box<dyn SampleEncoder>) -> Self {
        Self {
            publisher,
            encoder: Mutex::new(encoder),
            state: RwLock::new(PublishState::Idle),
            encode_errors: AtomicU64::new(0),
            packets_queued: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
        }
    }

    /// Configure codec and publisher. Only valid before [`Self::publish`].
    #[instrument(name = "apply_video_settings", skip_all)]
    pub async fn apply_video_settings(&self, settings: &VideoCodecSettings) -> EngineResult<()> {
        if *self.state.read() != PublishState::Idle {
            return Err(EngineError::SettingsLocked);
        }

        {
            let mut encoder = self.encoder.lock();
            encoder.configure(settings)?;
            debug!(encoder = encoder.name(), "Encoder configured");
        }
        self.publisher.apply_video_settings(settings.clone()).await?;
        Ok(())
    }

    /// Request publishing on the bound connection.
    #[instrument(name = "publish", skip_all, fields(bandwidth_test = target.bandwidth_test))]
    pub async fn publish(&self, target: &PublishTarget) -> EngineResult<PublishResult> {
        self.set_state(PublishState::Requesting);

        match self.publisher.publish(&target.publish_name()).await {
            Ok(result) => {
                self.set_state(PublishState::Publishing);
                info!("Publishing started");
                Ok(result)
            }
            Err(e) => {
                self.set_state(PublishState::Failed {
                    reason: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    pub fn state(&self) -> PublishState {
        self.state.read().clone()
    }

    pub fn is_publishing(&self) -> bool {
        self.state.read().is_publishing()
    }

    pub fn stats(&self) -> PublishStats {
        PublishStats {
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            packets_queued: self.packets_queued.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            transport: self.publisher.statistics(),
        }
    }

    /// Drain packets the codec still holds and queue them on the publisher.
    ///
    /// Called once the mixer no longer feeds this session. Returns the number
    /// of packets drained.
    pub fn finish(&self) -> usize {
        if !self.is_publishing() {
            return 0;
        }

        let packets = match self.encoder.lock().flush() {
            Ok(packets) => packets,
            Err(e) => {
                warn!(error = %e, "Failed to drain encoder");
                self.encode_errors.fetch_add(1, Ordering::Relaxed);
                return 0;
            }
        };

        let drained = packets.len();
        for packet in packets {
            self.queue(packet);
        }
        debug!(packets = drained, "Encoder drained");
        drained
    }

    fn queue(&self, packet: EncodedPacket) {
        match self.publisher.send(packet) {
            Ok(()) => {
                self.packets_queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(TransportError::QueueFull) => {
                trace!("Network queue full, dropping packet");
                self.packets_dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                debug!(error = %e, "Failed to queue packet");
                self.packets_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn set_state(&self, state: PublishState) {
        *self.state.write() = state;
    }
}

impl MediaSink for PublishSession {
    fn append(&self, sample: &Sample) {
        if !self.is_publishing() {
            trace!(track = %sample.track, "Not publishing, ignoring sample");
            return;
        }

        let packet = match self.encoder.lock().encode(sample) {
            Ok(Some(packet)) => packet,
            Ok(None) => return,
            Err(e) => {
                warn!(track = %sample.track, error = %e, "Encode error");
                self.encode_errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        self.queue(packet);
    }
}
