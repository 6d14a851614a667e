//! Capture boundary and per-track sample plumbing.
//!
//! This crate defines the sample model, the interface to the platform
//! capture subsystem, and the pieces that carry samples from capture
//! callbacks to the engine: one [`CaptureTrackAdapter`] and one
//! single-slot channel per track.

mod adapter;
mod channel;
mod config;
mod error;
mod sample;
mod source;
mod synthetic;

pub use adapter::CaptureTrackAdapter;
pub use channel::{sample_channel, SampleReceiver, SampleSender};
pub use config::{CaptureConfiguration, ContentFilter, StreamConfiguration};
pub use error::CaptureError;
pub use sample::{CaptureTimestamp, FrameStatus, Sample, SampleFormat, Track};
pub use source::{CaptureObserver, CaptureSource, SampleHandler};
pub use synthetic::{nv12_buffer_size, TestPatternSource, CHANNELS, SAMPLE_RATE, SAMPLES_PER_CHUNK};

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;
