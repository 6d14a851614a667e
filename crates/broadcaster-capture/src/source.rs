//! The capture subsystem boundary.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{CaptureConfiguration, ContentFilter, StreamConfiguration};
use crate::error::CaptureError;
use crate::sample::{Sample, Track};
use crate::CaptureResult;

/// Receives samples for one track from the capture subsystem.
///
/// Called on the subsystem's per-track callback context. Implementations
/// must not block.
pub trait SampleHandler: Send + Sync {
    fn on_sample(&self, sample: Sample);
}

/// Receives lifecycle notifications from the capture subsystem.
pub trait CaptureObserver: Send + Sync {
    /// Capture stopped on its own because of an error.
    fn did_stop_with_error(&self, error: &CaptureError);
}

/// A screen/audio capture backend.
///
/// Filter and configuration are both replaceable while capture runs; each
/// update is independently fallible and, on failure, the previous value
/// stays in effect.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Register the handler for a track. Replaces any previous handler.
    fn add_output(&self, track: Track, handler: Arc<dyn SampleHandler>) -> CaptureResult<()>;

    /// Register the lifecycle observer.
    fn set_observer(&self, observer: Arc<dyn CaptureObserver>);

    /// Start delivering samples.
    async fn start_capture(&self, configuration: &CaptureConfiguration) -> CaptureResult<()>;

    /// Replace the content filter of a running capture.
    async fn update_content_filter(&self, filter: ContentFilter) -> CaptureResult<()>;

    /// Replace the stream configuration of a running capture.
    async fn update_configuration(&self, configuration: StreamConfiguration) -> CaptureResult<()>;

    /// Stop delivering samples.
    async fn stop_capture(&self) -> CaptureResult<()>;

    /// Check if capture is active.
    fn is_active(&self) -> bool;
}
