//! Synthetic capture source for running the engine without capture hardware.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, instrument};

use crate::config::{CaptureConfiguration, ContentFilter, StreamConfiguration};
use crate::error::CaptureError;
use crate::sample::{CaptureTimestamp, Sample, Track};
use crate::source::{CaptureObserver, SampleHandler};
use crate::{CaptureResult, CaptureSource};

/// Audio sample rate in Hz.
pub const SAMPLE_RATE: u32 = 48000;

/// Number of audio channels.
pub const CHANNELS: u16 = 2;

/// Samples per audio chunk (10ms at 48kHz).
pub const SAMPLES_PER_CHUNK: usize = 480;

type Handlers = Arc<RwLock<HashMap<Track, Arc<dyn SampleHandler>>>>;
type SharedConfiguration = Arc<RwLock<Option<Arc<CaptureConfiguration>>>>;
type SharedObserver = Arc<RwLock<Option<Arc<dyn CaptureObserver>>>>;

/// Produces a flat grey NV12 picture and silent audio on one thread per track.
///
/// Configuration updates take effect on the next tick of each producer.
pub struct TestPatternSource {
    handlers: Handlers,
    observer: SharedObserver,
    configuration: SharedConfiguration,
    threads: Mutex<Vec<JoinHandle<()>>>,
    should_stop: Arc<AtomicBool>,
    is_active: AtomicBool,
}

impl TestPatternSource {
    /// Create an idle source.
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            observer: Arc::new(RwLock::new(None)),
            configuration: Arc::new(RwLock::new(None)),
            threads: Mutex::new(Vec::new()),
            should_stop: Arc::new(AtomicBool::new(false)),
            is_active: AtomicBool::new(false),
        }
    }

    /// The configuration currently in effect.
    pub fn configuration(&self) -> Option<Arc<CaptureConfiguration>> {
        self.configuration.read().clone()
    }

    fn spawn_producer(&self, track: Track, start_time: Instant) -> CaptureResult<JoinHandle<()>> {
        let producer = Producer {
            track,
            handlers: Arc::clone(&self.handlers),
            observer: Arc::clone(&self.observer),
            configuration: Arc::clone(&self.configuration),
            should_stop: Arc::clone(&self.should_stop),
            start_time,
        };

        let handle = thread::Builder::new()
            .name(format!("capture-{}", track.name()))
            .spawn(move || producer.run())?;

        Ok(handle)
    }

    fn replace_configuration(
        &self,
        update: impl FnOnce(&CaptureConfiguration) -> CaptureConfiguration,
    ) -> CaptureResult<()> {
        if !self.is_active.load(Ordering::SeqCst) {
            return Err(CaptureError::NotStarted);
        }

        let mut current = self.configuration.write();
        let next = match current.as_deref() {
            Some(config) => update(config),
            None => return Err(CaptureError::NotStarted),
        };
        *current = Some(Arc::new(next));
        Ok(())
    }
}

impl Default for TestPatternSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureSource for TestPatternSource {
    fn add_output(&self, track: Track, handler: Arc<dyn SampleHandler>) -> CaptureResult<()> {
        self.handlers.write().insert(track, handler);
        Ok(())
    }

    fn set_observer(&self, observer: Arc<dyn CaptureObserver>) {
        *self.observer.write() = Some(observer);
    }

    #[instrument(name = "test_pattern_start", skip_all)]
    async fn start_capture(&self, configuration: &CaptureConfiguration) -> CaptureResult<()> {
        if self.is_active.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyStarted);
        }

        info!(
            width = configuration.stream.width,
            height = configuration.stream.height,
            fps = configuration.stream.frame_rate,
            "Starting test pattern capture"
        );

        *self.configuration.write() = Some(Arc::new(configuration.clone()));
        self.should_stop.store(false, Ordering::SeqCst);

        let start_time = Instant::now();
        let mut threads = self.threads.lock();
        for track in Track::ALL {
            match self.spawn_producer(track, start_time) {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    self.should_stop.store(true, Ordering::SeqCst);
                    for handle in threads.drain(..) {
                        let _ = handle.join();
                    }
                    self.is_active.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    async fn update_content_filter(&self, filter: ContentFilter) -> CaptureResult<()> {
        debug!(?filter, "Updating content filter");
        self.replace_configuration(|current| CaptureConfiguration {
            filter,
            stream: current.stream.clone(),
        })
    }

    async fn update_configuration(&self, configuration: StreamConfiguration) -> CaptureResult<()> {
        debug!(?configuration, "Updating stream configuration");
        self.replace_configuration(|current| CaptureConfiguration {
            filter: current.filter.clone(),
            stream: configuration,
        })
    }

    #[instrument(name = "test_pattern_stop", skip_all)]
    async fn stop_capture(&self) -> CaptureResult<()> {
        if !self.is_active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Stopping test pattern capture");
        self.should_stop.store(true, Ordering::SeqCst);

        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        tokio::task::spawn_blocking(move || {
            for handle in threads {
                if handle.join().is_err() {
                    error!("Producer thread panicked");
                }
            }
        })
        .await
        .map_err(|e| CaptureError::Stopped(e.to_string()))?;

        info!("Test pattern capture stopped");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }
}

impl Drop for TestPatternSource {
    fn drop(&mut self) {
        self.should_stop.store(true, Ordering::SeqCst);
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

/// State owned by one producer thread.
struct Producer {
    track: Track,
    handlers: Handlers,
    observer: SharedObserver,
    configuration: SharedConfiguration,
    should_stop: Arc<AtomicBool>,
    start_time: Instant,
}

impl Producer {
    fn run(self) {
        debug!(track = %self.track, "Producer thread started");

        let mut sequence = 0u64;
        let mut frame: Option<(u32, u32, Bytes)> = None;
        let silence = Bytes::from(vec![0u8; SAMPLES_PER_CHUNK * CHANNELS as usize * 4]);

        while !self.should_stop.load(Ordering::SeqCst) {
            let tick_start = Instant::now();

            let Some(config) = self.configuration.read().clone() else {
                thread::sleep(Duration::from_millis(10));
                continue;
            };
            let stream = &config.stream;

            let interval = match self.track {
                Track::Screen => {
                    if stream.width == 0 || stream.height == 0 || stream.frame_rate == 0 {
                        self.stop_with_error(CaptureError::Stopped(format!(
                            "invalid screen geometry {}x{}@{}",
                            stream.width, stream.height, stream.frame_rate
                        )));
                        break;
                    }
                    Duration::from_nanos(1_000_000_000 / u64::from(stream.frame_rate))
                }
                _ => Duration::from_millis(10),
            };

            let enabled = match self.track {
                Track::Screen => true,
                Track::Microphone => stream.captures_microphone,
                Track::SystemAudio => stream.captures_audio,
            };

            let handler = self.handlers.read().get(&self.track).cloned();
            if let (true, Some(handler)) = (enabled, handler) {
                let timestamp = CaptureTimestamp::now(self.start_time);
                let sample = match self.track {
                    Track::Screen => {
                        let (width, height) = (stream.width, stream.height);
                        let data = match frame {
                            Some((w, h, ref data)) if w == width && h == height => data.clone(),
                            _ => {
                                let data = Bytes::from(vec![0x80u8; nv12_buffer_size(width, height)]);
                                frame = Some((width, height, data.clone()));
                                data
                            }
                        };
                        Sample::video(data, width, height, timestamp, sequence)
                    }
                    track => Sample::audio(
                        track,
                        silence.clone(),
                        SAMPLE_RATE,
                        CHANNELS,
                        timestamp,
                        sequence,
                    ),
                };

                handler.on_sample(sample);
                sequence += 1;
            }

            let elapsed = tick_start.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }

        debug!(track = %self.track, produced = sequence, "Producer thread exiting");
    }

    fn stop_with_error(&self, error: CaptureError) {
        error!(track = %self.track, "Stream stopped with error: {}", error);
        if let Some(observer) = self.observer.read().clone() {
            observer.did_stop_with_error(&error);
        }
    }
}

/// Expected NV12 buffer size for given dimensions.
pub fn nv12_buffer_size(width: u32, height: u32) -> usize {
    // NV12: Y plane (width * height) + UV plane (width * height / 2)
    let y_size = (width * height) as usize;
    y_size + y_size / 2
}
