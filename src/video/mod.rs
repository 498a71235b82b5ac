//! # Video Module
//!
//! Drives one capture session per producer run and emits a `Video` event for
//! every encoded frame.
//!
//! The encoder is polled at 0.4 of a frame period and hands back every frame
//! written since the previous poll, so a late poll delays events but never
//! loses them. A frame index that was already reported is skipped.

pub mod files;
pub mod rpicam;

pub use files::{FileNaming, SessionFiles};
pub use rpicam::RpicamEncoder;

use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::supervisor::ProducerContext;
use crate::telemetry::event::{FrameType, VideoFrame};
use crate::telemetry::{Reading, Source, TelemetryEvent};

/// Fraction of a frame period between two encoder polls
pub const POLL_FRACTION: f64 = 0.4;

/// Encoder-reported metadata for one encoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub index: u64,
    pub frame_type: FrameType,
    /// Presentation timestamp in microseconds
    pub timestamp_us: Option<u64>,
    pub complete: bool,
    /// Stream size in bytes once this frame was written
    pub position: u64,
}

/// Capture session parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureParams {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// Bits per second; 0 leaves the encoder default
    pub bitrate: u32,
    pub motion_vectors: bool,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            framerate: 30,
            bitrate: 25_000_000,
            motion_vectors: false,
        }
    }
}

impl CaptureParams {
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.framerate.max(1)))
    }

    /// Wait between encoder polls, always shorter than one frame
    pub fn poll_interval(&self) -> Duration {
        self.frame_period().mul_f64(POLL_FRACTION)
    }
}

/// A running (or startable) video encoder
#[cfg_attr(test, mockall::automock)]
pub trait VideoEncoder: Send {
    /// Begin writing the stream into `files`
    fn start_recording(&mut self, files: &SessionFiles, params: &CaptureParams) -> Result<()>;

    /// Frames written since the previous call, oldest first
    ///
    /// Empty before the first frame and whenever nothing new was encoded.
    ///
    /// # Errors
    ///
    /// `EncoderStopped` once the encoder is gone; anything else is a one-off fault.
    fn new_frames(&mut self) -> Result<Vec<FrameDescriptor>>;

    /// Finalize the stream and release the camera
    fn stop_recording(&mut self) -> Result<()>;
}

/// Video producer: one capture session per run
pub struct VideoProducer<E> {
    encoder: E,
    params: CaptureParams,
    output_dir: PathBuf,
    naming: FileNaming,
}

impl<E: VideoEncoder> VideoProducer<E> {
    /// Create a producer; nothing is allocated or started until `run`
    ///
    /// # Arguments
    ///
    /// * `encoder` - Encoder that writes the stream and reports frames
    /// * `params` - Resolution, frame rate and bitrate of the session
    /// * `output_dir` - Directory receiving the numbered session files
    /// * `naming` - Prefix and extensions of those files
    pub fn new(encoder: E, params: CaptureParams, output_dir: impl Into<PathBuf>, naming: FileNaming) -> Self {
        Self {
            encoder,
            params,
            output_dir: output_dir.into(),
            naming,
        }
    }

    /// Record until stop is requested
    ///
    /// The session is finalized on every exit path once it was started.
    ///
    /// # Errors
    ///
    /// File allocation and encoder start failures, `EncoderStopped`, or
    /// `QueueClosed` if the sink went away.
    pub async fn run(mut self, mut ctx: ProducerContext) -> Result<()> {
        // Reserve the next free file index, then start the encoder on it
        let files = SessionFiles::allocate(&self.output_dir, &self.naming)?;
        self.encoder.start_recording(&files, &self.params)?;
        info!(
            "Recording {}x{} @ {}fps to {}",
            self.params.width,
            self.params.height,
            self.params.framerate,
            files.video().display()
        );

        let result = self.record(&files, &mut ctx).await;

        // Finalize whatever ended the loop
        if let Err(e) = self.encoder.stop_recording() {
            warn!("Failed to finalize {}: {}", files.video().display(), e);
        }
        debug!("Video producer stopped");
        result
    }

    async fn record(&mut self, files: &SessionFiles, ctx: &mut ProducerContext) -> Result<()> {
        let mut ticker = interval(self.params.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_index: Option<u64> = None;

        loop {
            tokio::select! {
                _ = ctx.stop_requested() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let frames = match self.encoder.new_frames() {
                Ok(frames) => frames,
                Err(e) if e.is_transient() => {
                    ctx.fault(Source::Video, &e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            for frame in frames {
                if matches!(last_index, Some(last) if frame.index <= last) {
                    continue;
                }
                last_index = Some(frame.index);

                let reading = Reading::Video(VideoFrame {
                    file_index: files.index(),
                    index: frame.index,
                    frame_type: frame.frame_type,
                    frame_timestamp_us: frame.timestamp_us,
                    complete: frame.complete,
                    position: frame.position,
                });
                ctx.deliver(TelemetryEvent::now(reading)).await?;
            }
        }
    }
}
