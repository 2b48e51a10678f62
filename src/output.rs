//! Output sink trait and the completion path back into the relay.

use std::sync::Arc;
use tracing::trace;

use crate::Result;
use crate::error::SubmissionError;
use crate::metrics::Metrics;
use crate::types::{
    AudioFormat, AudioPacket, ClockDomain, CompletionResult, DisplayMode, PixelFormat,
    ScheduleRequest, TimeScale, TimeValue, VideoFrame,
};

/// Trait for playout devices
///
/// The sink is shared between the scheduler, which submits from the capture
/// thread, and the session's stop path, so every method takes `&self`.
/// Submissions must return promptly; once [`stop`](Self::stop) has been called
/// they must fail with [`SubmissionError::Stopped`] rather than panic.
pub trait OutputSink: Send + Sync + 'static {
    /// Configure video and audio output and register the completion callback.
    ///
    /// Returns the clock domain schedule times must be expressed in.
    fn enable(
        &self,
        mode: DisplayMode,
        pixel_format: PixelFormat,
        audio: &AudioFormat,
        completions: CompletionNotifier,
    ) -> Result<ClockDomain>;

    /// Begin scheduled playback at `start_time`.
    fn start_playback(&self, start_time: TimeValue, time_scale: TimeScale) -> Result<()>;

    /// Queue a frame for display. The sink owns the frame from here on and
    /// returns it through [`CompletionNotifier::frame_completed`].
    fn schedule_video(&self, request: ScheduleRequest<VideoFrame>) -> Result<(), SubmissionError>;

    /// Append samples to the continuous audio stream.
    fn schedule_audio(&self, request: ScheduleRequest<AudioPacket>) -> Result<(), SubmissionError>;

    /// Stop playback and disable outputs. Must be idempotent.
    fn stop(&self);
}

/// Handle the output uses to report finished frames.
///
/// Cheap to clone and safe to call from the output's own thread.
#[derive(Debug, Clone)]
pub struct CompletionNotifier {
    metrics: Arc<Metrics>,
}

impl CompletionNotifier {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }

    /// Record the outcome and release the frame.
    pub fn frame_completed(&self, frame: VideoFrame, result: CompletionResult) {
        trace!(sequence = frame.sequence, ?result, "Frame completed");
        self.metrics.record_completion(result);
        drop(frame);
    }
}
