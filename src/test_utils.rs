//! Test utilities: unit constructors, a recording output and a scripted capture.
//!
//! Compiled for unit tests and for the `benchmark` feature so integration
//! tests and benches can drive the relay without hardware.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::capture::{CaptureEvent, CaptureSource};
use crate::error::SubmissionError;
use crate::output::{CompletionNotifier, OutputSink};
use crate::types::{
    AudioFormat, AudioPacket, ClockDomain, CompletionResult, DisplayMode, MediaBuffer,
    PixelFormat, ScheduleRequest, TimeScale, TimeValue, VideoFrame,
};
use crate::{RelayError, Result};

/// Frame duration used by the helpers (29.97 fps in a 30000 scale).
pub const FRAME_DURATION: TimeValue = 1001;

/// Time scale used by the helpers.
pub fn test_scale() -> TimeScale {
    TimeScale::new(30_000).unwrap_or(TimeScale::NANOS)
}

/// Video frame `sequence` of a 29.97 fps stream starting at zero.
pub fn video_frame(sequence: u64) -> VideoFrame {
    let timestamp = sequence as TimeValue * FRAME_DURATION;
    VideoFrame::new(MediaBuffer::new(sequence.to_le_bytes()), timestamp, FRAME_DURATION, sequence)
}

/// Audio packet that accompanies video frame `sequence` at 48 kHz stereo.
pub fn audio_packet(sequence: u64) -> AudioPacket {
    let format = AudioFormat::default();
    let start = sequence as TimeValue * FRAME_DURATION;
    let sample_frames = format.sample_frames_between(start, start + FRAME_DURATION, test_scale());
    let bytes = vec![0u8; sample_frames as usize * format.bytes_per_sample_frame()];
    AudioPacket::new(MediaBuffer::new(bytes), sample_frames, start)
}

/// What a [`RecordingOutput`] saw for one video submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledVideo {
    pub sequence: u64,
    pub schedule_time: TimeValue,
    pub schedule_duration: TimeValue,
    pub time_scale: TimeScale,
}

/// What a [`RecordingOutput`] saw for one audio submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledAudio {
    pub schedule_time: TimeValue,
    pub sample_frames: u32,
}

/// Output sink that records submissions and completes frames immediately.
#[derive(Debug, Default)]
pub struct RecordingOutput {
    fail_every: Option<u64>,
    submissions: AtomicU64,
    video: Mutex<Vec<ScheduledVideo>>,
    audio: Mutex<Vec<ScheduledAudio>>,
    completions: Mutex<Option<CompletionNotifier>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every submission.
    pub fn failing() -> Self {
        Self::failing_every(1)
    }

    /// Refuse every `n`-th submission.
    pub fn failing_every(n: u64) -> Self {
        Self { fail_every: Some(n.max(1)), ..Self::default() }
    }

    pub fn scheduled_video(&self) -> Vec<ScheduledVideo> {
        self.video.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn scheduled_audio(&self) -> Vec<ScheduledAudio> {
        self.audio.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn video_count(&self) -> usize {
        self.scheduled_video().len()
    }

    fn should_fail(&self) -> bool {
        let n = self.submissions.fetch_add(1, Ordering::Relaxed) + 1;
        self.fail_every.is_some_and(|every| n % every == 0)
    }
}

impl OutputSink for RecordingOutput {
    fn enable(
        &self,
        mode: DisplayMode,
        _pixel_format: PixelFormat,
        audio: &AudioFormat,
        completions: CompletionNotifier,
    ) -> Result<ClockDomain> {
        audio.validate("recording output audio")?;
        if let Ok(mut slot) = self.completions.lock() {
            *slot = Some(completions);
        }
        Ok(ClockDomain::new(mode.frame_rate().1))
    }

    fn start_playback(&self, _start_time: TimeValue, _time_scale: TimeScale) -> Result<()> {
        Ok(())
    }

    fn schedule_video(&self, request: ScheduleRequest<VideoFrame>) -> Result<(), SubmissionError> {
        if self.should_fail() {
            return Err(SubmissionError::Rejected { reason: "injected failure".to_string() });
        }

        let (frame, schedule_time, schedule_duration, time_scale) = request.into_parts();
        if let Ok(mut video) = self.video.lock() {
            video.push(ScheduledVideo {
                sequence: frame.sequence,
                schedule_time,
                schedule_duration,
                time_scale,
            });
        }

        let notifier = self.completions.lock().ok().and_then(|slot| slot.clone());
        if let Some(notifier) = notifier {
            notifier.frame_completed(frame, CompletionResult::Completed);
        }
        Ok(())
    }

    fn schedule_audio(&self, request: ScheduleRequest<AudioPacket>) -> Result<(), SubmissionError> {
        if self.should_fail() {
            return Err(SubmissionError::Rejected { reason: "injected failure".to_string() });
        }

        let (packet, schedule_time, _, _) = request.into_parts();
        if let Ok(mut audio) = self.audio.lock() {
            audio.push(ScheduledAudio { schedule_time, sample_frames: packet.sample_frames });
        }
        Ok(())
    }

    fn stop(&self) {}
}

/// Capture source that replays a fixed list of events, then ends.
#[derive(Debug)]
pub struct ScriptedCapture {
    events: VecDeque<Result<CaptureEvent>>,
    stopped: bool,
}

impl ScriptedCapture {
    pub fn new(events: impl IntoIterator<Item = CaptureEvent>) -> Self {
        Self { events: events.into_iter().map(Ok).collect(), stopped: false }
    }

    /// Script that interleaves errors with events.
    pub fn with_results(events: impl IntoIterator<Item = Result<CaptureEvent>>) -> Self {
        Self { events: events.into_iter().collect(), stopped: false }
    }

    /// `count` frames with matching audio; `gaps` lists sequences delivered
    /// as absent frames.
    pub fn frames(count: u64, gaps: &[u64]) -> Self {
        let events = (0..count).flat_map(|i| {
            let frame = (!gaps.contains(&i)).then(|| video_frame(i));
            [
                CaptureEvent::VideoFrameArrived(frame),
                CaptureEvent::AudioPacketArrived(Some(audio_packet(i))),
            ]
        });
        Self::new(events)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

#[async_trait::async_trait]
impl CaptureSource for ScriptedCapture {
    fn enable(
        &mut self,
        mode: DisplayMode,
        _pixel_format: PixelFormat,
        audio: &AudioFormat,
    ) -> Result<ClockDomain> {
        audio.validate("scripted capture audio")?;
        Ok(ClockDomain::new(mode.frame_rate().1))
    }

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<CaptureEvent>> {
        if self.stopped {
            return Ok(None);
        }
        tokio::task::yield_now().await;
        match self.events.pop_front() {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

/// An error the driver should treat as transient.
pub fn transient_capture_error() -> RelayError {
    RelayError::Timeout { duration: crate::driver::CAPTURE_TIMEOUT }
}
