//! Software playout device

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Duration, Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::SubmissionError;
use crate::output::{CompletionNotifier, OutputSink};
use crate::types::{
    AudioFormat, AudioPacket, ClockDomain, CompletionResult, DisplayMode, PixelFormat,
    ScheduleRequest, TimeScale, TimeValue, VideoFrame, rescale,
};
use crate::{RelayError, Result};

/// Frames the simulated device will hold before refusing submissions.
pub const DEFAULT_BUFFER_DEPTH: usize = 256;

/// Submissions the simulated output refuses on purpose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureInjection {
    #[default]
    None,
    /// Refuse everything
    Always,
    /// Refuse every n-th submission of each kind
    EveryNth(u64),
}

impl FailureInjection {
    fn refuses(self, submission: u64) -> bool {
        match self {
            FailureInjection::None => false,
            FailureInjection::Always => true,
            FailureInjection::EveryNth(n) => n > 0 && submission % n == 0,
        }
    }
}

struct ScheduledFrame {
    frame: VideoFrame,
    end_time: TimeValue,
    time_scale: TimeScale,
}

struct ParkedCompletions {
    rx: mpsc::Receiver<ScheduledFrame>,
    notifier: CompletionNotifier,
}

struct Enabled {
    mode: DisplayMode,
    tx: mpsc::Sender<ScheduledFrame>,
}

#[derive(Clone, Copy)]
struct Playback {
    start_time: TimeValue,
    time_scale: TimeScale,
    started: Instant,
}

/// Output sink that plays frames out against the wall clock.
///
/// Scheduled frames go into a bounded buffer drained by a completion task.
/// A paced output holds each frame until its display deadline and reports it
/// late when the deadline had already passed by more than a frame; an
/// unpaced output completes frames as soon as the task sees them.
pub struct SimulatedOutput {
    name: String,
    failure: FailureInjection,
    paced: bool,
    buffer_depth: usize,
    enabled: OnceLock<Enabled>,
    playback: OnceLock<Playback>,
    /// Completion side of the buffer between `enable` and `start_playback`
    parked: Mutex<Option<ParkedCompletions>>,
    stop: CancellationToken,
    stopped: AtomicBool,
    video_submissions: AtomicU64,
    audio_submissions: AtomicU64,
    audio_sample_frames: AtomicU64,
}

impl std::fmt::Debug for SimulatedOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedOutput")
            .field("name", &self.name)
            .field("failure", &self.failure)
            .field("paced", &self.paced)
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SimulatedOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure: FailureInjection::None,
            paced: true,
            buffer_depth: DEFAULT_BUFFER_DEPTH,
            enabled: OnceLock::new(),
            playback: OnceLock::new(),
            parked: Mutex::new(None),
            stop: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            video_submissions: AtomicU64::new(0),
            audio_submissions: AtomicU64::new(0),
            audio_sample_frames: AtomicU64::new(0),
        }
    }

    pub fn with_failure(mut self, failure: FailureInjection) -> Self {
        self.failure = failure;
        self
    }

    /// Complete frames immediately instead of at their display deadline.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    pub fn with_buffer_depth(mut self, depth: usize) -> Self {
        self.buffer_depth = depth.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Audio sample frames accepted into the output stream.
    pub fn audio_sample_frames(&self) -> u64 {
        self.audio_sample_frames.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    // A poisoned slot still holds a usable receiver.
    fn park(&self, parked: ParkedCompletions) {
        *self.parked.lock().unwrap_or_else(PoisonError::into_inner) = Some(parked);
    }

    fn unpark(&self) -> Option<ParkedCompletions> {
        self.parked.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn open(&self) -> Result<&Enabled, SubmissionError> {
        if self.is_stopped() {
            return Err(SubmissionError::Stopped);
        }
        self.enabled.get().ok_or(SubmissionError::NotReady)
    }

    async fn completion_task(
        mut rx: mpsc::Receiver<ScheduledFrame>,
        notifier: CompletionNotifier,
        playback: Playback,
        paced: bool,
        frame_interval: Duration,
        stop: CancellationToken,
    ) {
        let mut completed = 0u64;
        loop {
            let scheduled = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                next = rx.recv() => match next {
                    Some(scheduled) => scheduled,
                    None => break,
                },
            };

            let result = if paced {
                Self::wait_for_display(&scheduled, playback, frame_interval, &stop).await
            } else {
                CompletionResult::Completed
            };
            completed += 1;
            notifier.frame_completed(scheduled.frame, result);
        }

        rx.close();
        let mut flushed = 0u64;
        while let Ok(scheduled) = rx.try_recv() {
            flushed += 1;
            notifier.frame_completed(scheduled.frame, CompletionResult::Flushed);
        }
        debug!(completed, flushed, "Simulated output completion task ended");
    }

    async fn wait_for_display(
        scheduled: &ScheduledFrame,
        playback: Playback,
        frame_interval: Duration,
        stop: &CancellationToken,
    ) -> CompletionResult {
        let end = rescale(scheduled.end_time, scheduled.time_scale, playback.time_scale);
        let offset = end.saturating_sub(playback.start_time);
        if offset <= 0 {
            return CompletionResult::Dropped;
        }

        let nanos = rescale(offset, playback.time_scale, TimeScale::NANOS);
        let deadline = playback.started + Duration::from_nanos(nanos as u64);
        let now = Instant::now();
        if now > deadline + frame_interval {
            return CompletionResult::DisplayedLate;
        }

        tokio::select! {
            biased;
            _ = stop.cancelled() => CompletionResult::Flushed,
            _ = sleep_until(deadline) => CompletionResult::Completed,
        }
    }
}

impl OutputSink for SimulatedOutput {
    fn enable(
        &self,
        mode: DisplayMode,
        pixel_format: PixelFormat,
        audio: &AudioFormat,
        completions: CompletionNotifier,
    ) -> Result<ClockDomain> {
        audio.validate(&format!("{} audio output", self.name))?;
        if mode.dimensions().0 > 1920 && pixel_format == PixelFormat::Rgb10Bit {
            return Err(RelayError::configuration_rejected(
                format!("{} video output", self.name),
                format!("{} cannot be played out as {:?}", mode, pixel_format),
            ));
        }
        let (tx, rx) = mpsc::channel(self.buffer_depth);
        if self.enabled.set(Enabled { mode, tx }).is_err() {
            return Err(RelayError::configuration_rejected(
                format!("{} video output", self.name),
                "output is already enabled",
            ));
        }

        // Completion task starts with playback; park the receiver until then.
        self.park(ParkedCompletions { rx, notifier: completions });

        let (_, scale) = mode.frame_rate();
        info!(output = %self.name, %mode, ?pixel_format, "Simulated output enabled");
        Ok(ClockDomain::new(scale))
    }

    fn start_playback(&self, start_time: TimeValue, time_scale: TimeScale) -> Result<()> {
        let Some(enabled) = self.enabled.get() else {
            return Err(RelayError::configuration_rejected(
                format!("{} playback", self.name),
                "playback started before output was enabled",
            ));
        };
        let playback = Playback { start_time, time_scale, started: Instant::now() };
        if self.playback.set(playback).is_err() {
            return Err(RelayError::configuration_rejected(
                format!("{} playback", self.name),
                "playback already started",
            ));
        }

        let Some(ParkedCompletions { rx, notifier }) = self.unpark() else {
            return Err(RelayError::configuration_rejected(
                format!("{} playback", self.name),
                "completion channel already consumed",
            ));
        };
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            RelayError::configuration_rejected(format!("{} playback", self.name), e.to_string())
        })?;
        runtime.spawn(Self::completion_task(
            rx,
            notifier,
            playback,
            self.paced,
            enabled.mode.frame_interval(),
            self.stop.clone(),
        ));

        info!(output = %self.name, start_time, scale = %time_scale, "Scheduled playback started");
        Ok(())
    }

    fn schedule_video(&self, request: ScheduleRequest<VideoFrame>) -> Result<(), SubmissionError> {
        let enabled = self.open()?;
        let submission = self.video_submissions.fetch_add(1, Ordering::Relaxed) + 1;
        if self.failure.refuses(submission) {
            return Err(SubmissionError::Rejected { reason: "injected failure".to_string() });
        }

        let (frame, schedule_time, schedule_duration, time_scale) = request.into_parts();
        let end_time = schedule_time.saturating_add(schedule_duration);
        trace!(sequence = frame.sequence, schedule_time, "Frame scheduled");

        match enabled.tx.try_send(ScheduledFrame { frame, end_time, time_scale }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(output = %self.name, "Output buffer full");
                Err(SubmissionError::NotReady)
            }
            Err(TrySendError::Closed(_)) => Err(SubmissionError::Stopped),
        }
    }

    fn schedule_audio(&self, request: ScheduleRequest<AudioPacket>) -> Result<(), SubmissionError> {
        self.open()?;
        let submission = self.audio_submissions.fetch_add(1, Ordering::Relaxed) + 1;
        if self.failure.refuses(submission) {
            return Err(SubmissionError::Rejected { reason: "injected failure".to_string() });
        }

        let packet = request.unit();
        self.audio_sample_frames.fetch_add(packet.sample_frames as u64, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop.cancel();
        // Completion task never started: release what was buffered.
        if let Some(ParkedCompletions { mut rx, notifier }) = self.unpark() {
            rx.close();
            while let Ok(scheduled) = rx.try_recv() {
                notifier.frame_completed(scheduled.frame, CompletionResult::Flushed);
            }
        }
        info!(output = %self.name, "Simulated output stopped");
    }
}
