//! Driver spawns and manages the relay's background tasks

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::capture::{CaptureEvent, CaptureSource};
use crate::queue::QueueConsumer;
use crate::scheduler::Scheduler;
use crate::types::{AudioPacket, VideoFrame};
use crate::RelayError;

/// Consecutive capture errors tolerated before the capture task gives up.
pub const MAX_ERRORS: u32 = 10;

/// Longest wait for a capture event before it counts as a capture error.
///
/// A healthy device reports an arrival, present or absent, every frame
/// interval, so silence this long means the input has stalled.
pub const CAPTURE_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle to the capture task
pub struct CaptureTask<C> {
    /// Resolves to the capture source once the task has ended
    pub handle: JoinHandle<C>,
    /// Cancel to stop reading events
    pub cancel: CancellationToken,
    /// Cancelled by the task itself when it ends, for whatever reason
    pub finished: CancellationToken,
}

/// Handle to the output pump task
pub struct PumpTask {
    pub handle: JoinHandle<()>,
    pub cancel: CancellationToken,
}

/// Driver spawns and manages relay tasks
///
/// The capture task owns the capture source and forwards every event to the
/// scheduler. In the queued lane a second task, the output pump, drains the
/// relay queues at the output cadence.
pub struct Driver;

impl Driver {
    /// Spawn the capture task for a started capture source.
    ///
    /// A cancelled task stops the source before handing it back.
    pub fn spawn_capture<C>(capture: C, scheduler: Arc<Scheduler>) -> CaptureTask<C>
    where
        C: CaptureSource,
    {
        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();

        let cancel_task = cancel.clone();
        let finished_task = finished.clone();
        let handle = tokio::spawn(async move {
            let mut capture = Self::capture_task(capture, scheduler, cancel_task.clone()).await;
            // Nobody may be left to stop the source once the task is cancelled.
            if cancel_task.is_cancelled() {
                capture.stop();
            }
            finished_task.cancel();
            capture
        });

        CaptureTask { handle, cancel, finished }
    }

    /// Spawn the output pump, pulling at most one frame and one audio packet
    /// per `period`.
    pub fn spawn_pump(
        video: QueueConsumer<VideoFrame>,
        audio: QueueConsumer<AudioPacket>,
        scheduler: Arc<Scheduler>,
        period: Duration,
    ) -> PumpTask {
        let cancel = CancellationToken::new();
        let cancel_task = cancel.clone();
        let handle = tokio::spawn(async move {
            Self::pump_task(video, audio, scheduler, period, cancel_task).await;
        });

        PumpTask { handle, cancel }
    }

    /// Capture task - reads events and hands them to the scheduler
    async fn capture_task<C>(mut capture: C, scheduler: Arc<Scheduler>, cancel: CancellationToken) -> C
    where
        C: CaptureSource,
    {
        info!("Capture task started");
        let mut event_count = 0u64;
        let mut error_count = 0u32;

        loop {
            // Check for cancellation between events
            if cancel.is_cancelled() {
                info!("Capture task cancelled");
                break;
            }

            // Use select to allow cancellation while waiting on the source
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Capture task cancelled while waiting for input");
                    break;
                }
                result = tokio::time::timeout(CAPTURE_TIMEOUT, capture.next_event()) => {
                    result.unwrap_or(Err(RelayError::Timeout { duration: CAPTURE_TIMEOUT }))
                }
            };

            match result {
                Ok(Some(event)) => {
                    event_count += 1;
                    error_count = 0;

                    match event {
                        CaptureEvent::VideoFrameArrived(frame) => {
                            trace!(event_count, present = frame.is_some(), "Video arrival");
                            scheduler.on_video_frame_arrived(frame);
                        }
                        CaptureEvent::AudioPacketArrived(packet) => {
                            scheduler.on_audio_packet_arrived(packet);
                        }
                        CaptureEvent::FormatChanged(change) => {
                            scheduler.on_format_changed(change);
                        }
                    }
                }
                Ok(None) => {
                    info!("Capture stream ended after {} events", event_count);
                    break;
                }
                Err(e) if e.is_fatal() => {
                    error!("Capture failed: {}", e);
                    break;
                }
                Err(e) => {
                    // Capture error - don't crash on transient failures
                    error_count += 1;
                    error!("Capture error ({}/{}): {}", error_count, MAX_ERRORS, e);

                    if error_count >= MAX_ERRORS {
                        error!("Too many capture errors, shutting down");
                        break;
                    }

                    // Exponential backoff: 100ms, 200ms, 400ms, ...
                    let backoff = Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        info!("Capture task ended (processed {} events)", event_count);
        capture
    }

    /// Output pump - submits queued units at the output cadence
    async fn pump_task(
        mut video: QueueConsumer<VideoFrame>,
        mut audio: QueueConsumer<AudioPacket>,
        scheduler: Arc<Scheduler>,
        period: Duration,
        cancel: CancellationToken,
    ) {
        debug!(?period, "Output pump started");
        let mut ticker = interval(period);
        // Missed ticks are caught up so a stall does not leave a standing backlog.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        let mut submitted = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // An empty queue just means nothing is due this tick.
            if let Some(frame) = video.try_pop() {
                submitted += 1;
                scheduler.submit(frame.into());
            }
            if let Some(packet) = audio.try_pop() {
                scheduler.submit(packet.into());
            }
        }

        let pending_video = video.close_and_drain();
        let pending_audio = audio.close_and_drain();
        if !pending_video.is_empty() || !pending_audio.is_empty() {
            warn!(
                video = pending_video.len(),
                audio = pending_audio.len(),
                "Discarding units still queued at stop"
            );
        }
        for frame in pending_video {
            scheduler.discard(frame.into());
        }
        for packet in pending_audio {
            scheduler.discard(packet.into());
        }

        debug!(submitted, "Output pump ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::output::OutputSink;
    use crate::queue::relay_queue;
    use crate::scheduler::Lane;
    use crate::test_utils::{RecordingOutput, ScriptedCapture, test_scale, transient_capture_error};
    use crate::types::{AudioFormat, ClockDomain, TimestampMapper};
    use crate::Result;

    fn scheduler(output: Arc<RecordingOutput>, lane: Lane) -> Arc<Scheduler> {
        let metrics = Arc::new(Metrics::new(Duration::from_secs(1)));
        let mapper = TimestampMapper::passthrough(ClockDomain::new(test_scale()));
        let output: Arc<dyn OutputSink> = output;
        Arc::new(Scheduler::new(output, mapper, AudioFormat::default(), metrics, lane))
    }

    #[tokio::test]
    async fn capture_task_relays_until_the_source_ends() {
        let output = Arc::new(RecordingOutput::new());
        let scheduler = scheduler(Arc::clone(&output), Lane::Direct);

        let task = Driver::spawn_capture(ScriptedCapture::frames(12, &[4]), Arc::clone(&scheduler));
        task.finished.cancelled().await;
        let capture = task.handle.await.unwrap();

        assert!(!capture.is_stopped());
        let metrics = scheduler.metrics();
        assert_eq!(metrics.frames_received(), 12);
        assert_eq!(metrics.frames_scheduled(), 11);
        assert_eq!(metrics.frames_dropped(), 1);
        assert_eq!(output.video_count(), 11);
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let output = Arc::new(RecordingOutput::new());
        let scheduler = scheduler(Arc::clone(&output), Lane::Direct);

        let script: Vec<Result<CaptureEvent>> = vec![
            Ok(CaptureEvent::VideoFrameArrived(Some(crate::test_utils::video_frame(0)))),
            Err(transient_capture_error()),
            Err(transient_capture_error()),
            Ok(CaptureEvent::VideoFrameArrived(Some(crate::test_utils::video_frame(1)))),
        ];
        let task = Driver::spawn_capture(ScriptedCapture::with_results(script), Arc::clone(&scheduler));
        task.handle.await.unwrap();

        assert_eq!(scheduler.metrics().frames_scheduled(), 2);
    }

    #[tokio::test]
    async fn fatal_errors_end_the_task() {
        let output = Arc::new(RecordingOutput::new());
        let scheduler = scheduler(Arc::clone(&output), Lane::Direct);

        let script: Vec<Result<CaptureEvent>> = vec![
            Err(RelayError::device_unavailable("synthetic:0", "unplugged")),
            Ok(CaptureEvent::VideoFrameArrived(Some(crate::test_utils::video_frame(0)))),
        ];
        let task = Driver::spawn_capture(ScriptedCapture::with_results(script), Arc::clone(&scheduler));
        task.handle.await.unwrap();

        assert_eq!(scheduler.metrics().frames_received(), 0);
        assert!(task.finished.is_cancelled());
    }

    #[tokio::test]
    async fn cancellation_returns_the_source() {
        let output = Arc::new(RecordingOutput::new());
        let scheduler = scheduler(Arc::clone(&output), Lane::Direct);

        let task = Driver::spawn_capture(ScriptedCapture::frames(2_000, &[]), Arc::clone(&scheduler));
        tokio::task::yield_now().await;
        task.cancel.cancel();
        let capture = task.handle.await.unwrap();

        assert!(capture.is_stopped());
        assert!(scheduler.metrics().frames_received() < 2_000);
    }

    #[tokio::test]
    async fn pump_submits_queued_units_and_discards_leftovers_at_stop() {
        let output = Arc::new(RecordingOutput::new());
        let (video_tx, video_rx) = relay_queue(8).unwrap();
        let (audio_tx, audio_rx) = relay_queue(8).unwrap();
        let scheduler =
            scheduler(Arc::clone(&output), Lane::Queued { video: video_tx, audio: audio_tx });

        for i in 0..8 {
            scheduler.on_video_frame_arrived(Some(crate::test_utils::video_frame(i)));
        }

        let pump = Driver::spawn_pump(
            video_rx,
            audio_rx,
            Arc::clone(&scheduler),
            Duration::from_millis(1),
        );
        while output.video_count() < 3 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        scheduler.close();
        pump.cancel.cancel();
        pump.handle.await.unwrap();

        let metrics = scheduler.metrics().snapshot();
        assert_eq!(metrics.frames_received, 8);
        assert_eq!(metrics.frames_scheduled + metrics.frames_dropped, 8);
        assert_eq!(metrics.frames_scheduled as usize, output.video_count());
        assert_eq!(metrics.stop_drops, metrics.frames_dropped);
    }

    /// Source that never delivers anything.
    struct StalledCapture;

    #[async_trait::async_trait]
    impl CaptureSource for StalledCapture {
        fn enable(
            &mut self,
            mode: crate::types::DisplayMode,
            _pixel_format: crate::types::PixelFormat,
            _audio: &AudioFormat,
        ) -> Result<ClockDomain> {
            Ok(ClockDomain::new(mode.frame_rate().1))
        }

        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        async fn next_event(&mut self) -> Result<Option<CaptureEvent>> {
            std::future::pending().await
        }

        fn stop(&mut self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn silent_capture_times_out_and_gives_up() {
        let output = Arc::new(RecordingOutput::new());
        let scheduler = scheduler(Arc::clone(&output), Lane::Direct);
        let started = tokio::time::Instant::now();

        let task = Driver::spawn_capture(StalledCapture, Arc::clone(&scheduler));
        task.handle.await.unwrap();

        assert!(task.finished.is_cancelled());
        assert!(started.elapsed() >= CAPTURE_TIMEOUT * MAX_ERRORS);
        assert_eq!(scheduler.metrics().frames_received(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pump_catches_up_after_a_stall() {
        let output = Arc::new(RecordingOutput::new());
        let (video_tx, video_rx) = relay_queue(25).unwrap();
        let (audio_tx, audio_rx) = relay_queue(25).unwrap();
        let scheduler =
            scheduler(Arc::clone(&output), Lane::Queued { video: video_tx, audio: audio_tx });

        for i in 0..20 {
            scheduler.on_video_frame_arrived(Some(crate::test_utils::video_frame(i)));
        }

        let pump = Driver::spawn_pump(
            video_rx,
            audio_rx,
            Arc::clone(&scheduler),
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(output.video_count(), 1);

        // The clock jumps ten periods without the pump running, as it does
        // when the runtime thread is blocked.
        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(output.video_count(), 11);

        pump.cancel.cancel();
        pump.handle.await.unwrap();
    }
}
