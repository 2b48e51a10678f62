//! Relay counters and rate statistics.
//!
//! Every field is an independent atomic so arrival callbacks on the capture
//! thread and completion callbacks on the output thread can update it without
//! locks. No update spans more than one counter.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::types::CompletionResult;

/// Shortest rate window the aggregator will report.
pub const MIN_RATE_WINDOW: Duration = Duration::from_secs(1);

/// Why a video frame was counted as dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DropReason {
    /// Capture delivered no frame for an interval
    ArrivalGap,
    /// The relay queue was at capacity
    QueueFull,
    /// The output refused the submission
    SubmissionFailed,
    /// The unit was still in flight when the session stopped
    Stopped,
}

/// Counters for one relay session.
#[derive(Debug)]
pub struct Metrics {
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    frames_scheduled: AtomicU64,
    audio_samples_relayed: AtomicU64,
    audio_packets_dropped: AtomicU64,

    gap_drops: AtomicU64,
    queue_drops: AtomicU64,
    submission_drops: AtomicU64,
    stop_drops: AtomicU64,

    frames_completed: AtomicU64,
    frames_late: AtomicU64,
    frames_output_dropped: AtomicU64,
    frames_flushed: AtomicU64,

    format_changes: AtomicU64,

    started_at: Instant,
    window: Duration,
    last_window_count: AtomicU64,
    /// Nanoseconds from `started_at` to the last emitted window
    last_window_nanos: AtomicU64,
}

impl Metrics {
    /// Start a session's counters now.
    pub fn new(window: Duration) -> Self {
        Self::started_at(Instant::now(), window)
    }

    /// Start a session's counters at an explicit instant.
    pub fn started_at(started_at: Instant, window: Duration) -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_scheduled: AtomicU64::new(0),
            audio_samples_relayed: AtomicU64::new(0),
            audio_packets_dropped: AtomicU64::new(0),
            gap_drops: AtomicU64::new(0),
            queue_drops: AtomicU64::new(0),
            submission_drops: AtomicU64::new(0),
            stop_drops: AtomicU64::new(0),
            frames_completed: AtomicU64::new(0),
            frames_late: AtomicU64::new(0),
            frames_output_dropped: AtomicU64::new(0),
            frames_flushed: AtomicU64::new(0),
            format_changes: AtomicU64::new(0),
            started_at,
            window: window.max(MIN_RATE_WINDOW),
            last_window_count: AtomicU64::new(0),
            last_window_nanos: AtomicU64::new(0),
        }
    }

    pub fn started(&self) -> Instant {
        self.started_at
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count a video arrival event, present or absent. Returns the new total.
    pub fn record_video_arrival(&self) -> u64 {
        self.frames_received.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_scheduled(&self) {
        self.frames_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a dropped frame. Returns how many frames have been dropped for
    /// this reason so far.
    pub fn record_drop(&self, reason: DropReason) -> u64 {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        let by_reason = match reason {
            DropReason::ArrivalGap => &self.gap_drops,
            DropReason::QueueFull => &self.queue_drops,
            DropReason::SubmissionFailed => &self.submission_drops,
            DropReason::Stopped => &self.stop_drops,
        };
        by_reason.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_audio_samples(&self, sample_frames: u32) {
        self.audio_samples_relayed.fetch_add(sample_frames as u64, Ordering::Relaxed);
    }

    pub fn record_audio_drop(&self) -> u64 {
        self.audio_packets_dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_completion(&self, result: CompletionResult) {
        let counter = match result {
            CompletionResult::Completed => &self.frames_completed,
            CompletionResult::DisplayedLate => &self.frames_late,
            CompletionResult::Dropped => &self.frames_output_dropped,
            CompletionResult::Flushed => &self.frames_flushed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_format_change(&self) {
        self.format_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn frames_scheduled(&self) -> u64 {
        self.frames_scheduled.load(Ordering::Relaxed)
    }

    pub fn audio_samples_relayed(&self) -> u64 {
        self.audio_samples_relayed.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_scheduled: self.frames_scheduled.load(Ordering::Relaxed),
            audio_samples_relayed: self.audio_samples_relayed.load(Ordering::Relaxed),
            audio_packets_dropped: self.audio_packets_dropped.load(Ordering::Relaxed),
            gap_drops: self.gap_drops.load(Ordering::Relaxed),
            queue_drops: self.queue_drops.load(Ordering::Relaxed),
            submission_drops: self.submission_drops.load(Ordering::Relaxed),
            stop_drops: self.stop_drops.load(Ordering::Relaxed),
            frames_completed: self.frames_completed.load(Ordering::Relaxed),
            frames_late: self.frames_late.load(Ordering::Relaxed),
            frames_output_dropped: self.frames_output_dropped.load(Ordering::Relaxed),
            frames_flushed: self.frames_flushed.load(Ordering::Relaxed),
            format_changes: self.format_changes.load(Ordering::Relaxed),
        }
    }

    /// Emit a rate sample if a full window has passed since the last one.
    pub fn sample_window(&self) -> Option<RateSample> {
        self.sample_window_at(Instant::now())
    }

    /// Emit a rate sample as of `now`.
    ///
    /// Windows are consecutive and non-overlapping. When several threads race
    /// for the same window only the one that wins the compare-and-swap on the
    /// window start reports it.
    pub fn sample_window_at(&self, now: Instant) -> Option<RateSample> {
        let now_nanos = now.saturating_duration_since(self.started_at).as_nanos() as u64;
        let last_nanos = self.last_window_nanos.load(Ordering::Acquire);
        let elapsed_nanos = now_nanos.saturating_sub(last_nanos);

        if elapsed_nanos < self.window.as_nanos() as u64 {
            return None;
        }

        self.last_window_nanos
            .compare_exchange(last_nanos, now_nanos, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        let current = self.frames_received.load(Ordering::Acquire);
        let previous = self.last_window_count.swap(current, Ordering::AcqRel);
        let frames = current.saturating_sub(previous);
        let elapsed = Duration::from_nanos(elapsed_nanos);

        Some(RateSample { frames, elapsed, fps: frames as f64 / elapsed.as_secs_f64() })
    }

    /// Final statistics for a session that ended at `stopped_at`.
    pub fn report_at(&self, stopped_at: Instant) -> SessionReport {
        let runtime = stopped_at.saturating_duration_since(self.started_at);
        let counters = self.snapshot();
        let seconds = runtime.as_secs_f64();
        let average_fps =
            if seconds > 0.0 { counters.frames_received as f64 / seconds } else { 0.0 };

        SessionReport { counters, average_fps, runtime }
    }
}

/// Frame rate over one sampling window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateSample {
    /// Arrivals inside the window
    pub frames: u64,
    /// Window length
    pub elapsed: Duration,
    pub fps: f64,
}

/// Copy of all counters at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub frames_scheduled: u64,
    pub audio_samples_relayed: u64,
    pub audio_packets_dropped: u64,
    pub gap_drops: u64,
    pub queue_drops: u64,
    pub submission_drops: u64,
    pub stop_drops: u64,
    pub frames_completed: u64,
    pub frames_late: u64,
    pub frames_output_dropped: u64,
    pub frames_flushed: u64,
    pub format_changes: u64,
}

/// End-of-session statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub counters: MetricsSnapshot,
    pub average_fps: f64,
    pub runtime: Duration,
}

impl SessionReport {
    pub fn total_frames(&self) -> u64 {
        self.counters.frames_received
    }

    pub fn dropped_frames(&self) -> u64 {
        self.counters.frames_dropped
    }

    pub fn total_audio_samples(&self) -> u64 {
        self.counters.audio_samples_relayed
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total frames: {}", self.counters.frames_received)?;
        writeln!(f, "Dropped frames: {}", self.counters.frames_dropped)?;
        writeln!(f, "Average FPS: {:.2}", self.average_fps)?;
        writeln!(f, "Total audio samples: {}", self.counters.audio_samples_relayed)?;
        write!(f, "Total runtime: {:.3} seconds", self.runtime.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn thirty_frames_in_one_second_is_thirty_fps() {
        let start = Instant::now();
        let metrics = Metrics::started_at(start, Duration::from_secs(1));

        for _ in 0..30 {
            metrics.record_video_arrival();
        }

        let sample = metrics.sample_window_at(start + Duration::from_secs(1)).unwrap();
        assert_eq!(sample.frames, 30);
        assert_eq!(format!("{:.2}", sample.fps), "30.00");
    }

    #[test]
    fn windows_do_not_overlap() {
        let start = Instant::now();
        let metrics = Metrics::started_at(start, Duration::from_secs(1));

        for _ in 0..25 {
            metrics.record_video_arrival();
        }
        assert!(metrics.sample_window_at(start + Duration::from_millis(999)).is_none());
        let first = metrics.sample_window_at(start + Duration::from_millis(1000)).unwrap();
        assert_eq!(first.frames, 25);

        for _ in 0..60 {
            metrics.record_video_arrival();
        }
        assert!(metrics.sample_window_at(start + Duration::from_millis(1500)).is_none());
        let second = metrics.sample_window_at(start + Duration::from_millis(3000)).unwrap();
        assert_eq!(second.frames, 60);
        assert_eq!(second.elapsed, Duration::from_secs(2));
        assert!((second.fps - 30.0).abs() < 1e-9);
    }

    #[test]
    fn racing_samplers_report_each_window_once() {
        let start = Instant::now();
        let metrics = Arc::new(Metrics::started_at(start, Duration::from_secs(1)));
        for _ in 0..30 {
            metrics.record_video_arrival();
        }

        let at = start + Duration::from_secs(1);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || metrics.sample_window_at(at))
            })
            .collect();

        let reported: Vec<RateSample> =
            handles.into_iter().filter_map(|h| h.join().unwrap()).collect();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].frames, 30);
    }

    #[test]
    fn drops_are_split_by_reason() {
        let metrics = Metrics::new(MIN_RATE_WINDOW);
        metrics.record_drop(DropReason::ArrivalGap);
        metrics.record_drop(DropReason::SubmissionFailed);
        assert_eq!(metrics.record_drop(DropReason::SubmissionFailed), 2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_dropped, 3);
        assert_eq!(snapshot.gap_drops, 1);
        assert_eq!(snapshot.submission_drops, 2);
    }

    #[test]
    fn completions_do_not_touch_drop_count() {
        let metrics = Metrics::new(MIN_RATE_WINDOW);
        metrics.record_completion(CompletionResult::Completed);
        metrics.record_completion(CompletionResult::Dropped);
        metrics.record_completion(CompletionResult::Flushed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_dropped, 0);
        assert_eq!(snapshot.frames_completed, 1);
        assert_eq!(snapshot.frames_output_dropped, 1);
        assert_eq!(snapshot.frames_flushed, 1);
    }

    #[test]
    fn counters_never_decrease_under_concurrent_updates() {
        let metrics = Arc::new(Metrics::new(MIN_RATE_WINDOW));
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        metrics.record_video_arrival();
                        if i % 10 == 0 {
                            metrics.record_drop(DropReason::ArrivalGap);
                        }
                    }
                })
            })
            .collect();

        let mut last = MetricsSnapshot::default();
        while writers.iter().any(|w| !w.is_finished()) {
            let now = metrics.snapshot();
            assert!(now.frames_received >= last.frames_received);
            assert!(now.frames_dropped >= last.frames_dropped);
            last = now;
        }
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(metrics.frames_received(), 4000);
        assert_eq!(metrics.frames_dropped(), 400);
    }

    #[test]
    fn report_prints_the_summary_block() {
        let start = Instant::now();
        let metrics = Metrics::started_at(start, MIN_RATE_WINDOW);
        for _ in 0..60 {
            metrics.record_video_arrival();
        }
        metrics.record_drop(DropReason::ArrivalGap);
        metrics.record_audio_samples(1602);

        let report = metrics.report_at(start + Duration::from_secs(2));
        assert_eq!(
            report.to_string(),
            "Total frames: 60\n\
             Dropped frames: 1\n\
             Average FPS: 30.00\n\
             Total audio samples: 1602\n\
             Total runtime: 2.000 seconds"
        );
    }

    #[test]
    fn zero_length_session_reports_zero_fps() {
        let start = Instant::now();
        let metrics = Metrics::started_at(start, MIN_RATE_WINDOW);
        metrics.record_video_arrival();
        assert_eq!(metrics.report_at(start).average_fps, 0.0);
    }
}
