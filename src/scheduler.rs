//! Frame and packet scheduler
//!
//! The scheduler is the one place where capture and output meet. Arrival
//! callbacks run on the capture thread and must return quickly: they update
//! atomic counters, convert the unit's own timestamp onto the output clock and
//! either submit it straight to the output (direct lane) or offer it to a
//! bounded queue drained on the output cadence (queued lane). Nothing here
//! blocks or takes a lock.
//!
//! Every video arrival ends in exactly one of two counters: scheduled or
//! dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::metrics::{DropReason, Metrics};
use crate::output::OutputSink;
use crate::queue::{Enqueue, QueueProducer};
use crate::types::{
    AudioFormat, AudioPacket, FormatChange, MediaUnit, ScheduleRequest, TimeScale,
    TimestampMapper, VideoFrame, rescale,
};

/// How arrivals reach the output.
pub enum Lane {
    /// Submit from the arrival callback
    Direct,
    /// Offer to bounded queues; the driver's output pump submits
    Queued { video: QueueProducer<VideoFrame>, audio: QueueProducer<AudioPacket> },
}

impl std::fmt::Debug for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lane::Direct => f.write_str("Direct"),
            Lane::Queued { video, audio } => f
                .debug_struct("Queued")
                .field("video", &video.counters())
                .field("audio", &audio.counters())
                .finish(),
        }
    }
}

/// Synchronization point between capture and output.
pub struct Scheduler {
    output: Arc<dyn OutputSink>,
    mapper: TimestampMapper,
    audio: AudioFormat,
    metrics: Arc<Metrics>,
    lane: Lane,
    formats: watch::Sender<Option<FormatChange>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("mapper", &self.mapper)
            .field("lane", &self.lane)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(
        output: Arc<dyn OutputSink>,
        mapper: TimestampMapper,
        audio: AudioFormat,
        metrics: Arc<Metrics>,
        lane: Lane,
    ) -> Self {
        let (formats, _) = watch::channel(None);
        Self { output, mapper, audio, metrics, lane, formats, closed: AtomicBool::new(false) }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Receiver for format-change notifications.
    pub fn subscribe_formats(&self) -> watch::Receiver<Option<FormatChange>> {
        self.formats.subscribe()
    }

    /// Stop accepting arrivals. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Scheduler closed, ignoring further arrivals");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Capture delivered a video frame, or signalled a gap with `None`.
    pub fn on_video_frame_arrived(&self, frame: Option<VideoFrame>) {
        if self.is_closed() {
            trace!("Video arrival after close ignored");
            return;
        }

        let received = self.metrics.record_video_arrival();

        let Some(frame) = frame else {
            let gaps = self.metrics.record_drop(DropReason::ArrivalGap);
            trace!(received, gaps, "Capture signalled a missing frame");
            return;
        };

        match &self.lane {
            Lane::Direct => self.submit_video(frame),
            Lane::Queued { video, .. } => match video.offer(frame) {
                Enqueue::Accepted => {}
                Enqueue::DroppedFull => {
                    let dropped = self.metrics.record_drop(DropReason::QueueFull);
                    if dropped.is_power_of_two() {
                        warn!(dropped, "Video relay queue full, dropping newest frames");
                    }
                }
                Enqueue::Closed => {
                    self.metrics.record_drop(DropReason::Stopped);
                }
            },
        }
    }

    /// Capture delivered an audio packet. Absent packets are skipped.
    pub fn on_audio_packet_arrived(&self, packet: Option<AudioPacket>) {
        if self.is_closed() {
            return;
        }
        let Some(packet) = packet else {
            trace!("Capture signalled a missing audio packet");
            return;
        };

        self.metrics.record_audio_samples(packet.sample_frames);

        match &self.lane {
            Lane::Direct => self.submit_audio(packet),
            Lane::Queued { audio, .. } => {
                if audio.offer(packet) != Enqueue::Accepted {
                    let dropped = self.metrics.record_audio_drop();
                    if dropped.is_power_of_two() {
                        warn!(dropped, "Audio relay queue full, dropping newest packets");
                    }
                }
            }
        }
    }

    /// Capture signal changed format. The relay keeps running.
    pub fn on_format_changed(&self, change: FormatChange) {
        warn!(
            mode = %change.mode,
            pixel_format = ?change.pixel_format,
            events = ?change.events,
            "Video input format changed"
        );
        self.metrics.record_format_change();
        self.formats.send_replace(Some(change));
    }

    /// Submit a unit pulled from a relay queue.
    pub fn submit(&self, unit: MediaUnit) {
        match unit {
            MediaUnit::Video(frame) => self.submit_video(frame),
            MediaUnit::Audio(packet) => self.submit_audio(packet),
        }
    }

    /// Account for a unit that was still queued when the session stopped.
    pub fn discard(&self, unit: MediaUnit) {
        match unit {
            MediaUnit::Video(frame) => {
                trace!(sequence = frame.sequence, "Discarding queued frame at stop");
                self.metrics.record_drop(DropReason::Stopped);
            }
            MediaUnit::Audio(_) => {
                self.metrics.record_audio_drop();
            }
        }
    }

    fn output_scale(&self) -> TimeScale {
        self.mapper.output_domain().scale
    }

    fn submit_video(&self, frame: VideoFrame) {
        let (schedule_time, schedule_duration) =
            self.mapper.to_output_time(frame.timestamp, frame.duration);
        let sequence = frame.sequence;
        let request =
            ScheduleRequest::new(frame, schedule_time, schedule_duration, self.output_scale());

        match self.output.schedule_video(request) {
            Ok(()) => {
                self.metrics.record_scheduled();
                trace!(sequence, schedule_time, schedule_duration, "Frame scheduled");
            }
            Err(e) => {
                let failures = self.metrics.record_drop(DropReason::SubmissionFailed);
                debug!(sequence, error = %e, "Frame submission failed");
                if failures.is_power_of_two() {
                    warn!(failures, error = %e, "Output refusing frames, counting them as dropped");
                }
            }
        }
    }

    fn submit_audio(&self, packet: AudioPacket) {
        let capture_scale = self.mapper.capture_domain().scale;
        let duration = match TimeScale::new(self.audio.sample_rate as u64) {
            Some(rate) => rescale(packet.sample_frames as i64, rate, capture_scale),
            None => 0,
        };
        let (schedule_time, schedule_duration) =
            self.mapper.to_output_time(packet.timestamp, duration);
        let sample_frames = packet.sample_frames;
        let request =
            ScheduleRequest::new(packet, schedule_time, schedule_duration, self.output_scale());

        if let Err(e) = self.output.schedule_audio(request) {
            let dropped = self.metrics.record_audio_drop();
            debug!(sample_frames, error = %e, "Audio submission failed");
            if dropped.is_power_of_two() {
                warn!(dropped, error = %e, "Output refusing audio packets");
            }
        }
    }
}
