//! Synthetic capture source producing a colour-bar test signal

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::time::{Interval, MissedTickBehavior, interval};
use tracing::{debug, info, trace};

use crate::capture::{CaptureEvent, CaptureSource};
use crate::types::{
    AudioFormat, AudioPacket, ClockDomain, DisplayMode, FormatChange, FormatChangeEvents,
    MediaBuffer, PixelFormat, TimeScale, TimeValue, VideoFrame, rescale,
};
use crate::{RelayError, Result};

/// Knobs for the synthetic signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticOptions {
    /// End the stream after this many video arrivals
    pub frame_limit: Option<u64>,

    /// Deliver every n-th arrival as an absent frame
    pub gap_every: Option<u64>,

    /// Emit at the display mode's frame rate instead of as fast as polled
    pub paced: bool,

    /// Switch the signal to another display mode part-way through
    pub format_change: Option<PlannedFormatChange>,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self { frame_limit: None, gap_every: None, paced: true, format_change: None }
    }
}

/// A display mode switch after a fixed number of arrivals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedFormatChange {
    pub after_frames: u64,
    pub mode: DisplayMode,
}

/// The part of the stream that depends on the current display mode.
#[derive(Debug, Clone, Copy)]
struct Cadence {
    mode: DisplayMode,
    pixel_format: PixelFormat,
    /// Session-domain time the current mode started at
    base_time: TimeValue,
    /// Frames produced since `base_time`
    frames_since_base: i64,
}

/// Capture source that generates frames and audio in software.
///
/// Frame `n` of a mode is stamped with the exact position of that frame in
/// the session's clock domain, computed from the frame index rather than by
/// adding durations, so the stream has no rounding drift at any rate. Each
/// frame is followed by an audio packet holding the samples of that frame's
/// interval (1601/1602 alternating at 29.97 fps).
pub struct SyntheticCapture {
    options: SyntheticOptions,
    audio: AudioFormat,
    domain: Option<ClockDomain>,
    cadence: Option<Cadence>,
    pending: VecDeque<CaptureEvent>,
    interval: Option<Interval>,
    next_sequence: u64,
    planned_change: Option<(u64, DisplayMode)>,
    started: bool,
    stopped: bool,
}

impl SyntheticCapture {
    pub fn new(options: SyntheticOptions) -> Self {
        let planned_change = options.format_change.map(|change| (change.after_frames, change.mode));
        Self {
            options,
            audio: AudioFormat::default(),
            domain: None,
            cadence: None,
            pending: VecDeque::new(),
            interval: None,
            next_sequence: 0,
            planned_change,
            started: false,
            stopped: false,
        }
    }

    /// Frames produced so far, gaps included.
    pub fn frames_produced(&self) -> u64 {
        self.next_sequence
    }

    fn frame_bounds(cadence: &Cadence, scale: TimeScale, index: i64) -> (TimeValue, TimeValue) {
        let (duration, mode_scale) = cadence.mode.frame_rate();
        let start = cadence.base_time + rescale(index * duration, mode_scale, scale);
        let end = cadence.base_time + rescale((index + 1) * duration, mode_scale, scale);
        (start, end)
    }

    fn make_pacer(mode: DisplayMode) -> Interval {
        let mut pacer = interval(mode.frame_interval());
        pacer.set_missed_tick_behavior(MissedTickBehavior::Burst);
        pacer
    }

    /// One line of eight vertical bars; the payload is opaque to the relay.
    fn bars_line(mode: DisplayMode, pixel_format: PixelFormat, sequence: u64) -> MediaBuffer {
        let (width, _) = mode.dimensions();
        let row = pixel_format.row_bytes(width);
        let bar = row.div_ceil(8).max(1);
        let shift = (sequence % 8) as usize;
        let line: Vec<u8> = (0..row).map(|i| (((i / bar + shift) % 8) * 32) as u8).collect();
        MediaBuffer::new(line)
    }

    fn apply_planned_change(&mut self, scale: TimeScale) {
        let Some((after, mode)) = self.planned_change else {
            return;
        };
        if self.next_sequence != after {
            return;
        }
        self.planned_change = None;

        let Some(cadence) = self.cadence.as_mut() else {
            return;
        };
        let (base_time, _) = Self::frame_bounds(cadence, scale, cadence.frames_since_base);
        let previous = cadence.mode;
        *cadence = Cadence {
            mode,
            pixel_format: cadence.pixel_format,
            base_time,
            frames_since_base: 0,
        };
        info!(from = %previous, to = %mode, "Synthetic signal switching display mode");

        if self.options.paced {
            self.interval = Some(Self::make_pacer(mode));
        }
        self.pending.push_back(CaptureEvent::FormatChanged(FormatChange {
            events: FormatChangeEvents {
                display_mode: true,
                field_dominance: previous.is_interlaced() != mode.is_interlaced(),
                colorspace: false,
            },
            mode,
            pixel_format: cadence.pixel_format,
        }));
    }

    fn produce_frame(&mut self, scale: TimeScale) {
        self.apply_planned_change(scale);
        let Some(cadence) = self.cadence.as_mut() else {
            return;
        };

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let (start, end) = Self::frame_bounds(cadence, scale, cadence.frames_since_base);
        cadence.frames_since_base += 1;

        let is_gap = self.options.gap_every.is_some_and(|n| n > 0 && (sequence + 1) % n == 0);
        let frame = if is_gap {
            trace!(sequence, "Synthetic gap");
            None
        } else {
            let pixels = Self::bars_line(cadence.mode, cadence.pixel_format, sequence);
            Some(VideoFrame::new(pixels, start, end - start, sequence))
        };
        self.pending.push_back(CaptureEvent::VideoFrameArrived(frame));

        let sample_frames = self.audio.sample_frames_between(start, end, scale);
        let samples = vec![0u8; sample_frames as usize * self.audio.bytes_per_sample_frame()];
        self.pending.push_back(CaptureEvent::AudioPacketArrived(Some(AudioPacket::new(
            MediaBuffer::new(samples),
            sample_frames,
            start,
        ))));
    }
}

#[async_trait::async_trait]
impl CaptureSource for SyntheticCapture {
    fn enable(
        &mut self,
        mode: DisplayMode,
        pixel_format: PixelFormat,
        audio: &AudioFormat,
    ) -> Result<ClockDomain> {
        audio.validate("capture audio input")?;
        if mode.dimensions().0 > 1920 && pixel_format == PixelFormat::Rgb10Bit {
            return Err(RelayError::configuration_rejected(
                "capture video input",
                format!("{} cannot be captured as {:?}", mode, pixel_format),
            ));
        }

        let (_, scale) = mode.frame_rate();
        let domain = ClockDomain::new(scale);
        self.audio = *audio;
        self.domain = Some(domain);
        self.cadence = Some(Cadence { mode, pixel_format, base_time: 0, frames_since_base: 0 });

        debug!(%mode, ?pixel_format, scale = %scale, "Synthetic capture enabled");
        Ok(domain)
    }

    fn start(&mut self) -> Result<()> {
        let Some(cadence) = self.cadence else {
            return Err(RelayError::configuration_rejected(
                "capture video input",
                "streams started before input was enabled",
            ));
        };
        if self.options.paced {
            self.interval = Some(Self::make_pacer(cadence.mode));
        }
        self.started = true;
        info!(mode = %cadence.mode, paced = self.options.paced, "Synthetic capture started");
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<CaptureEvent>> {
        if self.stopped || !self.started {
            return Ok(None);
        }

        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }

        if self.options.frame_limit.is_some_and(|limit| self.next_sequence >= limit) {
            debug!(frames = self.next_sequence, "Synthetic capture reached frame limit");
            return Ok(None);
        }

        match self.interval.as_mut() {
            Some(pacer) => {
                pacer.tick().await;
            }
            // Unpaced sources still yield so they never starve the runtime.
            None => tokio::task::yield_now().await,
        }

        let Some(domain) = self.domain else {
            return Ok(None);
        };
        self.produce_frame(domain.scale);
        Ok(self.pending.pop_front())
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.interval = None;
            self.pending.clear();
            info!(frames = self.next_sequence, "Synthetic capture stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unpaced(frame_limit: u64) -> SyntheticOptions {
        SyntheticOptions { frame_limit: Some(frame_limit), paced: false, ..Default::default() }
    }

    async fn collect(capture: &mut SyntheticCapture) -> Vec<CaptureEvent> {
        let mut events = Vec::new();
        while let Some(event) = capture.next_event().await.unwrap() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn frames_carry_exact_timestamps_and_audio() {
        let mut capture = SyntheticCapture::new(unpaced(4));
        let domain = capture
            .enable(DisplayMode::Hd1080i5994, PixelFormat::Yuv10Bit, &AudioFormat::default())
            .unwrap();
        assert_eq!(domain.scale.ticks_per_second(), 30_000);
        capture.start().unwrap();

        let events = collect(&mut capture).await;
        assert_eq!(events.len(), 8);

        let mut samples = 0;
        for (i, event) in events.iter().enumerate() {
            match event {
                CaptureEvent::VideoFrameArrived(Some(frame)) => {
                    assert_eq!(frame.timestamp, (i as i64 / 2) * 1001);
                    assert_eq!(frame.duration, 1001);
                    assert_eq!(frame.pixels.len(), 5120);
                }
                CaptureEvent::AudioPacketArrived(Some(packet)) => {
                    samples += packet.sample_frames;
                    assert_eq!(packet.samples.len(), packet.sample_frames as usize * 4);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(samples, 4 * 1001 * 48_000 / 30_000);
    }

    #[tokio::test]
    async fn gap_every_emits_absent_frames() {
        let options = SyntheticOptions { gap_every: Some(5), ..unpaced(20) };
        let mut capture = SyntheticCapture::new(options);
        capture.enable(DisplayMode::Hd1080p25, PixelFormat::Yuv8Bit, &AudioFormat::default()).unwrap();
        capture.start().unwrap();

        let gaps = collect(&mut capture)
            .await
            .iter()
            .filter(|e| matches!(e, CaptureEvent::VideoFrameArrived(None)))
            .count();
        assert_eq!(gaps, 4);
    }

    #[tokio::test]
    async fn format_change_rebases_the_timeline() {
        let change = PlannedFormatChange { after_frames: 2, mode: DisplayMode::Hd1080p5994 };
        let mut capture =
            SyntheticCapture::new(SyntheticOptions { format_change: Some(change), ..unpaced(4) });
        capture.enable(DisplayMode::Hd1080p2997, PixelFormat::Yuv8Bit, &AudioFormat::default()).unwrap();
        capture.start().unwrap();

        let events = collect(&mut capture).await;
        assert!(matches!(
            events[4],
            CaptureEvent::FormatChanged(FormatChange { mode: DisplayMode::Hd1080p5994, .. })
        ));

        let frames: Vec<(i64, i64)> = events
            .iter()
            .filter_map(|e| match e {
                CaptureEvent::VideoFrameArrived(Some(f)) => Some((f.timestamp, f.duration)),
                _ => None,
            })
            .collect();
        // 59.94 frames are 500.5 ticks in a 30000 scale; durations alternate
        // so the timeline stays exact.
        assert_eq!(frames, vec![(0, 1001), (1001, 1001), (2002, 500), (2502, 501)]);
    }

    #[tokio::test]
    async fn stopped_source_ends() {
        let mut capture = SyntheticCapture::new(SyntheticOptions { paced: false, ..Default::default() });
        capture.enable(DisplayMode::Pal, PixelFormat::Yuv8Bit, &AudioFormat::default()).unwrap();
        capture.start().unwrap();

        assert!(capture.next_event().await.unwrap().is_some());
        capture.stop();
        capture.stop();
        assert!(capture.next_event().await.unwrap().is_none());
    }

    #[test]
    fn start_before_enable_is_rejected() {
        let mut capture = SyntheticCapture::new(SyntheticOptions::default());
        assert!(capture.start().is_err());
    }

    #[test]
    fn rejects_unsupported_audio() {
        let mut capture = SyntheticCapture::new(SyntheticOptions::default());
        let audio = AudioFormat { channels: 3, ..AudioFormat::default() };
        let err = capture.enable(DisplayMode::Pal, PixelFormat::Yuv8Bit, &audio).unwrap_err();
        assert!(matches!(err, RelayError::ConfigurationRejected { .. }));
    }
}
