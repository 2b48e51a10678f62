//! Benchmarks for the capture-callback hot path
//!
//! Everything measured here runs inside the capture callback in production
//! and must stay well under one frame interval (16.7 ms at 59.94 fps):
//! - Timestamp conversion between clock domains
//! - Direct-lane arrival: convert, submit, count
//! - Queued-lane arrival: offer to the relay queue and pop on the output side
//! - Rate window sampling
//!
//! Platform: Cross-platform (synthetic units, CI-safe)

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use framerelay::SubmissionError;
use framerelay::metrics::Metrics;
use framerelay::output::{CompletionNotifier, OutputSink};
use framerelay::queue::relay_queue;
use framerelay::scheduler::{Lane, Scheduler};
use framerelay::test_utils::{audio_packet, test_scale, video_frame};
use framerelay::types::{
    AudioFormat, AudioPacket, ClockDomain, CompletionResult, DisplayMode, PixelFormat,
    ScheduleRequest, TimeScale, TimeValue, TimestampMapper, VideoFrame,
};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

/// Output that accepts and immediately releases everything.
struct NullOutput {
    completions: CompletionNotifier,
}

impl OutputSink for NullOutput {
    fn enable(
        &self,
        mode: DisplayMode,
        _pixel_format: PixelFormat,
        _audio: &AudioFormat,
        _completions: CompletionNotifier,
    ) -> framerelay::Result<ClockDomain> {
        Ok(ClockDomain::new(mode.frame_rate().1))
    }

    fn start_playback(&self, _start_time: TimeValue, _time_scale: TimeScale) -> framerelay::Result<()> {
        Ok(())
    }

    fn schedule_video(&self, request: ScheduleRequest<VideoFrame>) -> Result<(), SubmissionError> {
        let (frame, ..) = request.into_parts();
        self.completions.frame_completed(frame, CompletionResult::Completed);
        Ok(())
    }

    fn schedule_audio(&self, request: ScheduleRequest<AudioPacket>) -> Result<(), SubmissionError> {
        black_box(request);
        Ok(())
    }

    fn stop(&self) {}
}

fn scheduler(mapper: TimestampMapper, lane: Lane) -> Scheduler {
    let metrics = Arc::new(Metrics::new(Duration::from_secs(1)));
    let output = Arc::new(NullOutput { completions: CompletionNotifier::new(Arc::clone(&metrics)) });
    Scheduler::new(output, mapper, AudioFormat::default(), metrics, lane)
}

fn bench_timestamp_mapping(c: &mut Criterion) {
    let capture = ClockDomain::new(test_scale());
    let output = ClockDomain::with_epoch(TimeScale::NANOS, 1_000_000);

    let mut group = c.benchmark_group("timestamp_mapping");

    let passthrough = TimestampMapper::passthrough(capture);
    group.bench_function("identity", |b| {
        b.iter(|| black_box(passthrough.to_output_time(black_box(1_081_080), black_box(1001))))
    });

    let rescaling = TimestampMapper::new(capture, output);
    group.bench_function("rescale_to_nanos", |b| {
        b.iter(|| black_box(rescaling.to_output_time(black_box(1_081_080), black_box(1001))))
    });

    group.finish();
}

fn bench_arrivals(c: &mut Criterion) {
    let mapper = TimestampMapper::passthrough(ClockDomain::new(test_scale()));

    let mut group = c.benchmark_group("arrivals");
    group.throughput(Throughput::Elements(1));

    let direct = scheduler(mapper, Lane::Direct);
    let mut sequence = 0u64;
    group.bench_function("direct_video", |b| {
        b.iter(|| {
            sequence += 1;
            direct.on_video_frame_arrived(Some(video_frame(sequence)));
        })
    });

    group.bench_function("direct_audio", |b| {
        b.iter(|| direct.on_audio_packet_arrived(Some(audio_packet(black_box(7)))))
    });

    group.bench_function("gap", |b| b.iter(|| direct.on_video_frame_arrived(None)));

    let (video_tx, mut video_rx) = relay_queue(30).expect("queue");
    let (audio_tx, _audio_rx) = relay_queue(300).expect("queue");
    let queued = scheduler(mapper, Lane::Queued { video: video_tx, audio: audio_tx });
    group.bench_function("queued_video_offer_and_pop", |b| {
        b.iter(|| {
            sequence += 1;
            queued.on_video_frame_arrived(Some(video_frame(sequence)));
            if let Some(frame) = video_rx.try_pop() {
                queued.submit(frame.into());
            }
        })
    });

    group.finish();
}

fn bench_rate_sampling(c: &mut Criterion) {
    let metrics = Metrics::new(Duration::from_secs(1));
    c.bench_function("sample_window_not_due", |b| b.iter(|| black_box(metrics.sample_window())));
}

criterion_group!(benches, bench_timestamp_mapping, bench_arrivals, bench_rate_sampling);
criterion_main!(benches);
