//! Relay session lifecycle

use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::capture::CaptureSource;
use crate::config::{RelayConfig, RelayMode};
use crate::driver::{CaptureTask, Driver, PumpTask};
use crate::metrics::{Metrics, SessionReport};
use crate::output::{CompletionNotifier, OutputSink};
use crate::queue::relay_queue;
use crate::scheduler::{Lane, Scheduler};
use crate::stream::RateWindows;
use crate::types::{DisplayMode, FormatChange, TimestampMapper};
use crate::Result;

/// Cloneable handle that asks a running session to stop.
///
/// Safe to trigger from any thread, including a signal handler task.
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A running relay between one capture source and one output sink.
pub struct RelaySession {
    scheduler: Arc<Scheduler>,
    metrics: Arc<Metrics>,
    output: Arc<dyn OutputSink>,
    capture: Option<CaptureTask<Box<dyn CaptureSource>>>,
    pump: Option<PumpTask>,
    formats: watch::Receiver<Option<FormatChange>>,
    stop: CancellationToken,
    mode: DisplayMode,
    duration: Option<Duration>,
    report: Option<SessionReport>,
}

impl RelaySession {
    /// Bring up output and capture and start relaying.
    ///
    /// Output is enabled first so a format it refuses fails the session
    /// before capture is touched. Playback starts at time zero in the
    /// output's time scale.
    pub async fn start<C>(capture: C, output: Arc<dyn OutputSink>, config: &RelayConfig) -> Result<Self>
    where
        C: CaptureSource,
    {
        config.validate()?;
        let mut capture: Box<dyn CaptureSource> = Box::new(capture);
        let metrics = Arc::new(Metrics::new(config.rate_window()));

        let output_domain = output.enable(
            config.display_mode,
            config.pixel_format,
            &config.audio,
            CompletionNotifier::new(Arc::clone(&metrics)),
        )?;

        let capture_domain = match capture.enable(config.display_mode, config.pixel_format, &config.audio)
        {
            Ok(domain) => domain,
            Err(e) => {
                output.stop();
                return Err(e);
            }
        };

        let mapper = TimestampMapper::new(capture_domain, output_domain);
        debug!(
            capture_scale = %capture_domain.scale,
            output_scale = %output_domain.scale,
            identity = mapper.is_identity(),
            "Clock domains resolved"
        );

        let (lane, consumers) = match config.relay_mode {
            RelayMode::Direct => (Lane::Direct, None),
            RelayMode::Queued { video_capacity, audio_capacity } => {
                let (video_tx, video_rx) = relay_queue(video_capacity)?;
                let (audio_tx, audio_rx) = relay_queue(audio_capacity)?;
                (Lane::Queued { video: video_tx, audio: audio_tx }, Some((video_rx, audio_rx)))
            }
        };

        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&output),
            mapper,
            config.audio,
            Arc::clone(&metrics),
            lane,
        ));

        if let Err(e) = output
            .start_playback(0, output_domain.scale)
            .and_then(|()| capture.start())
        {
            capture.stop();
            output.stop();
            return Err(e);
        }

        let formats = scheduler.subscribe_formats();
        let capture = Driver::spawn_capture(capture, Arc::clone(&scheduler));
        let pump = consumers.map(|(video, audio)| {
            Driver::spawn_pump(video, audio, Arc::clone(&scheduler), config.display_mode.frame_interval())
        });

        info!(
            capture = %config.capture_device,
            output = %config.output_device,
            mode = %config.display_mode,
            relay_mode = ?config.relay_mode,
            "Relay session started"
        );

        Ok(Self {
            scheduler,
            metrics,
            output,
            capture: Some(capture),
            pump,
            formats,
            stop: CancellationToken::new(),
            mode: config.display_mode,
            duration: config.duration(),
            report: None,
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { token: self.stop.clone() }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.mode
    }

    /// Format changes reported by the capture side, latest first.
    pub fn format_changes(&self) -> impl Stream<Item = FormatChange> + 'static {
        // WatchStream yields the current value immediately; skip the initial None.
        WatchStream::new(self.formats.clone()).filter_map(|change| async move { change })
    }

    /// Frame rate over each completed window until the session stops.
    pub fn rate_samples(&self) -> RateWindows {
        RateWindows::new(Arc::clone(&self.metrics), self.stop.clone())
    }

    /// Wait until a stop is requested, the configured duration elapses or
    /// the capture stream ends.
    pub async fn wait(&self) {
        let Some(capture) = &self.capture else {
            return;
        };

        let deadline = async {
            match self.duration {
                Some(duration) => {
                    let started = tokio::time::Instant::from_std(self.metrics.started());
                    tokio::time::sleep_until(started + duration).await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = self.stop.cancelled() => debug!("Stop requested"),
            _ = capture.finished.cancelled() => info!("Capture ended"),
            _ = deadline => info!("Session duration elapsed"),
        }
    }

    /// Stop relaying and return the final report.
    ///
    /// Later calls return the same report.
    pub async fn stop(&mut self) -> SessionReport {
        if let Some(report) = &self.report {
            return report.clone();
        }

        let stopped_at = Instant::now();
        self.stop.cancel();
        self.scheduler.close();

        if let Some(task) = self.capture.take() {
            task.cancel.cancel();
            match task.handle.await {
                Ok(mut capture) => capture.stop(),
                Err(e) => error!("Capture task failed: {}", e),
            }
        }

        if let Some(pump) = self.pump.take() {
            pump.cancel.cancel();
            if let Err(e) = pump.handle.await {
                error!("Output pump failed: {}", e);
            }
        }

        self.output.stop();

        let report = self.metrics.report_at(stopped_at);
        info!(
            frames = report.total_frames(),
            dropped = report.dropped_frames(),
            average_fps = report.average_fps,
            "Relay session stopped"
        );
        self.report = Some(report.clone());
        report
    }

    pub fn is_stopped(&self) -> bool {
        self.report.is_some()
    }
}

/// Dropping a running session cancels its tasks; the capture task stops the
/// source on its way out. Call [`RelaySession::stop`] to get the report.
impl Drop for RelaySession {
    fn drop(&mut self) {
        debug!("Dropping relay session");
        // Cancel tasks on drop for clean shutdown
        self.stop.cancel();
        self.scheduler.close();
        if let Some(capture) = &self.capture {
            capture.cancel.cancel();
        }
        if let Some(pump) = &self.pump {
            pump.cancel.cancel();
        }
        if self.report.is_none() {
            self.output.stop();
        }
    }
}
