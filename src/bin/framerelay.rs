//! Framerelay command line
//!
//! Relays the configured capture device to the configured output device
//! until interrupted or the session duration elapses, then prints the
//! session report.
//!
//! # Usage
//!
//! ```bash
//! # Relay the default synthetic devices until Ctrl-C
//! framerelay
//!
//! # Ten seconds of 1080p25 through a 12 frame queue
//! framerelay --mode 1080p25 --duration 10 --queued --video-queue 12
//!
//! # 1080i5994 switching to 720p5994 after 300 frames
//! framerelay --switch-mode 720p5994 --switch-after 300 --frames 600
//!
//! # Settings from a file, with debug logging
//! framerelay --config relay.yaml --log-level debug
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use framerelay::config::{DEFAULT_AUDIO_CAPACITY, DEFAULT_VIDEO_CAPACITY};
use framerelay::captures::PlannedFormatChange;
use framerelay::outputs::FailureInjection;
use framerelay::{DisplayMode, FrameRelay, RelayConfig, RelayError, RelayMode, SessionReport};

/// Real-time audio/video passthrough relay
#[derive(Parser, Debug)]
#[command(name = "framerelay", author, version, about)]
struct Cli {
    /// YAML configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Display mode, e.g. 1080i5994, 1080p25, 720p60
    #[arg(short, long)]
    mode: Option<DisplayMode>,

    /// Stop after this many seconds
    #[arg(short, long, value_name = "SECS")]
    duration: Option<u64>,

    /// Decouple capture and output through bounded queues
    #[arg(long)]
    queued: bool,

    /// Video queue capacity in frames (implies --queued)
    #[arg(long, value_name = "N")]
    video_queue: Option<usize>,

    /// Audio queue capacity in packets (implies --queued)
    #[arg(long, value_name = "N")]
    audio_queue: Option<usize>,

    /// End the synthetic capture after N frames
    #[arg(long, value_name = "N")]
    frames: Option<u64>,

    /// Make every N-th synthetic frame a missing frame
    #[arg(long, value_name = "N")]
    gap_every: Option<u64>,

    /// Switch the synthetic signal to this display mode part-way through
    #[arg(long, value_name = "MODE", requires = "switch_after")]
    switch_mode: Option<DisplayMode>,

    /// Frames to produce before the switch requested by --switch-mode
    #[arg(long, value_name = "N", requires = "switch_mode")]
    switch_after: Option<u64>,

    /// Make the output refuse every submission
    #[arg(long)]
    fail_output: bool,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info", value_name = "LEVEL")]
    log_level: String,
}

impl Cli {
    fn relay_config(&self) -> Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => RelayConfig::default(),
        };

        if let Some(mode) = self.mode {
            config.display_mode = mode;
        }
        if let Some(duration) = self.duration {
            config.duration_secs = Some(duration);
        }
        if self.queued || self.video_queue.is_some() || self.audio_queue.is_some() {
            let (video, audio) = match config.relay_mode {
                RelayMode::Queued { video_capacity, audio_capacity } => {
                    (video_capacity, audio_capacity)
                }
                RelayMode::Direct => (DEFAULT_VIDEO_CAPACITY, DEFAULT_AUDIO_CAPACITY),
            };
            config.relay_mode = RelayMode::Queued {
                video_capacity: self.video_queue.unwrap_or(video),
                audio_capacity: self.audio_queue.unwrap_or(audio),
            };
        }
        if let Some(frames) = self.frames {
            config.synthetic.frame_limit = Some(frames);
        }
        if let Some(n) = self.gap_every {
            config.synthetic.gap_every = Some(n);
        }
        if let (Some(mode), Some(after_frames)) = (self.switch_mode, self.switch_after) {
            config.synthetic.format_change = Some(PlannedFormatChange { after_frames, mode });
        }
        if self.fail_output {
            config.output_failure = FailureInjection::Always;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

async fn run(config: RelayConfig) -> Result<SessionReport> {
    let mut session = FrameRelay::launch(&config).await?;

    let stop = session.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping relay");
            stop.stop();
        }
    });

    let mut samples = session.rate_samples();
    tokio::spawn(async move {
        while let Some(sample) = samples.next().await {
            info!(frames = sample.frames, "Current FPS: {:.2}", sample.fps);
        }
    });

    let mut changes = Box::pin(session.format_changes());
    let format_log = tokio::spawn(async move {
        while let Some(change) = changes.next().await {
            warn!(mode = %change.mode, "Input format changed; output keeps its configured mode");
        }
    });

    session.wait().await;
    let report = session.stop().await;
    format_log.abort();
    Ok(report)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = match cli.relay_config() {
        Ok(config) => config,
        Err(e) => return fail(&e),
    };

    match run(config).await {
        Ok(report) => {
            println!("{}", report);
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn fail(error: &anyhow::Error) -> ExitCode {
    error!("{:#}", error);
    eprintln!("Error: {:#}", error);
    if let Some(relay) = error.downcast_ref::<RelayError>() {
        for suggestion in relay.recovery_suggestions() {
            eprintln!("  - {}", suggestion);
        }
    }
    ExitCode::FAILURE
}
