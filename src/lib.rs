//! Real-time audio/video passthrough relay.
//!
//! Framerelay takes frames and audio packets from a capture source, re-times
//! each one onto the output device's clock and hands it to a playout sink
//! without ever blocking the capture side. It counts every frame that does
//! not make it through and reports throughput while running unattended for
//! hours.
//!
//! # Features
//!
//! - **Drift-free re-timing**: integer rescaling between clock domains, each
//!   timestamp converted from its absolute value
//! - **Non-blocking relay**: direct submission or a bounded drop-newest queue
//! - **Exact accounting**: every arrival ends up scheduled or dropped
//! - **Live rates**: per-window FPS samples as a `Stream`
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use framerelay::{FrameRelay, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> framerelay::Result<()> {
//!     let config = RelayConfig { duration_secs: Some(10), ..RelayConfig::default() };
//!     let mut session = FrameRelay::launch(&config).await?;
//!
//!     session.wait().await;
//!     let report = session.stop().await;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Relay core
pub mod metrics;
pub mod queue;
pub mod scheduler;

// Collaborator contracts and implementations
pub mod capture;
pub mod captures;
pub mod devices;
pub mod output;
pub mod outputs;

// Session orchestration
pub mod config;
pub mod driver;
pub mod session;
pub mod stream;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use capture::{CaptureEvent, CaptureSource};
pub use config::{RelayConfig, RelayMode};
pub use devices::{DeviceCatalog, DeviceId};
pub use metrics::{Metrics, MetricsSnapshot, RateSample, SessionReport};
pub use output::{CompletionNotifier, OutputSink};
pub use session::{RelaySession, StopHandle};

use std::sync::Arc;

/// Unified entry point for relay sessions.
///
/// # Examples
///
/// ## Configured devices
/// ```rust,no_run
/// use framerelay::{FrameRelay, RelayConfig};
///
/// #[tokio::main]
/// async fn main() -> framerelay::Result<()> {
///     let config = RelayConfig::from_file("relay.yaml")?;
///     let session = FrameRelay::launch(&config).await?;
///     session.wait().await;
///     Ok(())
/// }
/// ```
///
/// ## Custom collaborators
/// ```rust,no_run
/// use std::sync::Arc;
/// use framerelay::captures::{SyntheticCapture, SyntheticOptions};
/// use framerelay::outputs::SimulatedOutput;
/// use framerelay::{FrameRelay, RelayConfig};
///
/// #[tokio::main]
/// async fn main() -> framerelay::Result<()> {
///     let capture = SyntheticCapture::new(SyntheticOptions::default());
///     let output = Arc::new(SimulatedOutput::new("bench"));
///     let session = FrameRelay::start(capture, output, &RelayConfig::default()).await?;
///     session.wait().await;
///     Ok(())
/// }
/// ```
pub struct FrameRelay;

impl FrameRelay {
    /// Open the configured devices and start relaying.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Either device is not present (`DeviceUnavailable`)
    /// - Capture and output name the same half-duplex sub-device
    /// - A device refuses the display mode or audio format
    /// - The configuration is invalid
    pub async fn launch(config: &RelayConfig) -> Result<RelaySession> {
        config.validate()?;
        let catalog = DeviceCatalog::discover();
        catalog.check_pair(&config.capture_device, &config.output_device)?;

        let capture = catalog.open_capture(&config.capture_device, config.synthetic.clone())?;
        let output = catalog.open_output(
            &config.output_device,
            config.output_failure,
            config.synthetic.paced,
        )?;
        RelaySession::start(capture, output, config).await
    }

    /// Start relaying between caller-provided collaborators.
    pub async fn start<C>(capture: C, output: Arc<dyn OutputSink>, config: &RelayConfig) -> Result<RelaySession>
    where
        C: CaptureSource,
    {
        RelaySession::start(capture, output, config).await
    }
}
