//! Session configuration loaded from YAML

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::captures::SyntheticOptions;
use crate::metrics::MIN_RATE_WINDOW;
use crate::outputs::FailureInjection;
use crate::types::{AudioFormat, DisplayMode, PixelFormat};
use crate::{RelayError, Result};

/// Default video relay queue depth, in frames.
pub const DEFAULT_VIDEO_CAPACITY: usize = 30;

/// Default audio relay queue depth, in packets.
pub const DEFAULT_AUDIO_CAPACITY: usize = 300;

/// How arrivals travel from capture to output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayMode {
    /// Submit straight from the capture callback
    #[default]
    Direct,
    /// Decouple through bounded drop-newest queues
    Queued {
        #[serde(default = "default_video_capacity")]
        video_capacity: usize,
        #[serde(default = "default_audio_capacity")]
        audio_capacity: usize,
    },
}

fn default_video_capacity() -> usize {
    DEFAULT_VIDEO_CAPACITY
}

fn default_audio_capacity() -> usize {
    DEFAULT_AUDIO_CAPACITY
}

impl RelayMode {
    /// Queued lane with default capacities.
    pub fn queued() -> Self {
        RelayMode::Queued {
            video_capacity: DEFAULT_VIDEO_CAPACITY,
            audio_capacity: DEFAULT_AUDIO_CAPACITY,
        }
    }
}

/// Everything needed to start a relay session.
///
/// ```yaml
/// capture_device: "synthetic:0"
/// output_device: "synthetic:1"
/// display_mode: "1080p25"
/// relay_mode:
///   kind: queued
///   video_capacity: 12
/// duration_secs: 10
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub capture_device: String,
    pub output_device: String,
    pub display_mode: DisplayMode,
    pub pixel_format: PixelFormat,
    pub audio: AudioFormat,
    pub relay_mode: RelayMode,
    /// Stop after this many seconds; run until interrupted when unset
    pub duration_secs: Option<u64>,
    pub rate_window_ms: u64,
    pub synthetic: SyntheticOptions,
    /// Written as `none`, `always` or `{ every_nth: N }`
    #[serde(with = "serde_yaml_ng::with::singleton_map")]
    pub output_failure: FailureInjection,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            capture_device: "synthetic:0".to_string(),
            output_device: "synthetic:1".to_string(),
            display_mode: DisplayMode::Hd1080i5994,
            pixel_format: PixelFormat::Yuv10Bit,
            audio: AudioFormat::default(),
            relay_mode: RelayMode::Direct,
            duration_secs: None,
            rate_window_ms: MIN_RATE_WINDOW.as_millis() as u64,
            synthetic: SyntheticOptions::default(),
            output_failure: FailureInjection::None,
        }
    }
}

impl RelayConfig {
    /// Load and validate a YAML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| RelayError::io_error(path, e))?;
        let config: Self = serde_yaml_ng::from_str(&yaml)
            .map_err(|e| RelayError::config_error(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate YAML from memory.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)
            .map_err(|e| RelayError::config_error("<inline>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no session could start with.
    pub fn validate(&self) -> Result<()> {
        if let RelayMode::Queued { video_capacity, audio_capacity } = self.relay_mode {
            if video_capacity == 0 || audio_capacity == 0 {
                return Err(RelayError::configuration_rejected(
                    "relay queue",
                    "queue capacities must be at least one unit",
                ));
            }
        }

        if self.rate_window() < MIN_RATE_WINDOW {
            return Err(RelayError::configuration_rejected(
                "metrics",
                format!(
                    "rate window of {} ms is shorter than the {} ms minimum",
                    self.rate_window_ms,
                    MIN_RATE_WINDOW.as_millis()
                ),
            ));
        }

        if self.duration_secs == Some(0) {
            return Err(RelayError::configuration_rejected(
                "session",
                "duration must be at least one second",
            ));
        }

        self.audio.validate("audio")
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }
}
