//! Video display modes, pixel formats and the audio format.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::clock::{TimeScale, TimeValue, rescale};
use crate::{RelayError, Result};

/// Video standard a capture or output is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DisplayMode {
    Ntsc,
    Pal,
    Hd720p50,
    Hd720p5994,
    Hd720p60,
    Hd1080p2398,
    Hd1080p24,
    Hd1080p25,
    Hd1080p2997,
    Hd1080p30,
    Hd1080i50,
    Hd1080i5994,
    Hd1080i6000,
    Hd1080p50,
    Hd1080p5994,
    Hd1080p6000,
    Uhd2160p2997,
    Uhd2160p5994,
}

impl DisplayMode {
    pub const ALL: [DisplayMode; 18] = [
        DisplayMode::Ntsc,
        DisplayMode::Pal,
        DisplayMode::Hd720p50,
        DisplayMode::Hd720p5994,
        DisplayMode::Hd720p60,
        DisplayMode::Hd1080p2398,
        DisplayMode::Hd1080p24,
        DisplayMode::Hd1080p25,
        DisplayMode::Hd1080p2997,
        DisplayMode::Hd1080p30,
        DisplayMode::Hd1080i50,
        DisplayMode::Hd1080i5994,
        DisplayMode::Hd1080i6000,
        DisplayMode::Hd1080p50,
        DisplayMode::Hd1080p5994,
        DisplayMode::Hd1080p6000,
        DisplayMode::Uhd2160p2997,
        DisplayMode::Uhd2160p5994,
    ];

    /// Short name used in configuration files and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            DisplayMode::Ntsc => "ntsc",
            DisplayMode::Pal => "pal",
            DisplayMode::Hd720p50 => "720p50",
            DisplayMode::Hd720p5994 => "720p5994",
            DisplayMode::Hd720p60 => "720p60",
            DisplayMode::Hd1080p2398 => "1080p2398",
            DisplayMode::Hd1080p24 => "1080p24",
            DisplayMode::Hd1080p25 => "1080p25",
            DisplayMode::Hd1080p2997 => "1080p2997",
            DisplayMode::Hd1080p30 => "1080p30",
            DisplayMode::Hd1080i50 => "1080i50",
            DisplayMode::Hd1080i5994 => "1080i5994",
            DisplayMode::Hd1080i6000 => "1080i6000",
            DisplayMode::Hd1080p50 => "1080p50",
            DisplayMode::Hd1080p5994 => "1080p5994",
            DisplayMode::Hd1080p6000 => "1080p6000",
            DisplayMode::Uhd2160p2997 => "2160p2997",
            DisplayMode::Uhd2160p5994 => "2160p5994",
        }
    }

    /// Frame size in pixels.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            DisplayMode::Ntsc => (720, 486),
            DisplayMode::Pal => (720, 576),
            DisplayMode::Hd720p50 | DisplayMode::Hd720p5994 | DisplayMode::Hd720p60 => (1280, 720),
            DisplayMode::Uhd2160p2997 | DisplayMode::Uhd2160p5994 => (3840, 2160),
            _ => (1920, 1080),
        }
    }

    pub fn is_interlaced(self) -> bool {
        matches!(
            self,
            DisplayMode::Ntsc
                | DisplayMode::Pal
                | DisplayMode::Hd1080i50
                | DisplayMode::Hd1080i5994
                | DisplayMode::Hd1080i6000
        )
    }

    /// Frame duration and the time scale it is expressed in.
    ///
    /// Interlaced modes report the frame (field pair) rate, so 1080i59.94 is
    /// 1001/30000.
    pub fn frame_rate(self) -> (TimeValue, TimeScale) {
        let (duration, ticks) = match self {
            DisplayMode::Ntsc | DisplayMode::Hd1080p2997 | DisplayMode::Hd1080i5994 => {
                (1001, 30_000)
            }
            DisplayMode::Uhd2160p2997 => (1001, 30_000),
            DisplayMode::Pal | DisplayMode::Hd1080p25 | DisplayMode::Hd1080i50 => (1000, 25_000),
            DisplayMode::Hd720p50 | DisplayMode::Hd1080p50 => (1000, 50_000),
            DisplayMode::Hd720p5994 | DisplayMode::Hd1080p5994 | DisplayMode::Uhd2160p5994 => {
                (1001, 60_000)
            }
            DisplayMode::Hd720p60 | DisplayMode::Hd1080p6000 => (1000, 60_000),
            DisplayMode::Hd1080p2398 => (1001, 24_000),
            DisplayMode::Hd1080p24 => (1000, 24_000),
            DisplayMode::Hd1080p30 | DisplayMode::Hd1080i6000 => (1000, 30_000),
        };
        (duration, TimeScale::new(ticks).unwrap_or(TimeScale::NANOS))
    }

    /// Nominal frames per second, for display only.
    pub fn frames_per_second(self) -> f64 {
        let (duration, scale) = self.frame_rate();
        scale.ticks_per_second() as f64 / duration as f64
    }

    /// Wall-clock length of one frame.
    pub fn frame_interval(self) -> std::time::Duration {
        let (duration, scale) = self.frame_rate();
        let nanos = rescale(duration, scale, TimeScale::NANOS);
        std::time::Duration::from_nanos(nanos.max(1) as u64)
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        DisplayMode::ALL
            .iter()
            .copied()
            .find(|mode| mode.name() == wanted)
            .ok_or_else(|| format!("unknown display mode '{}'", s))
    }
}

impl TryFrom<String> for DisplayMode {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DisplayMode> for String {
    fn from(mode: DisplayMode) -> Self {
        mode.name().to_string()
    }
}

/// Pixel packing of a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    #[serde(rename = "8bit-yuv")]
    Yuv8Bit,
    #[serde(rename = "10bit-yuv")]
    Yuv10Bit,
    #[serde(rename = "8bit-argb")]
    Argb8Bit,
    #[serde(rename = "8bit-bgra")]
    Bgra8Bit,
    #[serde(rename = "10bit-rgb")]
    Rgb10Bit,
}

impl PixelFormat {
    /// Bytes in one line of `width` pixels.
    pub fn row_bytes(self, width: u32) -> usize {
        let width = width as usize;
        match self {
            PixelFormat::Yuv8Bit => width * 2,
            // v210 packs 48 pixels into 128 bytes
            PixelFormat::Yuv10Bit => width.div_ceil(48) * 128,
            PixelFormat::Argb8Bit | PixelFormat::Bgra8Bit => width * 4,
            // r210 rows are padded to 64 pixels
            PixelFormat::Rgb10Bit => width.div_ceil(64) * 256,
        }
    }
}

/// PCM audio format relayed alongside video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self { sample_rate: 48_000, channels: 2, bits_per_sample: 16 }
    }
}

impl AudioFormat {
    pub const SUPPORTED_CHANNELS: [u16; 3] = [2, 8, 16];

    /// Bytes in one sample frame (all channels).
    pub fn bytes_per_sample_frame(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    /// Check the format against what SDI embedded audio can carry.
    ///
    /// `stage` names the collaborator doing the check so a rejection says
    /// who refused it.
    pub fn validate(&self, stage: &str) -> Result<()> {
        if self.sample_rate != 48_000 {
            return Err(RelayError::configuration_rejected(
                stage,
                format!("unsupported sample rate {} Hz (only 48000 Hz)", self.sample_rate),
            ));
        }
        if !Self::SUPPORTED_CHANNELS.contains(&self.channels) {
            return Err(RelayError::configuration_rejected(
                stage,
                format!("unsupported channel count {} (2, 8 or 16)", self.channels),
            ));
        }
        if self.bits_per_sample != 16 && self.bits_per_sample != 32 {
            return Err(RelayError::configuration_rejected(
                stage,
                format!("unsupported sample depth {} bits (16 or 32)", self.bits_per_sample),
            ));
        }
        Ok(())
    }

    /// Sample frames falling in `[start, end)` of a timeline in `scale` ticks.
    ///
    /// Computed from absolute positions, so at 29.97 fps consecutive frames
    /// alternate between 1601 and 1602 samples without drift.
    pub fn sample_frames_between(&self, start: TimeValue, end: TimeValue, scale: TimeScale) -> u32 {
        let Some(rate) = TimeScale::new(self.sample_rate as u64) else {
            return 0;
        };
        let first = rescale(start, scale, rate);
        let last = rescale(end, scale, rate);
        last.saturating_sub(first).clamp(0, u32::MAX as i64) as u32
    }
}

/// Which aspects of the incoming signal changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatChangeEvents {
    pub display_mode: bool,
    pub field_dominance: bool,
    pub colorspace: bool,
}

/// Notification that the capture signal changed format mid-session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatChange {
    pub events: FormatChangeEvents,
    pub mode: DisplayMode,
    pub pixel_format: PixelFormat,
}
