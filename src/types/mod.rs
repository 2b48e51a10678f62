//! Core types shared by every stage of the relay.
//!
//! ## Architecture
//!
//! - [`TimeScale`], [`ClockDomain`] and [`TimestampMapper`] describe time as
//!   integer ticks and map capture timestamps onto the output clock
//! - [`VideoFrame`] and [`AudioPacket`] carry an owned [`MediaBuffer`]; the
//!   buffer moves from capture to scheduler to output and is released by
//!   whoever holds it last
//! - [`ScheduleRequest`] pairs a unit with its output presentation time
//! - [`DisplayMode`], [`PixelFormat`] and [`AudioFormat`] describe the signal
//!
//! ## Usage Example
//!
//! ```rust
//! use framerelay::types::{ClockDomain, DisplayMode, TimestampMapper};
//!
//! let (frame_duration, scale) = DisplayMode::Hd1080i5994.frame_rate();
//! let mapper = TimestampMapper::passthrough(ClockDomain::new(scale));
//!
//! // Same domain on both sides: timestamps pass through untouched.
//! assert_eq!(mapper.to_output_time(42 * frame_duration, frame_duration), (42 * 1001, 1001));
//! ```

mod clock;
mod display_mode;
mod media;
mod schedule;

pub use clock::{ClockDomain, TimeScale, TimeValue, TimestampMapper, rescale};
pub use display_mode::{AudioFormat, DisplayMode, FormatChange, FormatChangeEvents, PixelFormat};
pub use media::{AudioPacket, MediaBuffer, MediaUnit, VideoFrame};
pub use schedule::{CompletionResult, ScheduleRequest};
