//! Integer clock model shared by the capture and output sides.
//!
//! All timestamps are signed tick counts in a [`ClockDomain`]. Conversion
//! between domains goes through 128-bit integer arithmetic so a session can
//! run for days without the rounding drift a floating-point conversion would
//! accumulate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;

/// A timestamp or duration expressed in ticks of some [`ClockDomain`].
pub type TimeValue = i64;

/// Ticks per second of a clock domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct TimeScale(NonZeroU64);

impl TimeScale {
    /// Nanosecond resolution.
    pub const NANOS: TimeScale = TimeScale(NonZeroU64::new(1_000_000_000).unwrap());

    /// Create a time scale; `None` for zero ticks per second.
    pub const fn new(ticks_per_second: u64) -> Option<Self> {
        match NonZeroU64::new(ticks_per_second) {
            Some(ticks) => Some(TimeScale(ticks)),
            None => None,
        }
    }

    /// Number of ticks in one second.
    pub const fn ticks_per_second(self) -> u64 {
        self.0.get()
    }
}

impl TryFrom<u64> for TimeScale {
    type Error = String;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        TimeScale::new(value).ok_or_else(|| "time scale must be non-zero".to_string())
    }
}

impl From<TimeScale> for u64 {
    fn from(scale: TimeScale) -> Self {
        scale.ticks_per_second()
    }
}

impl fmt::Display for TimeScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/s", self.0)
    }
}

/// A tick rate plus the tick value that corresponds to session zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClockDomain {
    pub scale: TimeScale,
    pub epoch: TimeValue,
}

impl ClockDomain {
    /// Domain with the given scale and a zero epoch.
    pub const fn new(scale: TimeScale) -> Self {
        Self { scale, epoch: 0 }
    }

    /// Domain with an explicit epoch.
    pub const fn with_epoch(scale: TimeScale, epoch: TimeValue) -> Self {
        Self { scale, epoch }
    }
}

/// Rescale `value` from one tick rate to another, rounding toward negative
/// infinity. Results outside the `i64` range saturate.
pub fn rescale(value: TimeValue, from: TimeScale, to: TimeScale) -> TimeValue {
    if from == to {
        return value;
    }
    let numerator = value as i128 * to.ticks_per_second() as i128;
    let scaled = numerator.div_euclid(from.ticks_per_second() as i128);
    scaled.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Maps capture-side timestamps onto the output clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampMapper {
    capture: ClockDomain,
    output: ClockDomain,
}

impl TimestampMapper {
    pub fn new(capture: ClockDomain, output: ClockDomain) -> Self {
        Self { capture, output }
    }

    /// Mapper for the common case where both sides share one domain.
    pub fn passthrough(domain: ClockDomain) -> Self {
        Self { capture: domain, output: domain }
    }

    /// True when timestamps pass through unchanged.
    pub fn is_identity(&self) -> bool {
        self.capture == self.output
    }

    pub fn capture_domain(&self) -> ClockDomain {
        self.capture
    }

    pub fn output_domain(&self) -> ClockDomain {
        self.output
    }

    /// Convert a capture timestamp and duration into the output schedule time
    /// and duration.
    ///
    /// Each timestamp is converted from its absolute value, so rounding in one
    /// frame never carries into the next.
    pub fn to_output_time(
        &self,
        capture_time: TimeValue,
        capture_duration: TimeValue,
    ) -> (TimeValue, TimeValue) {
        if self.is_identity() {
            return (capture_time, capture_duration);
        }

        let since_epoch = capture_time.saturating_sub(self.capture.epoch);
        let schedule_time = rescale(since_epoch, self.capture.scale, self.output.scale)
            .saturating_add(self.output.epoch);

        // Derive the duration from the converted end point so consecutive
        // frames tile the output timeline without gaps or overlaps.
        let end = rescale(
            since_epoch.saturating_add(capture_duration),
            self.capture.scale,
            self.output.scale,
        )
        .saturating_add(self.output.epoch);

        (schedule_time, end.saturating_sub(schedule_time))
    }
}
