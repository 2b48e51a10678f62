//! Scheduling requests and completion outcomes.

use serde::{Deserialize, Serialize};

use super::clock::{TimeScale, TimeValue};

/// A unit paired with its output presentation time.
///
/// Immutable once built; the output sink consumes it with
/// [`into_parts`](Self::into_parts).
#[derive(Debug)]
pub struct ScheduleRequest<U> {
    unit: U,
    schedule_time: TimeValue,
    schedule_duration: TimeValue,
    time_scale: TimeScale,
}

impl<U> ScheduleRequest<U> {
    pub fn new(
        unit: U,
        schedule_time: TimeValue,
        schedule_duration: TimeValue,
        time_scale: TimeScale,
    ) -> Self {
        Self { unit, schedule_time, schedule_duration, time_scale }
    }

    pub fn unit(&self) -> &U {
        &self.unit
    }

    pub fn schedule_time(&self) -> TimeValue {
        self.schedule_time
    }

    pub fn schedule_duration(&self) -> TimeValue {
        self.schedule_duration
    }

    pub fn time_scale(&self) -> TimeScale {
        self.time_scale
    }

    /// Take ownership of the unit and its timing.
    pub fn into_parts(self) -> (U, TimeValue, TimeValue, TimeScale) {
        (self.unit, self.schedule_time, self.schedule_duration, self.time_scale)
    }
}

/// Outcome the output reports for each scheduled video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompletionResult {
    /// Displayed on time
    Completed,
    /// Displayed, but after its schedule time
    DisplayedLate,
    /// Never displayed because the output fell behind
    Dropped,
    /// Discarded when playback stopped
    Flushed,
}
