//! Stream utilities for observing a running session

pub mod rate;

pub use rate::RateWindows;
