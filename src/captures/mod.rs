//! Capture source implementations

pub mod synthetic;

pub use synthetic::{PlannedFormatChange, SyntheticCapture, SyntheticOptions};
