//! Output sink implementations

pub mod simulated;

pub use simulated::{FailureInjection, SimulatedOutput};
