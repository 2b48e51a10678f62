//! Error types for the relay.
//!
//! Errors split into two families that the relay treats very differently:
//!
//! - **Setup errors** ([`RelayError`]) happen while a session is being
//!   brought up: a device that cannot be found, a format a collaborator
//!   refuses, a configuration file that does not parse. They are fatal and
//!   surface to the caller before any frame is relayed.
//! - **Steady-state errors** ([`SubmissionError`]) happen per unit while the
//!   relay is running. They are never propagated: the scheduler counts the
//!   unit as dropped and carries on with the next arrival.
//!
//! ```rust
//! use framerelay::RelayError;
//!
//! let error = RelayError::device_unavailable("decklink:3", "sub-device not present");
//! assert!(error.is_fatal());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T, E = RelayError> = std::result::Result<T, E>;

/// Main error type for relay setup and control.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RelayError {
    #[error("Device unavailable: {device} ({reason})")]
    DeviceUnavailable { device: String, reason: String },

    #[error("Configuration rejected by {stage}: {details}")]
    ConfigurationRejected { stage: String, details: String },

    #[error("Submission to output failed: {0}")]
    Submission(#[from] SubmissionError),

    #[error("Invalid configuration in {path}: {details}")]
    Config { path: PathBuf, details: String },

    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No capture event within {duration:?}")]
    Timeout { duration: Duration },
}

/// Failure of a single scheduling call to the output sink.
///
/// Always recovered locally by counting the unit as dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SubmissionError {
    #[error("output is not ready to accept units")]
    NotReady,

    #[error("output has been stopped")]
    Stopped,

    #[error("output rejected the unit: {reason}")]
    Rejected { reason: String },
}

impl RelayError {
    /// Returns whether this error halts the session.
    ///
    /// Only setup-time failures are fatal; anything that can happen while
    /// units are flowing is absorbed by the drop counters instead.
    pub fn is_fatal(&self) -> bool {
        match self {
            RelayError::DeviceUnavailable { .. } => true,
            RelayError::ConfigurationRejected { .. } => true,
            RelayError::Config { .. } => true,
            RelayError::Io { .. } => true,
            RelayError::Submission(_) => false,
            RelayError::Timeout { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            RelayError::DeviceUnavailable { .. } => vec![
                "Check the device name and sub-device index",
                "Verify the capture and output hardware is connected",
                "Run with --log-level debug to list discovered devices",
            ],
            RelayError::ConfigurationRejected { .. } => vec![
                "Pick a display mode supported by both capture and output",
                "Use 48 kHz audio with 2, 8 or 16 channels",
                "Use distinct sub-devices for capture and output",
            ],
            RelayError::Submission(_) => vec![
                "Check that output playback was started",
                "Increase the relay queue capacity",
            ],
            RelayError::Config { .. } => vec![
                "Check the YAML syntax of the configuration file",
                "Compare field names against the documented defaults",
            ],
            RelayError::Io { .. } => vec![
                "Check the file exists and is readable",
                "Check file permissions",
            ],
            RelayError::Timeout { .. } => vec![
                "Check the input signal is connected and stable",
                "Verify the capture source is producing frames",
            ],
        }
    }

    /// Helper constructor for missing devices.
    pub fn device_unavailable(device: impl Into<String>, reason: impl Into<String>) -> Self {
        RelayError::DeviceUnavailable { device: device.into(), reason: reason.into() }
    }

    /// Helper constructor for formats or profiles refused by a collaborator.
    pub fn configuration_rejected(stage: impl Into<String>, details: impl Into<String>) -> Self {
        RelayError::ConfigurationRejected { stage: stage.into(), details: details.into() }
    }

    /// Helper constructor for configuration parse and validation errors.
    pub fn config_error(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        RelayError::Config { path: path.into(), details: details.into() }
    }

    /// Helper constructor for file errors with path context.
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RelayError::Io { path: path.into(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn error_messages_carry_their_context(
                device in "[a-z]+:[0-9]",
                reason in ".*",
                stage in "[a-z ]+",
                details in ".*",
                duration_ms in 1u64..60000u64
            ) {
                let unavailable = RelayError::device_unavailable(device.clone(), reason.clone());
                let rejected = RelayError::configuration_rejected(stage.clone(), details.clone());
                let timeout = RelayError::Timeout { duration: Duration::from_millis(duration_ms) };

                let unavailable_msg = unavailable.to_string();
                prop_assert!(unavailable_msg.contains(&device));
                prop_assert!(unavailable_msg.contains(&reason));

                let rejected_msg = rejected.to_string();
                prop_assert!(rejected_msg.contains(&stage));
                prop_assert!(rejected_msg.contains(&details));

                prop_assert!(!timeout.to_string().is_empty());
            }

            #[test]
            fn submission_errors_are_never_fatal(reason in ".*") {
                let variants = [
                    SubmissionError::NotReady,
                    SubmissionError::Stopped,
                    SubmissionError::Rejected { reason },
                ];
                for variant in variants {
                    let error: RelayError = variant.into();
                    prop_assert!(!error.is_fatal());
                }
            }
        }
    }

    #[test]
    fn setup_errors_are_fatal() {
        assert!(RelayError::device_unavailable("x:0", "missing").is_fatal());
        assert!(RelayError::configuration_rejected("output audio", "bad rate").is_fatal());
        assert!(RelayError::config_error("relay.yaml", "bad").is_fatal());
        assert!(!RelayError::Timeout { duration: Duration::from_secs(1) }.is_fatal());
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<RelayError>();
        assert_send_sync_static::<SubmissionError>();

        let error = RelayError::device_unavailable("x:0", "missing");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn every_error_has_suggestions() {
        let errors = [
            RelayError::device_unavailable("x:0", "missing"),
            RelayError::configuration_rejected("capture", "mode"),
            RelayError::Submission(SubmissionError::NotReady),
            RelayError::config_error("relay.yaml", "bad"),
            RelayError::io_error("relay.yaml", std::io::Error::other("denied")),
            RelayError::Timeout { duration: Duration::from_secs(1) },
        ];

        for error in &errors {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty(), "no suggestions for {error}");
            for suggestion in suggestions {
                assert!(suggestion.len() > 5);
            }
        }
    }

    #[test]
    fn io_error_keeps_source() {
        let error = RelayError::io_error("relay.yaml", std::io::Error::other("denied"));
        let source = std::error::Error::source(&error).expect("source should be attached");
        assert_eq!(source.to_string(), "denied");
    }
}
