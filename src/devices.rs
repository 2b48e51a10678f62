//! Device discovery and selection

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::capture::CaptureSource;
use crate::captures::{SyntheticCapture, SyntheticOptions};
use crate::output::OutputSink;
use crate::outputs::{FailureInjection, SimulatedOutput};
use crate::{RelayError, Result};

/// Model name of the software devices shipped with the crate.
pub const SYNTHETIC_MODEL: &str = "synthetic";

/// Sub-devices a synthetic card exposes.
const SYNTHETIC_SUB_DEVICES: u32 = 4;

/// A device addressed as `model:sub_index`, e.g. `synthetic:1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub model: String,
    pub sub_index: u32,
}

impl DeviceId {
    pub fn new(model: impl Into<String>, sub_index: u32) -> Self {
        Self { model: model.into(), sub_index }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.model, self.sub_index)
    }
}

impl FromStr for DeviceId {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        let (model, index) = s.rsplit_once(':').unwrap_or((s, "0"));
        if model.is_empty() {
            return Err(RelayError::device_unavailable(s, "missing model name"));
        }
        let sub_index = index
            .parse()
            .map_err(|_| RelayError::device_unavailable(s, "sub-device index is not a number"))?;
        Ok(Self { model: model.to_ascii_lowercase(), sub_index })
    }
}

/// One discovered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub display_name: String,
}

/// Devices present on this machine.
#[derive(Debug, Clone)]
pub struct DeviceCatalog {
    devices: Vec<DeviceInfo>,
}

impl DeviceCatalog {
    /// Enumerate available devices.
    pub fn discover() -> Self {
        let devices = (0..SYNTHETIC_SUB_DEVICES)
            .map(|index| DeviceInfo {
                id: DeviceId::new(SYNTHETIC_MODEL, index),
                display_name: format!("Synthetic I/O ({})", index + 1),
            })
            .collect::<Vec<_>>();
        debug!(count = devices.len(), "Discovered devices");
        Self { devices }
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    /// Look up a device by id string.
    pub fn find(&self, name: &str) -> Result<&DeviceInfo> {
        let id: DeviceId = name.parse()?;
        self.devices.iter().find(|d| d.id == id).ok_or_else(|| {
            RelayError::device_unavailable(name, format!("not found among {} devices", self.devices.len()))
        })
    }

    /// Check a capture/output pairing before either is opened.
    ///
    /// Sub-devices are half-duplex: one connector cannot capture and play
    /// out at the same time.
    pub fn check_pair(&self, capture: &str, output: &str) -> Result<()> {
        let capture = self.find(capture)?;
        let output = self.find(output)?;
        if capture.id == output.id {
            return Err(RelayError::configuration_rejected(
                "device selection",
                format!("{} is half-duplex and cannot both capture and play out", capture.id),
            ));
        }
        Ok(())
    }

    pub fn open_capture(&self, name: &str, options: SyntheticOptions) -> Result<Box<dyn CaptureSource>> {
        let info = self.find(name)?;
        debug!(device = %info.id, "Opening capture device");
        Ok(Box::new(SyntheticCapture::new(options)))
    }

    pub fn open_output(
        &self,
        name: &str,
        failure: FailureInjection,
        paced: bool,
    ) -> Result<Arc<dyn OutputSink>> {
        let info = self.find(name)?;
        debug!(device = %info.id, ?failure, paced, "Opening output device");
        let output = SimulatedOutput::new(info.id.to_string()).with_failure(failure);
        Ok(Arc::new(if paced { output } else { output.unpaced() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_ids() {
        assert_eq!("synthetic:2".parse::<DeviceId>().unwrap(), DeviceId::new("synthetic", 2));
        assert_eq!("Synthetic".parse::<DeviceId>().unwrap(), DeviceId::new("synthetic", 0));
        assert!(":1".parse::<DeviceId>().is_err());
        assert!("synthetic:x".parse::<DeviceId>().is_err());
    }

    #[test]
    fn unknown_devices_are_unavailable() {
        let catalog = DeviceCatalog::discover();
        let err = catalog.find("decklink:0").unwrap_err();
        assert!(matches!(err, RelayError::DeviceUnavailable { .. }));
        assert!(catalog.find("synthetic:9").is_err());
        assert!(catalog.open_capture("decklink:0", SyntheticOptions::default()).is_err());
    }

    #[test]
    fn same_sub_device_cannot_capture_and_play_out() {
        let catalog = DeviceCatalog::discover();
        let err = catalog.check_pair("synthetic:1", "synthetic:1").unwrap_err();
        assert!(matches!(err, RelayError::ConfigurationRejected { .. }));
        assert!(catalog.check_pair("synthetic:0", "synthetic:1").is_ok());
    }

    #[test]
    fn discovers_four_synthetic_sub_devices() {
        let catalog = DeviceCatalog::discover();
        assert_eq!(catalog.devices().len(), 4);
        assert_eq!(catalog.devices()[3].id.to_string(), "synthetic:3");
    }
}
