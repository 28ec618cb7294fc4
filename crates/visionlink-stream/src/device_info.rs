use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Boot state of a device as reported over the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootState {
    /// Powered, waiting for a firmware image.
    Unbooted,
    /// Running the resident bootloader; accepts flashing requests.
    Bootloader,
    /// Running application firmware; owned by a session.
    Booted,
}

impl BootState {
    pub fn as_str(self) -> &'static str {
        match self {
            BootState::Unbooted => "unbooted",
            BootState::Bootloader => "bootloader",
            BootState::Booted => "booted",
        }
    }
}

impl fmt::Display for BootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one physical device and its last known boot state.
///
/// Discovery hands out snapshots; sessions update `state` in place as they
/// boot the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Hardware identifier (MX id).
    pub device_id: String,
    pub state: BootState,
    /// Transport address the device is reachable at.
    pub address: PathBuf,
}

impl DeviceInfo {
    pub fn new(device_id: impl Into<String>, state: BootState, address: impl Into<PathBuf>) -> Self {
        Self {
            device_id: device_id.into(),
            state,
            address: address.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&BootState::Bootloader).unwrap(),
            "\"bootloader\""
        );
        let state: BootState = serde_json::from_str("\"booted\"").unwrap();
        assert_eq!(state, BootState::Booted);
        assert_eq!(BootState::Unbooted.to_string(), "unbooted");
    }
}
