use std::path::PathBuf;
use std::time::Duration;

use visionlink_protocol::streams::{BOOTLOADER_WATCHDOG_TIMEOUT, DEVICE_WATCHDOG_TIMEOUT};
use visionlink_protocol::LogLevel;
use visionlink_stream::LinkConfig;

/// Path to device firmware, used instead of the embedded image.
pub const DEVICE_BINARY_ENV: &str = "VISIONLINK_DEVICE_BINARY";
/// Path to bootloader firmware, used instead of the embedded image.
pub const BOOTLOADER_BINARY_ENV: &str = "VISIONLINK_BOOTLOADER_BINARY";
/// Watchdog timeout override in milliseconds.
pub const WATCHDOG_TIMEOUT_ENV: &str = "VISIONLINK_WATCHDOG_TIMEOUT_MS";

/// Where a boot image comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FirmwareSource {
    /// Image shipped with the library.
    #[default]
    Embedded,
    Path(PathBuf),
}

impl FirmwareSource {
    fn from_env(var: &str) -> Self {
        match std::env::var_os(var) {
            Some(path) if !path.is_empty() => Self::Path(PathBuf::from(path)),
            _ => Self::Embedded,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub firmware: FirmwareSource,
    /// Request the firmware variant that keeps the link at USB2 speed.
    pub usb2_mode: bool,
    pub watchdog_timeout: Duration,
    /// What the device sends.
    pub log_level: LogLevel,
    /// What this host prints of what was sent.
    pub log_output_level: LogLevel,
    pub system_information_logging_rate_hz: f32,
    pub link: LinkConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            firmware: FirmwareSource::Embedded,
            usb2_mode: false,
            watchdog_timeout: DEVICE_WATCHDOG_TIMEOUT,
            log_level: LogLevel::Warn,
            log_output_level: LogLevel::Warn,
            system_information_logging_rate_hz: 1.0,
            link: LinkConfig::default(),
        }
    }
}

impl DeviceConfig {
    /// Defaults with `VISIONLINK_DEVICE_BINARY` and
    /// `VISIONLINK_WATCHDOG_TIMEOUT_MS` applied.
    pub fn from_env() -> Self {
        Self {
            firmware: FirmwareSource::from_env(DEVICE_BINARY_ENV),
            watchdog_timeout: watchdog_from_env().unwrap_or(DEVICE_WATCHDOG_TIMEOUT),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct BootloaderConfig {
    pub firmware: FirmwareSource,
    pub watchdog_timeout: Duration,
    pub link: LinkConfig,
}

impl Default for BootloaderConfig {
    fn default() -> Self {
        Self {
            firmware: FirmwareSource::Embedded,
            watchdog_timeout: BOOTLOADER_WATCHDOG_TIMEOUT,
            link: LinkConfig::default(),
        }
    }
}

impl BootloaderConfig {
    /// Defaults with `VISIONLINK_BOOTLOADER_BINARY` and
    /// `VISIONLINK_WATCHDOG_TIMEOUT_MS` applied.
    pub fn from_env() -> Self {
        Self {
            firmware: FirmwareSource::from_env(BOOTLOADER_BINARY_ENV),
            watchdog_timeout: watchdog_from_env().unwrap_or(BOOTLOADER_WATCHDOG_TIMEOUT),
            ..Self::default()
        }
    }
}

fn watchdog_from_env() -> Option<Duration> {
    let raw = std::env::var(WATCHDOG_TIMEOUT_ENV).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => {
            tracing::warn!(value = %raw, "ignoring invalid {WATCHDOG_TIMEOUT_ENV}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DeviceConfig::default();
        assert_eq!(config.firmware, FirmwareSource::Embedded);
        assert_eq!(config.watchdog_timeout, Duration::from_millis(1500));
        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(BootloaderConfig::default().watchdog_timeout, Duration::from_millis(1500));
    }
}
