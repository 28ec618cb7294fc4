use std::path::Path;
use std::sync::OnceLock;

use tracing::debug;
use visionlink_protocol::{FirmwareHeader, FirmwareKind, Version};

use crate::config::FirmwareSource;
use crate::error::{DeviceError, Result};

/// Version of the device firmware shipped with the library.
pub const DEVICE_FIRMWARE_VERSION: Version = Version::new(2, 11, 0);
/// Version of the bootloader shipped with the library.
pub const BOOTLOADER_VERSION: Version = Version::new(0, 0, 15);

/// Supplies boot images to sessions.
pub trait FirmwareProvider: Send + Sync {
    /// Application firmware, optionally pinned to `version`.
    fn device_firmware(&self, usb2_mode: bool, version: Option<Version>) -> Result<Vec<u8>>;

    fn bootloader_firmware(&self) -> Result<Vec<u8>>;
}

/// The images embedded in this library.
pub struct Resources {
    device: OnceLock<Vec<u8>>,
    device_usb2: OnceLock<Vec<u8>>,
    bootloader: OnceLock<Vec<u8>>,
}

static RESOURCES: Resources = Resources {
    device: OnceLock::new(),
    device_usb2: OnceLock::new(),
    bootloader: OnceLock::new(),
};

impl Resources {
    pub fn global() -> &'static Resources {
        &RESOURCES
    }

    fn image(cell: &OnceLock<Vec<u8>>, kind: FirmwareKind, version: Version, body: &[u8]) -> Vec<u8> {
        cell.get_or_init(|| FirmwareHeader { kind, version }.build_image(body))
            .clone()
    }
}

impl FirmwareProvider for Resources {
    fn device_firmware(&self, usb2_mode: bool, version: Option<Version>) -> Result<Vec<u8>> {
        if let Some(wanted) = version {
            if wanted != DEVICE_FIRMWARE_VERSION {
                return Err(DeviceError::Firmware(format!(
                    "no embedded device firmware for version {wanted} (have {DEVICE_FIRMWARE_VERSION})"
                )));
            }
        }
        let image = if usb2_mode {
            Self::image(
                &self.device_usb2,
                FirmwareKind::Application,
                DEVICE_FIRMWARE_VERSION,
                b"visionlink device firmware (usb2)",
            )
        } else {
            Self::image(
                &self.device,
                FirmwareKind::Application,
                DEVICE_FIRMWARE_VERSION,
                b"visionlink device firmware",
            )
        };
        Ok(image)
    }

    fn bootloader_firmware(&self) -> Result<Vec<u8>> {
        Ok(Self::image(
            &self.bootloader,
            FirmwareKind::Bootloader,
            BOOTLOADER_VERSION,
            b"visionlink bootloader",
        ))
    }
}

/// Read a firmware image from disk.
pub fn read_firmware(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).map_err(|source| DeviceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), size = bytes.len(), "firmware loaded from file");
    Ok(bytes)
}

/// Resolve application firmware bytes for `source`.
pub fn device_firmware(
    source: &FirmwareSource,
    provider: &dyn FirmwareProvider,
    usb2_mode: bool,
    version: Option<Version>,
) -> Result<Vec<u8>> {
    match source {
        FirmwareSource::Embedded => provider.device_firmware(usb2_mode, version),
        FirmwareSource::Path(path) => read_firmware(path),
    }
}

/// Resolve bootloader firmware bytes for `source`.
pub fn bootloader_firmware(source: &FirmwareSource, provider: &dyn FirmwareProvider) -> Result<Vec<u8>> {
    match source {
        FirmwareSource::Embedded => provider.bootloader_firmware(),
        FirmwareSource::Path(path) => read_firmware(path),
    }
}
