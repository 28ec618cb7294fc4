//! The bootloader session: query and flash a device sitting in its
//! bootloader.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, info};
use visionlink_package::ApplicationPackage;
use visionlink_protocol::bootloader::{Request, Response, Storage, WATCHDOG_KEEPALIVE, WATCHDOG_RESET};
use visionlink_protocol::streams::{
    BOOTLOADER_MAX_SIZE, BOOTLOADER_SETTLE_DELAY, BOOTLOADER_STREAM, WATCHDOG_MAX_SIZE,
    WATCHDOG_STREAM,
};
use visionlink_protocol::Version;
use visionlink_stream::{
    BootState, DeviceInfo, ImageKind, LinkBackend, LinkConnection, LinkError, StreamChannel,
    UdsBackend,
};

use crate::config::{BootloaderConfig, FirmwareSource};
use crate::error::{DeviceError, Result};
use crate::init::initialize;
use crate::pipeline::Pipeline;
use crate::resources::{self, FirmwareProvider, Resources, BOOTLOADER_VERSION};
use crate::worker::{pause, Worker};

const UNKNOWN_FLASH_RESPONSE: &str = "Unknown response from bootloader while flashing";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Session with a device's bootloader.
///
/// An unbooted device is booted with the library's bootloader image; a
/// device already in its bootloader is attached to. A watchdog thread keeps
/// the bootloader alive and resets the device when the session closes.
pub struct DeviceBootloader {
    info: DeviceInfo,
    embedded: bool,
    closed: AtomicBool,
    link: Mutex<Option<LinkConnection>>,
    stream: StreamChannel,
    /// Held for a whole request/response exchange.
    exchange: Mutex<()>,
    watchdog: Worker,
}

impl DeviceBootloader {
    pub fn new(info: DeviceInfo) -> Result<Self> {
        Self::open(info, &UdsBackend::from_env(), BootloaderConfig::from_env())
    }

    pub fn open(
        mut info: DeviceInfo,
        backend: &dyn LinkBackend,
        config: BootloaderConfig,
    ) -> Result<Self> {
        initialize();
        let (link, embedded) = match info.state {
            BootState::Unbooted => {
                let image = resources::bootloader_firmware(&config.firmware, Resources::global())?;
                let stream = backend.connect(&info)?;
                let (link, _) =
                    match visionlink_stream::boot(stream, ImageKind::Bootloader, &image, &config.link) {
                        Ok(booted) => booted,
                        Err(LinkError::UnexpectedState { actual, .. }) => {
                            return Err(DeviceError::InvalidBootState(actual))
                        }
                        Err(err) => return Err(err.into()),
                    };
                (link, true)
            }
            BootState::Bootloader => {
                let (link, hello) =
                    visionlink_stream::attach(backend.connect(&info)?, &config.link)?;
                if hello.state != BootState::Bootloader {
                    return Err(DeviceError::InvalidBootState(hello.state));
                }
                (link, false)
            }
            other => return Err(DeviceError::InvalidBootState(other)),
        };
        info.state = BootState::Bootloader;

        let stream = link.open_stream(BOOTLOADER_STREAM, BOOTLOADER_MAX_SIZE)?;
        let watchdog_stream = link.open_stream(WATCHDOG_STREAM, WATCHDOG_MAX_SIZE)?;
        info!(device_id = %info.device_id, embedded, "bootloader session established");

        let bootloader = Self {
            info,
            embedded,
            closed: AtomicBool::new(false),
            link: Mutex::new(Some(link)),
            stream,
            exchange: Mutex::new(()),
            watchdog: Worker::new(),
        };
        let interval = config.watchdog_timeout / 2;
        let reset_wait = config.watchdog_timeout;
        bootloader
            .watchdog
            .start("visionlink-bootloader-watchdog", move |running| {
                while running.load(Ordering::SeqCst) {
                    if watchdog_stream.write(&WATCHDOG_KEEPALIVE).is_err() {
                        return;
                    }
                    pause(running, interval);
                }
                if watchdog_stream.write(&WATCHDOG_RESET).is_ok() {
                    // The bootloader drops the link as it resets.
                    let _ = watchdog_stream.read_timeout(reset_wait);
                    thread::sleep(BOOTLOADER_SETTLE_DELAY);
                }
            })?;
        Ok(bootloader)
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Whether this session booted the library's own bootloader image.
    pub fn is_embedded_version(&self) -> bool {
        self.embedded
    }

    /// Version of the bootloader image shipped with the library.
    pub fn embedded_bootloader_version() -> Version {
        BOOTLOADER_VERSION
    }

    pub fn embedded_bootloader_binary() -> Result<Vec<u8>> {
        Resources::global().bootloader_firmware()
    }

    pub fn get_bootloader_version(&self) -> Result<Version> {
        self.check_closed()?;
        let _exchange = lock(&self.exchange);
        self.stream.write(&Request::GetBootloaderVersion.to_bytes())?;
        match Response::parse(&self.stream.read()?)? {
            Response::BootloaderVersion(version) => Ok(version),
            other => Err(DeviceError::BootloaderResponse(format!("{other:?}"))),
        }
    }

    /// Build an application package from `pipeline` and flash it.
    pub fn flash(
        &self,
        progress: impl FnMut(f32),
        pipeline: &Pipeline,
    ) -> Result<(bool, String)> {
        let package = Self::create_depthai_application_package(pipeline, &FirmwareSource::Embedded, false)?;
        self.flash_depthai_application_package(progress, &package)
    }

    /// Flash an already built application package.
    pub fn flash_depthai_application_package(
        &self,
        progress: impl FnMut(f32),
        package: &[u8],
    ) -> Result<(bool, String)> {
        self.flash_image(Storage::Sbr, package, progress)
    }

    /// Replace the bootloader with the one shipped with the library.
    pub fn flash_bootloader(&self, progress: impl FnMut(f32)) -> Result<(bool, String)> {
        let image = Self::embedded_bootloader_binary()?;
        self.flash_image(Storage::Bootloader, &image, progress)
    }

    fn flash_image(
        &self,
        storage: Storage,
        data: &[u8],
        mut progress: impl FnMut(f32),
    ) -> Result<(bool, String)> {
        self.check_closed()?;
        let total_size = u32::try_from(data.len())
            .map_err(|_| DeviceError::Firmware(format!("image of {} bytes is too large", data.len())))?;
        // At most 4 GiB over 5 MiB packets, so this fits.
        let num_packets = data.len().div_ceil(BOOTLOADER_MAX_SIZE) as u32;

        let _exchange = lock(&self.exchange);
        let request = Request::UpdateFlash {
            storage,
            total_size,
            num_packets,
        };
        self.stream.write(&request.to_bytes())?;
        self.stream.write_split(data)?;
        debug!(?storage, total_size, num_packets, "flash image sent");

        loop {
            let packet = self.stream.read()?;
            match Response::parse(&packet) {
                Ok(Response::FlashStatusUpdate { progress: value }) => progress(value),
                Ok(Response::FlashComplete { success, error_msg }) => {
                    info!(?storage, success, "flash finished");
                    return Ok((success, error_msg));
                }
                _ => return Ok((false, UNKNOWN_FLASH_RESPONSE.to_string())),
            }
        }
    }

    /// Package `pipeline` together with application firmware into SBR
    /// bytes.
    pub fn create_depthai_application_package(
        pipeline: &Pipeline,
        firmware: &FirmwareSource,
        usb2_mode: bool,
    ) -> Result<Vec<u8>> {
        let serialized = pipeline.serialize()?;
        let firmware = resources::device_firmware(
            firmware,
            Resources::global(),
            usb2_mode,
            serialized.firmware_version,
        )?;
        let package = ApplicationPackage {
            firmware: &firmware,
            pipeline: &serialized.schema,
            assets: &serialized.assets,
            asset_storage: &serialized.asset_storage,
        };
        Ok(package.to_bytes()?)
    }

    /// Write a package to `path`, returning its size.
    pub fn save_depthai_application_package(
        path: impl AsRef<Path>,
        pipeline: &Pipeline,
        firmware: &FirmwareSource,
        usb2_mode: bool,
    ) -> Result<usize> {
        let bytes = Self::create_depthai_application_package(pipeline, firmware, usb2_mode)?;
        let path = path.as_ref();
        std::fs::write(path, &bytes).map_err(|source| DeviceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), size = bytes.len(), "application package saved");
        Ok(bytes.len())
    }

    /// Closed explicitly, or the watchdog could no longer reach the device.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || !self.watchdog.is_running()
    }

    fn check_closed(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DeviceError::Closed);
        }
        Ok(())
    }

    /// Stop the watchdog, which resets the device, then drop the link.
    /// Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.watchdog.stop();
        self.watchdog.join();
        if let Some(link) = lock(&self.link).take() {
            link.close();
        }
        debug!(device_id = %self.info.device_id, "bootloader session closed");
    }
}

impl Drop for DeviceBootloader {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DeviceBootloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBootloader")
            .field("info", &self.info)
            .field("embedded", &self.embedded)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
