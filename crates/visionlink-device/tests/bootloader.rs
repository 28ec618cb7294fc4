use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use visionlink_device::{
    BootState, BootloaderConfig, DeviceBootloader, DeviceError, FirmwareSource, Pipeline,
    UdsBackend, Version, XLinkOut, BOOTLOADER_VERSION,
};
use visionlink_package::{SbrPackage, FIRMWARE_SECTION, PIPELINE_SECTION};
use visionlink_protocol::bootloader::Storage;
use visionlink_sim::{SimConfig, SimDevice, SimHandle};

fn temp_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should be after epoch")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("vl-bl-{tag}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn sim(tag: &str, config: SimConfig) -> (PathBuf, SimHandle) {
    let dir = temp_dir(tag);
    let handle = SimDevice::spawn(dir.join("dev.sock"), config).expect("sim should start");
    (dir, handle)
}

fn open(dir: &PathBuf, sim: &SimHandle) -> DeviceBootloader {
    let config = BootloaderConfig {
        watchdog_timeout: Duration::from_millis(500),
        ..BootloaderConfig::default()
    };
    DeviceBootloader::open(sim.device_info(), &UdsBackend::new(dir), config)
        .expect("bootloader should open")
}

fn pipeline() -> Pipeline {
    let mut pipeline = Pipeline::new();
    pipeline.add_node(XLinkOut::new("preview"));
    pipeline
}

#[test]
fn flashes_pipeline_with_progress() {
    let (dir, sim) = sim("flash", SimConfig::new("BL-F", BootState::Unbooted));
    let bootloader = open(&dir, &sim);
    assert!(bootloader.is_embedded_version());
    assert_eq!(sim.state(), BootState::Bootloader);
    assert_eq!(bootloader.get_bootloader_version().unwrap(), BOOTLOADER_VERSION);

    let mut progress = Vec::new();
    let (ok, message) = bootloader
        .flash(|value| progress.push(value), &pipeline())
        .unwrap();
    assert!(ok, "flash failed: {message}");
    assert_eq!(message, "");
    assert_eq!(progress, [0.3, 0.6, 0.9]);

    let flashed = sim.flashed(Storage::Sbr).expect("package should be stored");
    let package = SbrPackage::parse(&flashed).expect("package should parse");
    assert!(package.section(FIRMWARE_SECTION).is_some());
    assert!(package.section(PIPELINE_SECTION).is_some());

    bootloader.close();
    assert!(sim.wait_idle(BootState::Unbooted, Duration::from_secs(5)));
}

#[test]
fn flash_failure_is_returned_not_raised() {
    let config = SimConfig {
        flash_error: Some("flash write failed".to_string()),
        flash_progress: vec![0.5],
        ..SimConfig::new("BL-E", BootState::Bootloader)
    };
    let (dir, sim) = sim("flash-error", config);
    let bootloader = open(&dir, &sim);

    let mut updates = 0;
    let (ok, message) = bootloader
        .flash(|_| updates += 1, &pipeline())
        .unwrap();
    assert!(!ok);
    assert_eq!(message, "flash write failed");
    assert_eq!(updates, 1);
    assert!(sim.flashed(Storage::Sbr).is_none());
}

#[test]
fn unexpected_flash_reply_is_reported() {
    let config = SimConfig {
        flash_unknown_response: true,
        flash_progress: vec![0.25, 0.5],
        ..SimConfig::new("BL-U", BootState::Bootloader)
    };
    let (dir, sim) = sim("flash-unknown", config);
    let bootloader = open(&dir, &sim);

    let mut progress = Vec::new();
    let (ok, message) = bootloader
        .flash(|value| progress.push(value), &pipeline())
        .unwrap();
    assert!(!ok);
    assert_eq!(message, "Unknown response from bootloader while flashing");
    assert_eq!(progress, [0.25, 0.5]);
    assert!(sim.flashed(Storage::Sbr).is_none());
}

#[test]
fn device_reset_closes_bootloader_session() {
    let (dir, sim) = sim("bl-reset", SimConfig::new("BL-D", BootState::Bootloader));
    let bootloader = open(&dir, &sim);
    assert!(!bootloader.is_closed());

    sim.reset();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !bootloader.is_closed() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(bootloader.is_closed(), "watchdog should notice the lost device");
    assert!(matches!(bootloader.get_bootloader_version(), Err(DeviceError::Closed)));
    assert!(matches!(
        bootloader.flash_depthai_application_package(|_| {}, b"BR"),
        Err(DeviceError::Closed)
    ));
}

#[test]
fn attaches_to_resident_bootloader() {
    let config = SimConfig {
        bootloader_version: Version::new(0, 0, 12),
        ..SimConfig::new("BL-R", BootState::Bootloader)
    };
    let (dir, sim) = sim("resident", config);
    let bootloader = open(&dir, &sim);

    assert!(!bootloader.is_embedded_version());
    let version = bootloader.get_bootloader_version().unwrap();
    assert_eq!(version, Version::new(0, 0, 12));
    assert!(version < DeviceBootloader::embedded_bootloader_version());

    let (ok, _) = bootloader.flash_bootloader(|_| {}).unwrap();
    assert!(ok);
    assert_eq!(
        sim.flashed(Storage::Bootloader),
        Some(DeviceBootloader::embedded_bootloader_binary().unwrap())
    );

    drop(bootloader);
    assert!(sim.wait_idle(BootState::Bootloader, Duration::from_secs(5)));
}

#[test]
fn booted_device_is_rejected() {
    let (dir, sim) = sim("booted", SimConfig::new("BL-B", BootState::Booted));
    let err = DeviceBootloader::open(sim.device_info(), &UdsBackend::new(&dir), BootloaderConfig::default())
        .unwrap_err();
    assert!(matches!(err, DeviceError::InvalidBootState(BootState::Booted)), "got {err:?}");
}

#[test]
fn closed_session_refuses_requests() {
    let (dir, sim) = sim("closed", SimConfig::new("BL-C", BootState::Bootloader));
    let bootloader = open(&dir, &sim);
    bootloader.close();
    bootloader.close();

    assert!(bootloader.is_closed());
    assert!(matches!(bootloader.get_bootloader_version(), Err(DeviceError::Closed)));
    assert!(matches!(
        bootloader.flash_depthai_application_package(|_| {}, b"BR"),
        Err(DeviceError::Closed)
    ));
}

#[test]
fn saved_package_matches_created_package() {
    let dir = temp_dir("save");
    let path = dir.join("app.sbr");
    let pipeline = pipeline();

    let size = DeviceBootloader::save_depthai_application_package(
        &path,
        &pipeline,
        &FirmwareSource::Embedded,
        false,
    )
    .unwrap();
    let saved = std::fs::read(&path).unwrap();
    assert_eq!(saved.len(), size);

    let created =
        DeviceBootloader::create_depthai_application_package(&pipeline, &FirmwareSource::Embedded, false)
            .unwrap();
    assert_eq!(saved, created);
    SbrPackage::parse(&saved).expect("saved package should parse");
}
