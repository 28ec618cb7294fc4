use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::json;
use visionlink_protocol::bootloader::{Request, Response};
use visionlink_protocol::rpc::methods;
use visionlink_protocol::streams::{BOOTLOADER_MAX_SIZE, BOOTLOADER_STREAM, RPC_MAX_SIZE, RPC_STREAM};
use visionlink_protocol::{FirmwareHeader, FirmwareKind, RpcRequest, RpcResponse, Version};
use visionlink_sim::{SimConfig, SimDevice};
use visionlink_stream::{
    attach, boot, get_all_available_devices, BootState, ImageKind, LinkBackend, LinkConfig,
    LinkError, UdsBackend,
};

fn temp_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should be after epoch")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("vl-sim-{tag}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn image(kind: FirmwareKind) -> Vec<u8> {
    FirmwareHeader {
        kind,
        version: Version::new(2, 11, 0),
    }
    .build_image(b"test firmware")
}

#[test]
fn discovery_sees_simulated_devices() {
    let dir = temp_dir("discover");
    let _a = SimDevice::spawn(dir.join("a.sock"), SimConfig::new("DEV-A", BootState::Unbooted))
        .expect("sim should start");
    let _b = SimDevice::spawn(dir.join("b.sock"), SimConfig::new("DEV-B", BootState::Bootloader))
        .expect("sim should start");

    let devices = get_all_available_devices(&UdsBackend::new(&dir)).expect("scan should work");
    let mut ids: Vec<(String, BootState)> = devices
        .into_iter()
        .map(|info| (info.device_id, info.state))
        .collect();
    ids.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        ids,
        vec![
            ("DEV-A".to_string(), BootState::Unbooted),
            ("DEV-B".to_string(), BootState::Bootloader),
        ]
    );
}

#[test]
fn booted_device_answers_rpc_and_resets_on_close() {
    let dir = temp_dir("rpc");
    let sim = SimDevice::spawn(dir.join("dev.sock"), SimConfig::new("DEV-RPC", BootState::Unbooted))
        .expect("sim should start");
    let backend = UdsBackend::new(&dir);

    let stream = backend.connect(&sim.device_info()).expect("connect should work");
    let (link, hello) = boot(
        stream,
        ImageKind::Application,
        &image(FirmwareKind::Application),
        &LinkConfig::default(),
    )
    .expect("boot should succeed");
    assert_eq!(hello.state, BootState::Booted);
    assert_eq!(sim.state(), BootState::Booted);

    let rpc = link.open_stream(RPC_STREAM, RPC_MAX_SIZE).expect("rpc stream");
    let request = RpcRequest::new(1, methods::GET_MX_ID, Vec::new());
    rpc.write(&request.to_bytes().unwrap()).expect("request should send");
    let response = RpcResponse::from_bytes(&rpc.read().expect("reply")).unwrap();
    assert_eq!(response.id, 1);
    assert_eq!(response.result, Some(json!("DEV-RPC")));

    let request = RpcRequest::new(2, "noSuchMethod", Vec::new());
    rpc.write(&request.to_bytes().unwrap()).expect("request should send");
    let response = RpcResponse::from_bytes(&rpc.read().expect("reply")).unwrap();
    assert!(response.error.is_some());
    assert_eq!(sim.rpc_calls(methods::GET_MX_ID), 1);

    link.close();
    assert!(sim.wait_idle(BootState::Unbooted, Duration::from_secs(5)));
}

#[test]
fn wrong_image_kind_is_refused() {
    let dir = temp_dir("nack");
    let sim = SimDevice::spawn(dir.join("dev.sock"), SimConfig::default()).expect("sim should start");
    let backend = UdsBackend::new(&dir);

    let stream = backend.connect(&sim.device_info()).expect("connect should work");
    let err = boot(
        stream,
        ImageKind::Application,
        &image(FirmwareKind::Bootloader),
        &LinkConfig::default(),
    )
    .expect_err("mismatched image should be refused");
    assert!(matches!(err, LinkError::BootRejected(_)), "got {err:?}");
    assert_eq!(sim.state(), BootState::Unbooted);
}

#[test]
fn watchdog_resets_quiet_session() {
    let dir = temp_dir("watchdog");
    let config = SimConfig {
        watchdog_timeout: Some(Duration::from_millis(200)),
        ..SimConfig::new("DEV-WD", BootState::Unbooted)
    };
    let sim = SimDevice::spawn(dir.join("dev.sock"), config).expect("sim should start");
    let backend = UdsBackend::new(&dir);

    let stream = backend.connect(&sim.device_info()).expect("connect should work");
    let (link, _) = boot(
        stream,
        ImageKind::Application,
        &image(FirmwareKind::Application),
        &LinkConfig::default(),
    )
    .expect("boot should succeed");
    let rpc = link.open_stream(RPC_STREAM, RPC_MAX_SIZE).expect("rpc stream");

    // No calls: the device gives up on the host.
    assert!(rpc.read().is_err());
    assert!(sim.wait_idle(BootState::Unbooted, Duration::from_secs(5)));
}

#[test]
fn bootloader_reports_version_and_hands_off() {
    let dir = temp_dir("bootloader");
    let config = SimConfig {
        bootloader_version: Version::new(0, 0, 12),
        ..SimConfig::new("DEV-BL", BootState::Bootloader)
    };
    let sim = SimDevice::spawn(dir.join("dev.sock"), config).expect("sim should start");
    let backend = UdsBackend::new(&dir);

    let stream = backend.connect(&sim.device_info()).expect("connect should work");
    let (link, hello) = attach(stream, &LinkConfig::default()).expect("attach should succeed");
    assert_eq!(hello.state, BootState::Bootloader);

    let commands = link
        .open_stream(BOOTLOADER_STREAM, BOOTLOADER_MAX_SIZE)
        .expect("bootloader stream");
    commands
        .write(&Request::GetBootloaderVersion.to_bytes())
        .expect("request should send");
    let reply = Response::parse(&commands.read().expect("reply")).unwrap();
    assert_eq!(reply, Response::BootloaderVersion(Version::new(0, 0, 12)));

    commands
        .write(&Request::BootApplication.to_bytes())
        .expect("request should send");
    assert!(commands.read().is_err(), "bootloader should drop the link");
    assert!(sim.wait_idle(BootState::Unbooted, Duration::from_secs(5)));
}
