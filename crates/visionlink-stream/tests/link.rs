use std::path::PathBuf;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use visionlink_stream::{
    attach, boot, get_first_available_device, BootState, DeviceInfo, DeviceListener, ImageKind,
    LinkBackend, LinkConfig, LinkError, LinkStart, UdsBackend,
};

fn temp_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should be after epoch")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("vl-{tag}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

#[test]
fn boot_then_exchange_on_named_stream() {
    let dir = temp_dir("boot");
    let listener = DeviceListener::bind(dir.join("dev0.sock")).expect("listener should bind");

    let device = thread::spawn(move || {
        let stream = listener
            .accept_timeout(Duration::from_secs(5))
            .expect("accept should work")
            .expect("host should connect");
        let mut pending = listener
            .greet(stream, "DEV0", BootState::Unbooted)
            .expect("hello should succeed");
        let start = pending.read_start().expect("host should start link");
        let LinkStart::Boot { kind, image } = start else {
            panic!("expected a boot");
        };
        assert_eq!(kind, ImageKind::Application);
        assert_eq!(image.len(), 3 * 1024 + 7);
        pending.ack_boot(BootState::Booted).expect("ack should send");

        let link = pending.into_link().expect("link should start");
        let rpc = link.open_stream("__rpc_main", 0).expect("stream should be announced");
        let request = rpc.read().expect("request should arrive");
        rpc.write(&request).expect("echo should send");
    });

    // The device thread serves a single connection, so skip the probe.
    let backend = UdsBackend::new(&dir);
    let info = DeviceInfo::new("DEV0", BootState::Unbooted, dir.join("dev0.sock"));
    let stream = backend.connect(&info).expect("connect should work");

    let config = LinkConfig {
        boot_chunk_size: 1024,
        ..LinkConfig::default()
    };
    let image = vec![0xA5u8; 3 * 1024 + 7];
    let (link, hello) =
        boot(stream, ImageKind::Application, &image, &config).expect("boot should succeed");
    assert_eq!(hello.device_id, "DEV0");
    assert_eq!(hello.state, BootState::Booted);

    let rpc = link.open_stream("__rpc_main", 4096).expect("open should work");
    rpc.write(b"ping").expect("write should work");
    assert_eq!(rpc.read().expect("echo should arrive").as_ref(), b"ping");

    device.join().expect("device thread should finish");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn nack_surfaces_as_boot_rejected() {
    let dir = temp_dir("nack");
    let path = dir.join("dev1.sock");
    let listener = DeviceListener::bind(&path).expect("listener should bind");

    let device = thread::spawn(move || {
        let stream = listener
            .accept_timeout(Duration::from_secs(5))
            .expect("accept should work")
            .expect("host should connect");
        let mut pending = listener
            .greet(stream, "DEV1", BootState::Unbooted)
            .expect("hello should succeed");
        assert!(matches!(pending.read_start(), Ok(LinkStart::Boot { .. })));
        pending.nack_boot("bad image").expect("nack should send");
    });

    let stream = visionlink_transport::UnixDomainSocket::connect(&path).expect("connect");
    let result = boot(stream, ImageKind::Application, b"junk", &LinkConfig::default());
    match result {
        Err(LinkError::BootRejected(reason)) => assert_eq!(reason, "bad image"),
        other => panic!("expected BootRejected, got {other:?}"),
    }

    device.join().expect("device thread should finish");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn discovery_probe_then_attach() {
    let dir = temp_dir("attach");
    let listener = DeviceListener::bind(dir.join("dev2.sock")).expect("listener should bind");

    let device = thread::spawn(move || {
        // First connection is the discovery probe, second is the attach.
        let mut starts = Vec::new();
        for _ in 0..2 {
            let stream = listener
                .accept_timeout(Duration::from_secs(5))
                .expect("accept should work")
                .expect("host should connect");
            let mut pending = listener
                .greet(stream, "DEV2", BootState::Bootloader)
                .expect("hello should succeed");
            match pending.read_start() {
                Ok(LinkStart::Attach) => {
                    starts.push("attach");
                    let link = pending.into_link().expect("link should start");
                    let stream = link.open_stream("__bootloader", 0).expect("announced");
                    stream.write(b"ready").expect("write should work");
                    thread::sleep(Duration::from_millis(50));
                }
                Err(LinkError::Disconnected(_)) => starts.push("probe"),
                other => panic!("unexpected start: {other:?}"),
            }
        }
        starts
    });

    let backend = UdsBackend::new(&dir);
    let info = get_first_available_device(&backend)
        .expect("discovery should work")
        .expect("device should be found");
    assert_eq!(info.device_id, "DEV2");
    assert_eq!(info.state, BootState::Bootloader);

    let stream = backend.connect(&info).expect("connect should work");
    let (link, hello) = attach(stream, &LinkConfig::default()).expect("attach should work");
    assert_eq!(hello.state, BootState::Bootloader);
    let bl = link.open_stream("__bootloader", 1024).expect("open should work");
    assert_eq!(bl.read().expect("data should arrive").as_ref(), b"ready");

    assert_eq!(device.join().expect("device thread"), ["probe", "attach"]);
    let _ = std::fs::remove_dir_all(&dir);
}
