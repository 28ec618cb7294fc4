use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};
use visionlink_transport::{IpcStream, UnixDomainSocket};

use crate::connector::probe;
use crate::device_info::{BootState, DeviceInfo};
use crate::error::Result;
use crate::handshake::HelloConfig;

/// Directory scanned for device sockets when nothing else is configured.
pub const DEFAULT_DEVICE_DIR: &str = "/tmp/visionlink";
/// Environment variable overriding [`DEFAULT_DEVICE_DIR`].
pub const DEVICE_DIR_ENV: &str = "VISIONLINK_DEVICE_DIR";

/// Poll interval while waiting for a device to show up.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Default time [`get_any_available_device`] keeps searching.
pub const DEFAULT_SEARCH_TIME: Duration = Duration::from_secs(3);

/// How the host finds and reaches devices.
pub trait LinkBackend: Send + Sync {
    /// Every device currently reachable, in any boot state.
    ///
    /// Each call probes every device once, so the helpers below call it
    /// once and work on that snapshot.
    fn enumerate(&self) -> Result<Vec<DeviceInfo>>;

    /// Open a raw byte stream to `info`, ready for the hello exchange.
    fn connect(&self, info: &DeviceInfo) -> Result<IpcStream>;
}

/// Devices exposed as `*.sock` Unix sockets in one directory.
#[derive(Debug, Clone)]
pub struct UdsBackend {
    dir: PathBuf,
    probe_config: HelloConfig,
}

impl UdsBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            probe_config: HelloConfig {
                timeout: Duration::from_millis(500),
                ..HelloConfig::default()
            },
        }
    }

    /// Backend for `$VISIONLINK_DEVICE_DIR`, falling back to the default directory.
    pub fn from_env() -> Self {
        let dir = std::env::var_os(DEVICE_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DEVICE_DIR));
        Self::new(dir)
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_config.timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn socket_paths(&self) -> Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(visionlink_transport::TransportError::Io(err).into()),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "sock"))
            .collect();
        paths.sort();
        Ok(paths)
    }
}

impl LinkBackend for UdsBackend {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        let mut found = Vec::new();
        for path in self.socket_paths()? {
            let stream = match UnixDomainSocket::connect(&path) {
                Ok(stream) => stream,
                Err(err) => {
                    trace!(path = %path.display(), error = %err, "socket not accepting");
                    continue;
                }
            };
            match probe(stream, &self.probe_config) {
                Ok(hello) => found.push(DeviceInfo::new(hello.device_id, hello.state, path)),
                Err(err) => debug!(path = %path.display(), error = %err, "probe failed"),
            }
        }
        Ok(found)
    }

    fn connect(&self, info: &DeviceInfo) -> Result<IpcStream> {
        Ok(UnixDomainSocket::connect(&info.address)?)
    }
}

/// Connectable devices from one snapshot: unbooted first, then bootloader.
fn available(snapshot: Vec<DeviceInfo>) -> Vec<DeviceInfo> {
    let (mut devices, rest): (Vec<_>, Vec<_>) = snapshot
        .into_iter()
        .partition(|info| info.state == BootState::Unbooted);
    devices.extend(rest.into_iter().filter(|info| info.state == BootState::Bootloader));
    devices
}

/// Every device in a connectable state (unbooted or bootloader).
pub fn get_all_available_devices(backend: &dyn LinkBackend) -> Result<Vec<DeviceInfo>> {
    Ok(available(backend.enumerate()?))
}

/// First unbooted device, else first device sitting in its bootloader.
pub fn get_first_available_device(backend: &dyn LinkBackend) -> Result<Option<DeviceInfo>> {
    Ok(get_all_available_devices(backend)?.into_iter().next())
}

/// Available device whose id equals `device_id`.
pub fn get_device_by_mx_id(
    backend: &dyn LinkBackend,
    device_id: &str,
) -> Result<Option<DeviceInfo>> {
    Ok(get_all_available_devices(backend)?
        .into_iter()
        .find(|info| info.device_id == device_id))
}

/// Wait up to `timeout` for an available device, polling every
/// [`POLL_INTERVAL`].
///
/// When nothing available turns up in time, the last snapshot is searched
/// for an already booted device so a caller can report what it found.
pub fn get_any_available_device(
    backend: &dyn LinkBackend,
    timeout: Duration,
) -> Result<Option<DeviceInfo>> {
    let deadline = Instant::now() + timeout;
    loop {
        let snapshot = backend.enumerate()?;
        if let Some(info) = snapshot
            .iter()
            .find(|info| info.state == BootState::Unbooted)
            .or_else(|| snapshot.iter().find(|info| info.state == BootState::Bootloader))
        {
            return Ok(Some(info.clone()));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(snapshot
                .into_iter()
                .find(|info| info.state == BootState::Booted));
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::error::LinkError;

    struct FakeBackend {
        devices: Mutex<Vec<DeviceInfo>>,
        calls: AtomicUsize,
        appear_after: usize,
        late: Option<DeviceInfo>,
    }

    impl FakeBackend {
        fn with(devices: Vec<DeviceInfo>) -> Self {
            Self {
                devices: Mutex::new(devices),
                calls: AtomicUsize::new(0),
                appear_after: 0,
                late: None,
            }
        }
    }

    impl LinkBackend for FakeBackend {
        fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let mut devices = self.devices.lock().unwrap();
            if call == self.appear_after {
                if let Some(late) = &self.late {
                    devices.push(late.clone());
                }
            }
            Ok(devices.clone())
        }

        fn connect(&self, _info: &DeviceInfo) -> Result<IpcStream> {
            Err(LinkError::Closed)
        }
    }

    fn dev(id: &str, state: BootState) -> DeviceInfo {
        DeviceInfo::new(id, state, format!("/tmp/{id}.sock"))
    }

    #[test]
    fn first_available_prefers_unbooted() {
        let backend = FakeBackend::with(vec![
            dev("boot-a", BootState::Bootloader),
            dev("booted", BootState::Booted),
            dev("fresh", BootState::Unbooted),
        ]);
        let first = get_first_available_device(&backend).unwrap().unwrap();
        assert_eq!(first.device_id, "fresh");
    }

    #[test]
    fn all_available_skips_booted() {
        let backend = FakeBackend::with(vec![
            dev("booted", BootState::Booted),
            dev("bl", BootState::Bootloader),
            dev("fresh", BootState::Unbooted),
        ]);
        let ids: Vec<_> = get_all_available_devices(&backend)
            .unwrap()
            .into_iter()
            .map(|d| d.device_id)
            .collect();
        assert_eq!(ids, ["fresh", "bl"]);
    }

    #[test]
    fn each_lookup_enumerates_once() {
        let backend = FakeBackend::with(vec![
            dev("bl", BootState::Bootloader),
            dev("fresh", BootState::Unbooted),
        ]);
        get_all_available_devices(&backend).unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        get_first_available_device(&backend).unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        get_device_by_mx_id(&backend, "bl").unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        get_any_available_device(&backend, Duration::from_secs(1)).unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn lookup_by_id() {
        let backend = FakeBackend::with(vec![
            dev("aaa", BootState::Unbooted),
            dev("bbb", BootState::Bootloader),
        ]);
        assert_eq!(
            get_device_by_mx_id(&backend, "bbb").unwrap().unwrap().state,
            BootState::Bootloader
        );
        assert!(get_device_by_mx_id(&backend, "ccc").unwrap().is_none());
    }

    #[test]
    fn any_available_waits_for_late_device() {
        let mut backend = FakeBackend::with(Vec::new());
        backend.appear_after = 4;
        backend.late = Some(dev("late", BootState::Unbooted));

        let found = get_any_available_device(&backend, Duration::from_secs(3)).unwrap();
        assert_eq!(found.unwrap().device_id, "late");
    }

    #[test]
    fn any_available_falls_back_to_booted_after_timeout() {
        let backend = FakeBackend::with(vec![dev("busy", BootState::Booted)]);
        let start = Instant::now();
        let found = get_any_available_device(&backend, Duration::from_millis(250)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(found.unwrap().device_id, "busy");
    }

    #[test]
    fn any_available_returns_none_when_empty() {
        let backend = FakeBackend::with(Vec::new());
        let started = Instant::now();
        assert!(get_any_available_device(&backend, Duration::from_millis(250))
            .unwrap()
            .is_none());
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(250), "gave up after {waited:?}");
        assert!(waited < Duration::from_secs(2), "waited {waited:?}");
    }

    #[test]
    fn uds_backend_missing_dir_is_empty() {
        let backend = UdsBackend::new("/nonexistent/visionlink-devices");
        assert!(backend.enumerate().unwrap().is_empty());
    }
}
