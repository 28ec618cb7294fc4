use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, trace, warn};
use visionlink_protocol::bootloader::Storage;
use visionlink_protocol::{FirmwareHeader, FirmwareKind};
use visionlink_stream::{
    BootState, DeviceInfo, DeviceListener, ImageKind, LinkConnection, LinkError, LinkStart,
    PendingHost,
};
use visionlink_transport::IpcStream;

use crate::config::SimConfig;
use crate::error::{Result, SimError};
use crate::{application, bootloader};

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const STATE_POLL: Duration = Duration::from_millis(10);

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sleep up to `duration` in short steps. Returns true once the link is
/// closed.
pub(crate) fn wait_closed(link: &LinkConnection, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if link.is_closed() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep(STATE_POLL.min(deadline - now));
    }
}

/// State shared by the acceptor, every connection, and the handle.
pub(crate) struct Shared {
    pub(crate) config: SimConfig,
    state: Mutex<BootState>,
    busy: AtomicBool,
    stopping: AtomicBool,
    active: Mutex<Option<Arc<LinkConnection>>>,
    flashed: Mutex<Vec<(Storage, Vec<u8>)>>,
    received: Mutex<BTreeMap<String, Vec<Bytes>>>,
    rpc_calls: Mutex<Vec<String>>,
    last_host_time: Mutex<Option<Duration>>,
}

impl Shared {
    fn new(config: SimConfig) -> Self {
        Self {
            state: Mutex::new(config.initial_state),
            config,
            busy: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            active: Mutex::new(None),
            flashed: Mutex::new(Vec::new()),
            received: Mutex::new(BTreeMap::new()),
            rpc_calls: Mutex::new(Vec::new()),
            last_host_time: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> BootState {
        *lock(&self.state)
    }

    pub(crate) fn set_state(&self, state: BootState) {
        let mut current = lock(&self.state);
        let from = *current;
        if from != state {
            debug!(device_id = %self.config.device_id, %from, to = %state, "state change");
            *current = state;
        }
    }

    pub(crate) fn record_call(&self, method: &str) {
        lock(&self.rpc_calls).push(method.to_string());
    }

    pub(crate) fn record_received(&self, stream: &str, packet: Bytes) {
        lock(&self.received)
            .entry(stream.to_string())
            .or_default()
            .push(packet);
    }

    pub(crate) fn record_flash(&self, storage: Storage, image: Vec<u8>) {
        lock(&self.flashed).push((storage, image));
    }

    pub(crate) fn record_host_time(&self, time: Duration) {
        *lock(&self.last_host_time) = Some(time);
    }
}

/// A simulated device listening on a Unix socket.
pub struct SimDevice;

impl SimDevice {
    /// Bind `path` and serve hosts on a background thread until the
    /// returned handle is stopped or dropped.
    ///
    /// Put `path` in the directory a [`UdsBackend`] scans to make the
    /// device discoverable.
    ///
    /// [`UdsBackend`]: visionlink_stream::UdsBackend
    pub fn spawn(path: impl AsRef<Path>, config: SimConfig) -> Result<SimHandle> {
        let listener = DeviceListener::bind(path.as_ref())?.with_hello_config(config.hello.clone());
        let path = listener.path().to_path_buf();
        let shared = Arc::new(Shared::new(config));

        let acceptor = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("visionlink-sim-accept".to_string())
                .spawn(move || accept_loop(listener, shared))
                .map_err(SimError::Spawn)?
        };
        info!(
            path = %path.display(),
            device_id = %shared.config.device_id,
            state = %shared.state(),
            "simulated device listening"
        );
        Ok(SimHandle {
            shared,
            path,
            acceptor: Some(acceptor),
        })
    }
}

/// Control and inspection of a running [`SimDevice`].
pub struct SimHandle {
    shared: Arc<Shared>,
    path: PathBuf,
    acceptor: Option<JoinHandle<()>>,
}

impl SimHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn device_id(&self) -> &str {
        &self.shared.config.device_id
    }

    pub fn state(&self) -> BootState {
        self.shared.state()
    }

    /// What discovery would report for this device right now.
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo::new(self.device_id(), self.state(), &self.path)
    }

    /// Whether a host session is running.
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::SeqCst)
    }

    /// Wait until no session runs and the device is in `state`.
    pub fn wait_idle(&self, state: BootState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !self.is_busy() && self.state() == state {
                return true;
            }
            thread::sleep(STATE_POLL);
        }
        false
    }

    /// The last image flashed to `storage`.
    pub fn flashed(&self, storage: Storage) -> Option<Vec<u8>> {
        lock(&self.shared.flashed)
            .iter()
            .rev()
            .find(|(target, _)| *target == storage)
            .map(|(_, image)| image.clone())
    }

    /// Packets received so far on an XLinkIn stream.
    pub fn received(&self, stream: &str) -> Vec<Bytes> {
        lock(&self.shared.received)
            .get(stream)
            .cloned()
            .unwrap_or_default()
    }

    /// How many times `method` has been called over RPC.
    pub fn rpc_calls(&self, method: &str) -> usize {
        lock(&self.shared.rpc_calls)
            .iter()
            .filter(|called| called.as_str() == method)
            .count()
    }

    /// Host clock from the latest time sync reply.
    pub fn last_host_time(&self) -> Option<Duration> {
        *lock(&self.shared.last_host_time)
    }

    /// Drop the running session as a device reset would.
    pub fn reset(&self) {
        let active = lock(&self.shared.active).clone();
        if let Some(link) = active {
            warn!(device_id = %self.device_id(), "simulated reset");
            link.close();
        }
    }

    pub fn stop(&mut self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.reset();
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
    }
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: DeviceListener, shared: Arc<Shared>) {
    while !shared.stopping.load(Ordering::SeqCst) {
        match listener.accept_timeout(ACCEPT_POLL) {
            Ok(Some(stream)) => {
                let shared = Arc::clone(&shared);
                let spawned = thread::Builder::new()
                    .name("visionlink-sim-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = serve_connection(stream, &shared) {
                            debug!(error = %err, "host connection ended with error");
                        }
                    });
                if let Err(err) = spawned {
                    warn!(error = %err, "could not spawn connection thread");
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "accept failed; simulator stopping");
                break;
            }
        }
    }
}

fn serve_connection(stream: IpcStream, shared: &Arc<Shared>) -> std::result::Result<(), LinkError> {
    let state = shared.state();
    let mut pending = PendingHost::greet(stream, &shared.config.device_id, state, &shared.config.hello)?;
    let start = match pending.read_start() {
        Ok(start) => start,
        Err(LinkError::Disconnected(_)) => {
            trace!("probe finished");
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    match start {
        LinkStart::Attach => {
            if !matches!(state, BootState::Booted | BootState::Bootloader) {
                debug!(%state, "refusing attach");
                return Ok(());
            }
            if shared.busy.swap(true, Ordering::SeqCst) {
                debug!("refusing attach: session already running");
                return Ok(());
            }
            run_session(pending.into_link()?, state, shared);
            Ok(())
        }
        LinkStart::Boot { kind, image } => {
            let header = match FirmwareHeader::parse(&image) {
                Ok(header) => header,
                Err(err) => return pending.nack_boot(&err.to_string()),
            };
            let expected = match kind {
                ImageKind::Application => FirmwareKind::Application,
                ImageKind::Bootloader => FirmwareKind::Bootloader,
            };
            if header.kind != expected {
                return pending.nack_boot(&format!("image is {:?}, not {kind:?}", header.kind));
            }
            if state != BootState::Unbooted {
                return pending.nack_boot(&format!("device is {state}"));
            }
            if shared.busy.swap(true, Ordering::SeqCst) {
                return pending.nack_boot("device busy");
            }

            let booted = match kind {
                ImageKind::Application => BootState::Booted,
                ImageKind::Bootloader => BootState::Bootloader,
            };
            shared.set_state(booted);
            if let Err(err) = pending.ack_boot(booted) {
                end_session(shared, shared.config.initial_state);
                return Err(err);
            }
            info!(version = %header.version, ?kind, size = image.len(), "image booted");
            match pending.into_link() {
                Ok(link) => run_session(link, booted, shared),
                Err(err) => {
                    end_session(shared, shared.config.initial_state);
                    return Err(err);
                }
            }
            Ok(())
        }
    }
}

fn run_session(link: LinkConnection, state: BootState, shared: &Arc<Shared>) {
    let link = Arc::new(link);
    *lock(&shared.active) = Some(Arc::clone(&link));
    match state {
        BootState::Booted => application::run(&link, shared),
        BootState::Bootloader => bootloader::run(&link, shared),
        other => finish(shared, &link, other),
    }
}

/// End a session: settle the state, then drop the link. The state is
/// settled first so a host that reconnects as soon as it sees the hangup
/// finds the device ready.
pub(crate) fn finish(shared: &Shared, link: &LinkConnection, next: BootState) {
    end_session(shared, next);
    link.close();
    debug!(state = %next, "session ended");
}

fn end_session(shared: &Shared, next: BootState) {
    shared.set_state(next);
    lock(&shared.active).take();
    shared.busy.store(false, Ordering::SeqCst);
}
