//! The application session: boot or attach, then run a pipeline.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, error, info, trace, warn};
use visionlink_protocol::bootloader::Request;
use visionlink_protocol::rpc::methods;
use visionlink_protocol::streams::{
    ASSET_STORAGE_MAX_SIZE, ASSET_STORAGE_STREAM, BOOTLOADER_MAX_SIZE, BOOTLOADER_STREAM,
    DEFAULT_STREAM_MAX_SIZE, LINK_LOST_EVENT, LOG_MAX_SIZE, LOG_STREAM, RPC_MAX_SIZE, RPC_STREAM,
    TIMESYNC_MAX_SIZE, TIMESYNC_STREAM,
};
use visionlink_protocol::{
    log as device_log, timesync, CameraBoardSocket, ChipTemperature, CpuUsage, LogLevel,
    LogMessage, MemoryInfo, UsbSpeed,
};
use visionlink_stream::{
    get_any_available_device, BootState, DeviceInfo, ImageKind, LinkBackend, LinkConfig,
    LinkConnection, LinkError, StreamChannel, UdsBackend, DEFAULT_SEARCH_TIME,
};

use crate::config::DeviceConfig;
use crate::data_queue::{CallbackId, DataInputQueue, DataOutputQueue};
use crate::error::{DeviceError, Result};
use crate::event_queue::EventQueue;
use crate::init::{initialize, monotonic_now};
use crate::pipeline::{Endpoint, Pipeline, SerializedPipeline};
use crate::resources::{self, Resources};
use crate::rpc::RpcClient;
use crate::worker::{pause, Worker};

/// Queue depth new data queues start with.
pub const DEFAULT_QUEUE_SIZE: usize = 16;

/// Target device log records are forwarded to.
pub const DEVICE_LOG_TARGET: &str = "visionlink::device";

pub type LogCallbackId = u64;

type LogCallback = Arc<dyn Fn(&LogMessage) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where device log records go once they reach the host.
struct LogSink {
    output_level: Mutex<LogLevel>,
    callbacks: Mutex<BTreeMap<LogCallbackId, LogCallback>>,
    next_id: AtomicU64,
}

impl LogSink {
    fn new(output_level: LogLevel) -> Self {
        Self {
            output_level: Mutex::new(output_level),
            callbacks: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn deliver(&self, record: &LogMessage) {
        if record.level.passes(*lock(&self.output_level)) {
            emit(record);
        }
        let callbacks: Vec<LogCallback> = lock(&self.callbacks).values().cloned().collect();
        for callback in callbacks {
            callback(record);
        }
    }
}

fn emit(record: &LogMessage) {
    let node = record.node_id_name.as_str();
    let text = record.payload.as_str();
    match record.level {
        LogLevel::Trace => trace!(target: DEVICE_LOG_TARGET, node, "{text}"),
        LogLevel::Debug => debug!(target: DEVICE_LOG_TARGET, node, "{text}"),
        LogLevel::Info => info!(target: DEVICE_LOG_TARGET, node, "{text}"),
        LogLevel::Warn => warn!(target: DEVICE_LOG_TARGET, node, "{text}"),
        LogLevel::Error | LogLevel::Critical => error!(target: DEVICE_LOG_TARGET, node, "{text}"),
        LogLevel::Off => {}
    }
}

/// A running application session on one device.
///
/// Construction boots (or attaches to) the device and starts the watchdog,
/// time sync and log threads. Every public operation except [`close`] and
/// [`is_closed`] fails with [`DeviceError::Closed`] once the session is
/// closed, whether by [`close`] or by the watchdog losing the device.
///
/// [`close`]: Device::close
/// [`is_closed`]: Device::is_closed
pub struct Device {
    info: DeviceInfo,
    config: DeviceConfig,
    pipeline: SerializedPipeline,
    closed: Arc<AtomicBool>,
    link: Mutex<Option<LinkConnection>>,
    rpc: Mutex<Option<Arc<RpcClient>>>,
    event_queue: Arc<EventQueue>,
    output_queues: Mutex<BTreeMap<String, Arc<DataOutputQueue>>>,
    input_queues: Mutex<BTreeMap<String, Arc<DataInputQueue>>>,
    event_callbacks: Mutex<Vec<(String, CallbackId)>>,
    log_sink: Arc<LogSink>,
    watchdog: Worker,
    timesync: Worker,
    logging: Worker,
}

impl Device {
    /// Search for any device for the default time and open it with
    /// configuration from the environment.
    pub fn new(pipeline: &Pipeline) -> Result<Self> {
        let backend = UdsBackend::from_env();
        let info = get_any_available_device(&backend, DEFAULT_SEARCH_TIME)?
            .ok_or(DeviceError::NoDevicesFound)?;
        Self::open(pipeline, info, &backend, DeviceConfig::from_env())
    }

    pub fn with_device_info(pipeline: &Pipeline, info: DeviceInfo) -> Result<Self> {
        Self::open(pipeline, info, &UdsBackend::from_env(), DeviceConfig::from_env())
    }

    pub fn open(
        pipeline: &Pipeline,
        mut info: DeviceInfo,
        backend: &dyn LinkBackend,
        config: DeviceConfig,
    ) -> Result<Self> {
        initialize();
        let serialized = pipeline.serialize()?;

        let link = match info.state {
            BootState::Booted => {
                let (link, hello) = visionlink_stream::attach(backend.connect(&info)?, &config.link)?;
                if hello.state != BootState::Booted {
                    return Err(DeviceError::InvalidBootState(hello.state));
                }
                link
            }
            BootState::Unbooted | BootState::Bootloader => {
                let firmware = resources::device_firmware(
                    &config.firmware,
                    Resources::global(),
                    config.usb2_mode,
                    serialized.firmware_version,
                )?;
                if info.state == BootState::Bootloader {
                    hand_off_from_bootloader(backend, &info, &config.link)?;
                    info.state = BootState::Unbooted;
                }
                boot_application(backend, &info, &firmware, &config.link)?
            }
        };
        info.state = BootState::Booted;
        info!(device_id = %info.device_id, "device session established");

        Self::start(link, info, config, serialized, pipeline.endpoints())
    }

    fn start(
        link: LinkConnection,
        info: DeviceInfo,
        config: DeviceConfig,
        pipeline: SerializedPipeline,
        endpoints: Vec<Endpoint>,
    ) -> Result<Self> {
        let rpc = Arc::new(RpcClient::new(link.open_stream(RPC_STREAM, RPC_MAX_SIZE)?));
        let log_output_level = config.log_output_level;
        let device = Self {
            info,
            config,
            pipeline,
            closed: Arc::new(AtomicBool::new(false)),
            link: Mutex::new(Some(link)),
            rpc: Mutex::new(Some(rpc)),
            event_queue: Arc::new(EventQueue::new()),
            output_queues: Mutex::new(BTreeMap::new()),
            input_queues: Mutex::new(BTreeMap::new()),
            event_callbacks: Mutex::new(Vec::new()),
            log_sink: Arc::new(LogSink::new(log_output_level)),
            watchdog: Worker::new(),
            timesync: Worker::new(),
            logging: Worker::new(),
        };
        if let Err(err) = device.bring_up(endpoints) {
            device.close();
            return Err(err);
        }
        Ok(device)
    }

    fn bring_up(&self, endpoints: Vec<Endpoint>) -> Result<()> {
        self.start_watchdog()?;
        self.start_timesync()?;
        self.start_logging()?;

        self.call::<Value>(methods::SET_LOG_LEVEL, vec![json!(self.config.log_level)])?;
        self.call::<Value>(
            methods::SET_SYSTEM_INFORMATION_LOGGING_RATE,
            vec![json!(self.config.system_information_logging_rate_hz)],
        )?;

        self.create_queues(endpoints)
    }

    fn start_watchdog(&self) -> Result<()> {
        let rpc = self.rpc()?;
        let closed = Arc::clone(&self.closed);
        let events = Arc::clone(&self.event_queue);
        let interval = self.config.watchdog_timeout / 2;
        self.watchdog.start("visionlink-watchdog", move |running| {
            while running.load(Ordering::SeqCst) {
                if let Err(err) = rpc.call::<Value>(methods::WATCHDOG_KEEPALIVE, Vec::new()) {
                    if !closed.load(Ordering::SeqCst) {
                        warn!(error = %err, "watchdog lost the device");
                        events.push(LINK_LOST_EVENT);
                    }
                    break;
                }
                pause(running, interval);
            }
        })
    }

    fn start_timesync(&self) -> Result<()> {
        let stream = self.open_stream(TIMESYNC_STREAM, TIMESYNC_MAX_SIZE)?;
        self.timesync.start("visionlink-timesync", move |running| {
            while running.load(Ordering::SeqCst) {
                if stream.read().is_err() {
                    break;
                }
                if stream.write(&timesync::encode(monotonic_now())).is_err() {
                    break;
                }
            }
        })
    }

    fn start_logging(&self) -> Result<()> {
        let stream = self.open_stream(LOG_STREAM, LOG_MAX_SIZE)?;
        let sink = Arc::clone(&self.log_sink);
        self.logging.start("visionlink-log", move |running| {
            while running.load(Ordering::SeqCst) {
                let packet = match stream.read() {
                    Ok(packet) => packet,
                    Err(_) => break,
                };
                match device_log::parse_batch(&packet) {
                    Ok(records) => records.iter().for_each(|record| sink.deliver(record)),
                    Err(err) => error!(error = %err, "malformed log batch from device"),
                }
            }
        })
    }

    fn create_queues(&self, endpoints: Vec<Endpoint>) -> Result<()> {
        for endpoint in endpoints {
            match endpoint {
                Endpoint::Input {
                    stream_name,
                    max_data_size,
                } => {
                    let stream = self.open_stream(&stream_name, max_data_size)?;
                    let queue =
                        DataInputQueue::new(stream, DEFAULT_QUEUE_SIZE, true, max_data_size)?;
                    lock(&self.input_queues).insert(stream_name, Arc::new(queue));
                }
                Endpoint::Output { stream_name } => {
                    let stream = self.open_stream(&stream_name, DEFAULT_STREAM_MAX_SIZE)?;
                    let queue = Arc::new(DataOutputQueue::new(stream, DEFAULT_QUEUE_SIZE, true)?);
                    let events = Arc::clone(&self.event_queue);
                    let id = queue.add_callback(move |name, _| events.push(name));
                    lock(&self.output_queues).insert(stream_name.clone(), queue);
                    lock(&self.event_callbacks).push((stream_name, id));
                }
            }
        }
        Ok(())
    }

    /// Close the session. Safe to call more than once and from any thread;
    /// only the first call does any work.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(device_id = %self.info.device_id, "closing device session");

        {
            let outputs = lock(&self.output_queues);
            for (name, id) in lock(&self.event_callbacks).drain(..) {
                if let Some(queue) = outputs.get(&name) {
                    queue.remove_callback(id);
                }
            }
        }

        if let Some(link) = lock(&self.link).take() {
            link.close();
        }

        let outputs = std::mem::take(&mut *lock(&self.output_queues));
        for queue in outputs.values() {
            queue.close();
            queue.join();
        }
        let inputs = std::mem::take(&mut *lock(&self.input_queues));
        for queue in inputs.values() {
            queue.close();
            queue.join();
        }

        self.watchdog.stop();
        self.timesync.stop();
        self.logging.stop();
        self.watchdog.join();
        self.timesync.join();
        self.logging.join();

        lock(&self.rpc).take();
        info!(device_id = %self.info.device_id, "device session closed");
    }

    /// Closed explicitly, or the watchdog stopped because the device went
    /// away.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || !self.watchdog.is_running()
    }

    fn check_closed(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DeviceError::Closed);
        }
        Ok(())
    }

    fn rpc(&self) -> Result<Arc<RpcClient>> {
        self.check_closed()?;
        lock(&self.rpc).clone().ok_or(DeviceError::Closed)
    }

    fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        self.rpc()?.call(method, params)
    }

    fn open_stream(&self, name: &str, max_size: usize) -> Result<StreamChannel> {
        let link = lock(&self.link);
        let link = link.as_ref().ok_or(DeviceError::Closed)?;
        Ok(link.open_stream(name, max_size)?)
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Send the pipeline to the device, build it and start it.
    ///
    /// Returns `Ok(false)` without doing anything if a pipeline already
    /// runs.
    pub fn start_pipeline(&self) -> Result<bool> {
        self.check_closed()?;
        if self.is_pipeline_running()? {
            return Ok(false);
        }

        let schema: Value = serde_json::from_slice(&self.pipeline.schema)?;
        self.call::<Value>(methods::SET_PIPELINE_SCHEMA, vec![schema])?;

        if !self.pipeline.asset_storage.is_empty() {
            self.transfer_assets()?;
        }

        let (built, message): (bool, String) = self.call(methods::BUILD_PIPELINE, Vec::new())?;
        if !built {
            return Err(DeviceError::PipelineBuild(message));
        }
        self.call::<Value>(methods::START_PIPELINE, Vec::new())?;
        info!(device_id = %self.info.device_id, "pipeline started");
        Ok(true)
    }

    fn transfer_assets(&self) -> Result<()> {
        let assets: Value = serde_json::from_slice(&self.pipeline.assets)?;
        self.call::<Value>(methods::SET_ASSETS, vec![assets])?;

        let size = self.pipeline.asset_storage.len();
        let handle: u64 = self.call(methods::MEMORY_ALLOC, vec![json!(size)])?;
        let stream = self.open_stream(ASSET_STORAGE_STREAM, ASSET_STORAGE_MAX_SIZE)?;
        debug!(size, handle, "transferring asset storage");

        thread::scope(|scope| -> Result<()> {
            let storage = &self.pipeline.asset_storage;
            let writer = scope.spawn(move || stream.write_split(storage));
            let read = self.call::<Value>(
                methods::READ_FROM_XLINK,
                vec![json!(ASSET_STORAGE_STREAM), json!(handle), json!(size)],
            );
            let written = writer
                .join()
                .map_err(|_| LinkError::Protocol("asset storage writer panicked".into()))?;
            read?;
            written?;
            Ok(())
        })?;

        self.call::<Value>(methods::SET_ASSET_STORAGE, vec![json!(handle), json!(size)])?;
        Ok(())
    }

    pub fn is_pipeline_running(&self) -> Result<bool> {
        self.call(methods::IS_PIPELINE_RUNNING, Vec::new())
    }

    pub fn get_output_queue(&self, name: &str) -> Result<Arc<DataOutputQueue>> {
        self.check_closed()?;
        lock(&self.output_queues)
            .get(name)
            .cloned()
            .ok_or_else(|| DeviceError::QueueNotFound(name.to_string()))
    }

    /// Like [`get_output_queue`](Self::get_output_queue), reconfiguring the
    /// queue first.
    pub fn get_output_queue_with(
        &self,
        name: &str,
        max_size: usize,
        blocking: bool,
    ) -> Result<Arc<DataOutputQueue>> {
        let queue = self.get_output_queue(name)?;
        queue.set_max_size(max_size);
        queue.set_blocking(blocking);
        Ok(queue)
    }

    pub fn get_input_queue(&self, name: &str) -> Result<Arc<DataInputQueue>> {
        self.check_closed()?;
        lock(&self.input_queues)
            .get(name)
            .cloned()
            .ok_or_else(|| DeviceError::QueueNotFound(name.to_string()))
    }

    pub fn get_input_queue_with(
        &self,
        name: &str,
        max_size: usize,
        blocking: bool,
    ) -> Result<Arc<DataInputQueue>> {
        let queue = self.get_input_queue(name)?;
        queue.set_max_size(max_size);
        queue.set_blocking(blocking);
        Ok(queue)
    }

    pub fn output_queue_names(&self) -> Result<Vec<String>> {
        self.check_closed()?;
        Ok(lock(&self.output_queues).keys().cloned().collect())
    }

    pub fn input_queue_names(&self) -> Result<Vec<String>> {
        self.check_closed()?;
        Ok(lock(&self.input_queues).keys().cloned().collect())
    }

    /// Wait for messages to arrive on any of `names` and return up to
    /// `max_count` event names, oldest first. `timeout: None` waits
    /// forever.
    pub fn get_queue_events<S: AsRef<str>>(
        &self,
        names: &[S],
        max_count: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<String>> {
        self.check_closed()?;
        {
            let outputs = lock(&self.output_queues);
            if let Some(unknown) = names
                .iter()
                .map(AsRef::as_ref)
                .find(|name| *name != LINK_LOST_EVENT && !outputs.contains_key(*name))
            {
                return Err(DeviceError::QueueNotFound(unknown.to_string()));
            }
        }
        Ok(self.event_queue.wait_for(names, max_count, timeout))
    }

    /// Events for every output queue, plus the link-lost event.
    pub fn get_all_queue_events(
        &self,
        max_count: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<String>> {
        let mut names = self.output_queue_names()?;
        names.push(LINK_LOST_EVENT.to_string());
        self.get_queue_events(&names, max_count, timeout)
    }

    pub fn get_queue_event(&self, name: &str, timeout: Option<Duration>) -> Result<Option<String>> {
        Ok(self.get_queue_events(&[name], 1, timeout)?.pop())
    }

    pub fn get_mx_id(&self) -> Result<String> {
        self.call(methods::GET_MX_ID, Vec::new())
    }

    pub fn get_connected_cameras(&self) -> Result<Vec<CameraBoardSocket>> {
        self.call(methods::GET_CONNECTED_CAMERAS, Vec::new())
    }

    pub fn get_usb_speed(&self) -> Result<UsbSpeed> {
        self.call(methods::GET_USB_SPEED, Vec::new())
    }

    pub fn get_ddr_memory_usage(&self) -> Result<MemoryInfo> {
        self.call(methods::GET_DDR_MEMORY_USAGE, Vec::new())
    }

    pub fn get_cmx_memory_usage(&self) -> Result<MemoryInfo> {
        self.call(methods::GET_CMX_MEMORY_USAGE, Vec::new())
    }

    pub fn get_leon_css_heap_usage(&self) -> Result<MemoryInfo> {
        self.call(methods::GET_LEON_CSS_HEAP_USAGE, Vec::new())
    }

    pub fn get_leon_mss_heap_usage(&self) -> Result<MemoryInfo> {
        self.call(methods::GET_LEON_MSS_HEAP_USAGE, Vec::new())
    }

    pub fn get_chip_temperature(&self) -> Result<ChipTemperature> {
        self.call(methods::GET_CHIP_TEMPERATURE, Vec::new())
    }

    pub fn get_leon_css_cpu_usage(&self) -> Result<CpuUsage> {
        self.call(methods::GET_LEON_CSS_CPU_USAGE, Vec::new())
    }

    pub fn get_leon_mss_cpu_usage(&self) -> Result<CpuUsage> {
        self.call(methods::GET_LEON_MSS_CPU_USAGE, Vec::new())
    }

    /// Severity the device sends log records at.
    pub fn set_log_level(&self, level: LogLevel) -> Result<()> {
        self.call::<Value>(methods::SET_LOG_LEVEL, vec![json!(level)])?;
        Ok(())
    }

    pub fn get_log_level(&self) -> Result<LogLevel> {
        self.call(methods::GET_LOG_LEVEL, Vec::new())
    }

    /// Severity at which received records are printed on this host.
    /// Callbacks see every record regardless.
    pub fn set_log_output_level(&self, level: LogLevel) -> Result<()> {
        self.check_closed()?;
        *lock(&self.log_sink.output_level) = level;
        Ok(())
    }

    pub fn get_log_output_level(&self) -> Result<LogLevel> {
        self.check_closed()?;
        Ok(*lock(&self.log_sink.output_level))
    }

    pub fn set_system_information_logging_rate(&self, rate_hz: f32) -> Result<()> {
        self.call::<Value>(methods::SET_SYSTEM_INFORMATION_LOGGING_RATE, vec![json!(rate_hz)])?;
        Ok(())
    }

    pub fn get_system_information_logging_rate(&self) -> Result<f32> {
        self.call(methods::GET_SYSTEM_INFORMATION_LOGGING_RATE, Vec::new())
    }

    /// Register `callback` for every device log record. Runs on the log
    /// thread.
    pub fn add_log_callback<F>(&self, callback: F) -> Result<LogCallbackId>
    where
        F: Fn(&LogMessage) + Send + Sync + 'static,
    {
        self.check_closed()?;
        let id = self.log_sink.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.log_sink.callbacks).insert(id, Arc::new(callback));
        Ok(id)
    }

    pub fn remove_log_callback(&self, id: LogCallbackId) -> Result<bool> {
        self.check_closed()?;
        Ok(lock(&self.log_sink.callbacks).remove(&id).is_some())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("info", &self.info)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn boot_application(
    backend: &dyn LinkBackend,
    info: &DeviceInfo,
    firmware: &[u8],
    config: &LinkConfig,
) -> Result<LinkConnection> {
    let stream = backend.connect(info)?;
    match visionlink_stream::boot(stream, ImageKind::Application, firmware, config) {
        Ok((link, _)) => Ok(link),
        Err(LinkError::UnexpectedState { actual, .. }) => Err(DeviceError::InvalidBootState(actual)),
        Err(err) => Err(err.into()),
    }
}

/// Ask a device sitting in its bootloader to jump to the application slot,
/// leaving it unbooted.
fn hand_off_from_bootloader(
    backend: &dyn LinkBackend,
    info: &DeviceInfo,
    config: &LinkConfig,
) -> Result<()> {
    let (link, hello) = visionlink_stream::attach(backend.connect(info)?, config)?;
    if hello.state != BootState::Bootloader {
        return Err(DeviceError::InvalidBootState(hello.state));
    }
    let stream = link.open_stream(BOOTLOADER_STREAM, BOOTLOADER_MAX_SIZE)?;
    stream.write(&Request::BootApplication.to_bytes())?;
    debug!(device_id = %info.device_id, "requested boot from bootloader");

    // The bootloader drops the link once it hands off.
    match stream.read_timeout(config.boot_timeout) {
        Err(_) => Ok(()),
        Ok(Some(_)) => Err(LinkError::Protocol("bootloader answered a boot request".into()).into()),
        Ok(None) => Err(LinkError::Timeout(config.boot_timeout).into()),
    }
}
