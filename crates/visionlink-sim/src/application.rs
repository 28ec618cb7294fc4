//! A booted device: the RPC server and the streams around it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use visionlink_protocol::rpc::methods;
use visionlink_protocol::schema::{AssetMap, PipelineSchema, XLINK_IN, XLINK_OUT};
use visionlink_protocol::streams::{LOG_STREAM, RPC_STREAM, TIMESYNC_STREAM};
use visionlink_protocol::{
    log as device_log, timesync, CameraBoardSocket, ChipTemperature, CpuUsage, LogLevel,
    LogMessage, MemoryInfo, RpcRequest, RpcResponse, Timestamp, UsbSpeed,
};
use visionlink_stream::LinkConnection;

use crate::device::{finish, lock, wait_closed, Shared};

const DDR_TOTAL: i64 = 512 * 1024 * 1024;
const CMX_TOTAL: i64 = 2 * 1024 * 1024;
const HEAP_TOTAL: i64 = 64 * 1024 * 1024;
const WATCHDOG_POLL: Duration = Duration::from_millis(20);
/// Node name on system information log records.
const SYSTEM_NODE: &str = "system";

type CallResult = std::result::Result<Value, String>;

struct Session {
    link: Arc<LinkConnection>,
    shared: Arc<Shared>,
    log_level: Mutex<LogLevel>,
    logging_rate_hz: Mutex<f32>,
    last_rpc: Mutex<Instant>,
    schema: Mutex<Option<PipelineSchema>>,
    assets: Mutex<Option<AssetMap>>,
    allocations: Mutex<BTreeMap<u64, Vec<u8>>>,
    asset_storage: Mutex<Vec<u8>>,
    next_handle: AtomicU64,
    built: AtomicBool,
    running: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// Serve one booted session until the link closes.
pub(crate) fn run(link: &Arc<LinkConnection>, shared: &Arc<Shared>) {
    let session = Arc::new(Session {
        link: Arc::clone(link),
        shared: Arc::clone(shared),
        log_level: Mutex::new(LogLevel::Warn),
        logging_rate_hz: Mutex::new(1.0),
        last_rpc: Mutex::new(Instant::now()),
        schema: Mutex::new(None),
        assets: Mutex::new(None),
        allocations: Mutex::new(BTreeMap::new()),
        asset_storage: Mutex::new(Vec::new()),
        next_handle: AtomicU64::new(1),
        built: AtomicBool::new(false),
        running: AtomicBool::new(false),
        threads: Mutex::new(Vec::new()),
    });

    session.spawn("visionlink-sim-timesync", timesync_loop);
    session.spawn("visionlink-sim-log", log_loop);
    if shared.config.watchdog_timeout.is_some() {
        session.spawn("visionlink-sim-watchdog", watchdog_loop);
    }

    session.serve_rpc();

    finish(shared, link, shared.config.initial_state);
    let threads = std::mem::take(&mut *lock(&session.threads));
    for handle in threads {
        let _ = handle.join();
    }
}

impl Session {
    fn spawn(self: &Arc<Self>, name: &str, body: fn(&Session)) {
        let session = Arc::clone(self);
        match thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(&*session))
        {
            Ok(handle) => lock(&self.threads).push(handle),
            Err(err) => {
                warn!(error = %err, thread = name, "could not spawn session thread");
                self.link.close();
            }
        }
    }

    fn spawn_stream<F>(self: &Arc<Self>, stream: String, body: F)
    where
        F: FnOnce(&Session, &str) + Send + 'static,
    {
        let session = Arc::clone(self);
        let name = format!("visionlink-sim-{stream}");
        match thread::Builder::new()
            .name(name)
            .spawn(move || body(&*session, stream.as_str()))
        {
            Ok(handle) => lock(&self.threads).push(handle),
            Err(err) => warn!(error = %err, "could not spawn stream thread"),
        }
    }

    fn serve_rpc(self: &Arc<Self>) {
        let rpc = match self.link.open_stream(RPC_STREAM, 0) {
            Ok(rpc) => rpc,
            Err(err) => {
                debug!(error = %err, "rpc stream never opened");
                return;
            }
        };
        while let Ok(packet) = rpc.read() {
            *lock(&self.last_rpc) = Instant::now();
            let request = match RpcRequest::from_bytes(&packet) {
                Ok(request) => request,
                Err(err) => {
                    warn!(error = %err, "malformed rpc request");
                    continue;
                }
            };
            self.shared.record_call(&request.method);
            let response = match self.dispatch(&request.method, &request.params) {
                Ok(result) => RpcResponse::ok(request.id, result),
                Err(message) => RpcResponse::err(request.id, message),
            };
            let sent = response
                .to_bytes()
                .map_err(|err| err.to_string())
                .and_then(|bytes| rpc.write(&bytes).map_err(|err| err.to_string()));
            if let Err(err) = sent {
                debug!(error = %err, "rpc reply failed");
                break;
            }
        }
    }

    fn dispatch(self: &Arc<Self>, method: &str, params: &[Value]) -> CallResult {
        match method {
            methods::WATCHDOG_KEEPALIVE => Ok(Value::Null),
            methods::SET_LOG_LEVEL => {
                if let Some(reason) = &self.shared.config.log_level_error {
                    return Err(reason.clone());
                }
                *lock(&self.log_level) = param(params, 0)?;
                Ok(Value::Null)
            }
            methods::GET_LOG_LEVEL => to_value(*lock(&self.log_level)),
            methods::SET_SYSTEM_INFORMATION_LOGGING_RATE => {
                let rate: f32 = param(params, 0)?;
                if !rate.is_finite() || rate < 0.0 {
                    return Err(format!("invalid logging rate {rate}"));
                }
                *lock(&self.logging_rate_hz) = rate;
                Ok(Value::Null)
            }
            methods::GET_SYSTEM_INFORMATION_LOGGING_RATE => to_value(*lock(&self.logging_rate_hz)),
            methods::IS_PIPELINE_RUNNING => Ok(json!(self.running.load(Ordering::SeqCst))),
            methods::SET_PIPELINE_SCHEMA => {
                *lock(&self.schema) = Some(param(params, 0)?);
                Ok(Value::Null)
            }
            methods::SET_ASSETS => {
                *lock(&self.assets) = Some(param(params, 0)?);
                Ok(Value::Null)
            }
            methods::MEMORY_ALLOC => {
                let size: usize = param(params, 0)?;
                let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
                lock(&self.allocations).insert(handle, Vec::with_capacity(size));
                Ok(json!(handle))
            }
            methods::READ_FROM_XLINK => self.read_from_xlink(params),
            methods::SET_ASSET_STORAGE => {
                let handle: u64 = param(params, 0)?;
                let size: usize = param(params, 1)?;
                let data = lock(&self.allocations)
                    .remove(&handle)
                    .ok_or_else(|| format!("unknown allocation {handle}"))?;
                if data.len() != size {
                    return Err(format!("allocation {handle} holds {} bytes, not {size}", data.len()));
                }
                *lock(&self.asset_storage) = data;
                Ok(Value::Null)
            }
            methods::BUILD_PIPELINE => Ok(self.build_pipeline()),
            methods::START_PIPELINE => self.start_pipeline(),
            methods::GET_MX_ID => Ok(json!(self.shared.config.device_id)),
            methods::GET_CONNECTED_CAMERAS => to_value(vec![
                CameraBoardSocket::Rgb,
                CameraBoardSocket::Left,
                CameraBoardSocket::Right,
            ]),
            methods::GET_USB_SPEED => to_value(UsbSpeed::Super),
            methods::GET_DDR_MEMORY_USAGE => to_value(memory(DDR_TOTAL, DDR_TOTAL / 4)),
            methods::GET_CMX_MEMORY_USAGE => to_value(memory(CMX_TOTAL, CMX_TOTAL / 2)),
            methods::GET_LEON_CSS_HEAP_USAGE => to_value(memory(HEAP_TOTAL, HEAP_TOTAL / 8)),
            methods::GET_LEON_MSS_HEAP_USAGE => to_value(memory(HEAP_TOTAL, HEAP_TOTAL / 16)),
            methods::GET_CHIP_TEMPERATURE => to_value(temperature()),
            methods::GET_LEON_CSS_CPU_USAGE => to_value(CpuUsage {
                average: 0.25,
                ms_time: 1000,
            }),
            methods::GET_LEON_MSS_CPU_USAGE => to_value(CpuUsage {
                average: 0.125,
                ms_time: 1000,
            }),
            other => Err(format!("unknown method '{other}'")),
        }
    }

    fn read_from_xlink(&self, params: &[Value]) -> CallResult {
        let stream_name: String = param(params, 0)?;
        let handle: u64 = param(params, 1)?;
        let size: usize = param(params, 2)?;
        if !lock(&self.allocations).contains_key(&handle) {
            return Err(format!("unknown allocation {handle}"));
        }

        let stream = self
            .link
            .open_stream(&stream_name, 0)
            .map_err(|err| err.to_string())?;
        let mut data = BytesMut::with_capacity(size);
        while data.len() < size {
            let packet = stream.read().map_err(|err| err.to_string())?;
            data.extend_from_slice(&packet);
        }
        if data.len() != size {
            return Err(format!("received {} bytes, expected {size}", data.len()));
        }
        debug!(stream = %stream_name, handle, size, "read into allocation");
        lock(&self.allocations).insert(handle, data.to_vec());
        Ok(Value::Null)
    }

    fn build_pipeline(&self) -> Value {
        if let Some(reason) = &self.shared.config.build_error {
            return json!([false, reason]);
        }
        let schema = lock(&self.schema);
        let Some(schema) = schema.as_ref() else {
            return json!([false, "no pipeline schema set"]);
        };
        if let Some(assets) = lock(&self.assets).as_ref() {
            let storage_len = lock(&self.asset_storage).len();
            for (key, entry) in &assets.map {
                let end = entry.offset as usize + entry.size as usize;
                if end > storage_len {
                    return json!([false, format!("asset '{key}' lies outside asset storage")]);
                }
            }
        }
        self.built.store(true, Ordering::SeqCst);
        info!(nodes = schema.nodes.len(), "pipeline built");
        json!([true, ""])
    }

    fn start_pipeline(self: &Arc<Self>) -> CallResult {
        if !self.built.load(Ordering::SeqCst) {
            return Err("pipeline not built".to_string());
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(Value::Null);
        }
        let (outputs, inputs) = match lock(&self.schema).as_ref() {
            Some(schema) => (schema.stream_names(XLINK_OUT), schema.stream_names(XLINK_IN)),
            None => return Err("no pipeline schema set".to_string()),
        };
        for stream in outputs {
            self.spawn_stream(stream, produce);
        }
        for stream in inputs {
            self.spawn_stream(stream, record);
        }
        info!("pipeline running");
        Ok(Value::Null)
    }
}

fn param<T: serde::de::DeserializeOwned>(params: &[Value], index: usize) -> std::result::Result<T, String> {
    let value = params
        .get(index)
        .ok_or_else(|| format!("missing parameter {index}"))?;
    serde_json::from_value(value.clone()).map_err(|err| format!("parameter {index}: {err}"))
}

fn to_value<T: serde::Serialize>(value: T) -> CallResult {
    serde_json::to_value(value).map_err(|err| err.to_string())
}

fn memory(total: i64, used: i64) -> MemoryInfo {
    MemoryInfo {
        remaining: total - used,
        used,
        total,
    }
}

fn temperature() -> ChipTemperature {
    let (css, mss, upa, dss) = (41.5, 40.25, 42.0, 41.0);
    ChipTemperature {
        css,
        mss,
        upa,
        dss,
        average: (css + mss + upa + dss) / 4.0,
    }
}

fn timesync_loop(session: &Session) {
    let Ok(stream) = session.link.open_stream(TIMESYNC_STREAM, 0) else {
        return;
    };
    let interval = session.shared.config.timesync_interval;
    loop {
        if stream.write(&[0]).is_err() {
            return;
        }
        match stream.read().map(|reply| timesync::decode(&reply)) {
            Ok(Ok(host_time)) => session.shared.record_host_time(host_time),
            Ok(Err(err)) => warn!(error = %err, "bad timesync reply"),
            Err(_) => return,
        }
        if wait_closed(&session.link, interval) {
            return;
        }
    }
}

fn log_loop(session: &Session) {
    let Ok(stream) = session.link.open_stream(LOG_STREAM, 0) else {
        return;
    };
    if session.shared.config.garbage_log_batch && stream.write(b"[{\"level\":").is_err() {
        return;
    }
    let mut tick = 0u64;
    loop {
        let rate = *lock(&session.logging_rate_hz);
        let period = if rate > 0.0 {
            Duration::from_secs_f32(1.0 / rate)
        } else {
            Duration::from_millis(100)
        };
        if wait_closed(&session.link, period) {
            return;
        }
        if rate <= 0.0 || !LogLevel::Info.passes(*lock(&session.log_level)) {
            continue;
        }

        tick += 1;
        let ddr = memory(DDR_TOTAL, DDR_TOTAL / 4);
        let payload = format!(
            "Memory Usage - DDR: {:.2} / {:.2} MiB, Temperatures - Average: {:.2} C (tick {tick})",
            ddr.used as f64 / (1024.0 * 1024.0),
            ddr.total as f64 / (1024.0 * 1024.0),
            temperature().average,
        );
        let record = LogMessage {
            node_id_name: SYSTEM_NODE.to_string(),
            level: LogLevel::Info,
            time: wall_clock(),
            color_range_start: 0,
            color_range_end: 0,
            payload,
        };
        let sent = device_log::encode_batch(&[record])
            .map_err(|err| err.to_string())
            .and_then(|batch| stream.write(&batch).map_err(|err| err.to_string()));
        if sent.is_err() {
            return;
        }
    }
}

fn wall_clock() -> Timestamp {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Timestamp {
        sec: now.as_secs() as i64,
        nsec: i64::from(now.subsec_nanos()),
    }
}

fn watchdog_loop(session: &Session) {
    let Some(timeout) = session.shared.config.watchdog_timeout else {
        return;
    };
    while !wait_closed(&session.link, WATCHDOG_POLL) {
        if lock(&session.last_rpc).elapsed() > timeout {
            warn!(?timeout, "no host activity; watchdog reset");
            session.link.close();
            return;
        }
    }
}

fn produce(session: &Session, stream_name: &str) {
    let Ok(stream) = session.link.open_stream(stream_name, 0) else {
        return;
    };
    let interval = session.shared.config.output_interval;
    let mut sequence = 0u64;
    loop {
        let message = json!({"stream": stream_name, "sequence": sequence});
        if stream.write(message.to_string().as_bytes()).is_err() {
            return;
        }
        sequence += 1;
        if wait_closed(&session.link, interval) {
            return;
        }
    }
}

fn record(session: &Session, stream_name: &str) {
    let Ok(stream) = session.link.open_stream(stream_name, 0) else {
        return;
    };
    while let Ok(packet) = stream.read() {
        session.shared.record_received(stream_name, packet);
    }
}
