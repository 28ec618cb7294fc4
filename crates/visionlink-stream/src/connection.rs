use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace, warn};
use visionlink_frame::{
    FrameError, FrameReader, FrameWriter, CONTROL, DEFAULT_MAX_PAYLOAD, FIRST_DYNAMIC_STREAM,
};
use visionlink_transport::IpcStream;

use crate::control::{ControlMessage, StreamOpen, CONTROL_STREAM_OPEN};
use crate::error::{LinkError, Result};

/// Packets a stream buffers before the receive thread stops reading the link.
pub const DEFAULT_INBOX_CAPACITY: usize = 64;

/// Which end of the link this connection is.
///
/// The host allocates stream ids and announces them; the device side waits
/// for those announcements when it opens a stream by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Host,
    Device,
}

/// One live link to a device, carrying any number of named streams.
///
/// A background receive thread demultiplexes incoming frames into per-stream
/// inboxes. Each inbox is bounded; when one is full the receive thread waits
/// for a reader, the socket backs up and the peer's writes block.
/// [`LinkConnection::close`] shuts the byte stream down, which
/// unblocks every pending read or write on every stream of this link. A
/// closed connection is never reused.
pub struct LinkConnection {
    shared: Arc<Shared>,
    stream: IpcStream,
    rx_thread: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    role: LinkRole,
    closed: AtomicBool,
    inbox_capacity: AtomicUsize,
    writer: Mutex<FrameWriter<IpcStream>>,
    table: Mutex<StreamTable>,
    announced: Condvar,
}

struct StreamTable {
    by_name: HashMap<String, (u16, usize)>,
    inboxes: HashMap<u16, Arc<Inbox>>,
    next_id: u16,
}

struct Inbox {
    state: Mutex<InboxState>,
    ready: Condvar,
    space: Condvar,
    capacity: usize,
}

impl Inbox {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(InboxState::default()),
            ready: Condvar::new(),
            space: Condvar::new(),
            capacity: capacity.max(1),
        })
    }
}

#[derive(Default)]
struct InboxState {
    packets: VecDeque<Bytes>,
    closed: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LinkConnection {
    /// Start a link over an already set-up byte stream.
    pub fn new(stream: IpcStream, role: LinkRole) -> Result<Self> {
        let reader = FrameReader::new(stream.try_clone()?);
        Self::from_parts(reader, FrameWriter::new(stream), role)
    }

    /// Start a link from the framed halves left over after the hello exchange.
    pub fn from_parts(
        mut reader: FrameReader<IpcStream>,
        mut writer: FrameWriter<IpcStream>,
        role: LinkRole,
    ) -> Result<Self> {
        // Setup used tight limits and timeouts; the live link blocks freely.
        reader.set_read_timeout(None)?;
        reader.set_max_payload_size(DEFAULT_MAX_PAYLOAD);
        writer.get_ref().set_write_timeout(None)?;
        writer.set_max_payload_size(DEFAULT_MAX_PAYLOAD);

        let stream = writer.get_ref().try_clone()?;
        let shared = Arc::new(Shared {
            role,
            closed: AtomicBool::new(false),
            inbox_capacity: AtomicUsize::new(DEFAULT_INBOX_CAPACITY),
            writer: Mutex::new(writer),
            table: Mutex::new(StreamTable {
                by_name: HashMap::new(),
                inboxes: HashMap::new(),
                next_id: FIRST_DYNAMIC_STREAM,
            }),
            announced: Condvar::new(),
        });

        let rx_shared = Arc::clone(&shared);
        let rx_thread = thread::Builder::new()
            .name("xlink-rx".to_string())
            .spawn(move || receive_loop(rx_shared, reader))
            .map_err(|err| LinkError::Transport(err.into()))?;

        debug!(?role, "link up");
        Ok(Self {
            shared,
            stream,
            rx_thread: Mutex::new(Some(rx_thread)),
        })
    }

    pub fn role(&self) -> LinkRole {
        self.shared.role
    }

    /// Open the named stream.
    ///
    /// On the host this allocates an id and announces it to the device with
    /// `max_size` as the packet limit. On the device this blocks until the
    /// host has announced `name` and `max_size` is ignored. Opening a name
    /// that is already open returns another handle on the same stream.
    pub fn open_stream(&self, name: &str, max_size: usize) -> Result<StreamChannel> {
        match self.shared.role {
            LinkRole::Host => self.shared.open_host(name, max_size),
            LinkRole::Device => self.shared.open_device(name),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Bound, in packets, for inboxes of streams opened from now on.
    pub fn set_inbox_capacity(&self, packets: usize) {
        self.shared.inbox_capacity.store(packets.max(1), Ordering::SeqCst);
    }

    /// Close the link.
    ///
    /// Idempotent. Blocked reads on any stream return [`LinkError::Closed`]
    /// and later operations fail the same way.
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            debug!(role = ?self.shared.role, "closing link");
        }
        if let Err(err) = self.stream.shutdown() {
            trace!(error = %err, "link shutdown");
        }
        self.shared.mark_closed(true);

        let handle = lock(&self.rx_thread).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for LinkConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for LinkConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkConnection")
            .field("role", &self.shared.role)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Shared {
    fn open_host(self: &Arc<Self>, name: &str, max_size: usize) -> Result<StreamChannel> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LinkError::Closed);
        }

        // Writer lock first so the announcement precedes any data on the id.
        let mut writer = lock(&self.writer);
        let (id, max_size, inbox, fresh) = {
            let mut table = lock(&self.table);
            match table.by_name.get(name).copied() {
                Some((id, max)) => {
                    let inbox = table
                        .inboxes
                        .get(&id)
                        .cloned()
                        .unwrap_or_else(|| self.new_inbox());
                    (id, max, inbox, false)
                }
                None => {
                    let id = table.next_id;
                    table.next_id = id
                        .checked_add(1)
                        .ok_or_else(|| LinkError::Protocol("stream ids exhausted".to_string()))?;
                    let inbox = self.new_inbox();
                    table.by_name.insert(name.to_string(), (id, max_size));
                    table.inboxes.insert(id, Arc::clone(&inbox));
                    (id, max_size, inbox, true)
                }
            }
        };

        if fresh {
            let announce = ControlMessage::stream_open(name, id, max_size)?.to_bytes()?;
            writer
                .send(CONTROL, &announce)
                .map_err(|err| self.write_error(err))?;
            debug!(stream = name, id, max_size, "stream opened");
        }
        drop(writer);

        Ok(StreamChannel {
            name: name.to_string(),
            id,
            max_size,
            inbox,
            shared: Arc::clone(self),
        })
    }

    fn open_device(self: &Arc<Self>, name: &str) -> Result<StreamChannel> {
        let mut table = lock(&self.table);
        loop {
            if let Some(&(id, max_size)) = table.by_name.get(name) {
                let inbox = table
                    .inboxes
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| self.new_inbox());
                debug!(stream = name, id, "stream attached");
                return Ok(StreamChannel {
                    name: name.to_string(),
                    id,
                    max_size,
                    inbox,
                    shared: Arc::clone(self),
                });
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(LinkError::Closed);
            }
            table = self
                .announced
                .wait(table)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn handle_control(&self, payload: &[u8]) -> Result<()> {
        let msg = ControlMessage::from_bytes(payload)?;
        if msg.msg_type != CONTROL_STREAM_OPEN || self.role != LinkRole::Device {
            return Err(LinkError::Protocol(format!(
                "unexpected '{}' control message on live link",
                msg.msg_type
            )));
        }

        let open: StreamOpen = msg.payload_as()?;
        let mut table = lock(&self.table);
        table.by_name.insert(open.name.clone(), (open.id, open.max_size));
        let capacity = self.inbox_capacity.load(Ordering::SeqCst);
        table
            .inboxes
            .entry(open.id)
            .or_insert_with(|| Inbox::new(capacity));
        self.announced.notify_all();
        trace!(stream = %open.name, id = open.id, "stream announced");
        Ok(())
    }

    fn new_inbox(&self) -> Arc<Inbox> {
        Inbox::new(self.inbox_capacity.load(Ordering::SeqCst))
    }

    /// Hand a packet to its stream, waiting while that stream's inbox is full.
    fn deliver(&self, id: u16, payload: Bytes) {
        let Some(inbox) = lock(&self.table).inboxes.get(&id).cloned() else {
            trace!(id, size = payload.len(), "dropping packet for unknown stream");
            return;
        };
        let mut state = lock(&inbox.state);
        if !state.closed && state.packets.len() >= inbox.capacity {
            trace!(id, capacity = inbox.capacity, "inbox full; holding the link");
        }
        while !state.closed && state.packets.len() >= inbox.capacity {
            state = inbox
                .space
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if !state.closed {
            state.packets.push_back(payload);
            inbox.ready.notify_all();
        }
    }

    /// Mark every stream closed and wake all waiters. A local close also
    /// discards packets nobody has read yet.
    fn mark_closed(&self, discard_pending: bool) {
        self.closed.store(true, Ordering::SeqCst);
        let table = lock(&self.table);
        for inbox in table.inboxes.values() {
            let mut state = lock(&inbox.state);
            state.closed = true;
            if discard_pending {
                state.packets.clear();
            }
            inbox.ready.notify_all();
            inbox.space.notify_all();
        }
        self.announced.notify_all();
    }

    fn write_error(&self, err: FrameError) -> LinkError {
        if self.closed.load(Ordering::SeqCst) {
            return LinkError::Closed;
        }
        match err {
            FrameError::ConnectionClosed => LinkError::Closed,
            other => LinkError::Frame(other),
        }
    }
}

fn receive_loop(shared: Arc<Shared>, mut reader: FrameReader<IpcStream>) {
    loop {
        match reader.read_frame() {
            Ok(frame) if frame.stream == CONTROL => {
                if let Err(err) = shared.handle_control(&frame.payload) {
                    warn!(error = %err, "ignoring control message");
                }
            }
            Ok(frame) => shared.deliver(frame.stream, frame.payload),
            Err(err) => {
                if !shared.closed.load(Ordering::SeqCst) {
                    debug!(error = %err, role = ?shared.role, "link dropped");
                }
                break;
            }
        }
    }
    shared.mark_closed(false);
}

/// One named, bidirectional packet stream on a [`LinkConnection`].
///
/// Reads and writes block with no implicit timeout. The only way to cancel
/// a blocked call is to close the link underneath it.
pub struct StreamChannel {
    name: String,
    id: u16,
    max_size: usize,
    inbox: Arc<Inbox>,
    shared: Arc<Shared>,
}

impl StreamChannel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    /// Largest packet this stream accepts.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Send one packet (blocking).
    pub fn write(&self, data: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(LinkError::Closed);
        }
        if data.len() > self.max_size {
            return Err(LinkError::PayloadTooLarge {
                stream: self.name.clone(),
                size: data.len(),
                max: self.max_size,
            });
        }
        lock(&self.shared.writer)
            .send(self.id, data)
            .map_err(|err| self.shared.write_error(err))
    }

    /// Send `data` as consecutive packets no larger than the stream limit.
    ///
    /// Returns the number of packets written.
    pub fn write_split(&self, data: &[u8]) -> Result<usize> {
        let chunk = self.max_size.max(1);
        let mut packets = 0;
        for part in data.chunks(chunk) {
            self.write(part)?;
            packets += 1;
        }
        Ok(packets)
    }

    /// Receive the next packet (blocking).
    pub fn read(&self) -> Result<Bytes> {
        let mut state = lock(&self.inbox.state);
        loop {
            if let Some(packet) = state.packets.pop_front() {
                self.inbox.space.notify_one();
                return Ok(packet);
            }
            if state.closed {
                return Err(LinkError::Closed);
            }
            state = self
                .inbox
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Receive the next packet, or `Ok(None)` if none arrives within `timeout`.
    pub fn read_timeout(&self, timeout: Duration) -> Result<Option<Bytes>> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.inbox.state);
        loop {
            if let Some(packet) = state.packets.pop_front() {
                self.inbox.space.notify_one();
                return Ok(Some(packet));
            }
            if state.closed {
                return Err(LinkError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state = self
                .inbox
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl std::fmt::Debug for StreamChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamChannel")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("max_size", &self.max_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linked() -> (LinkConnection, LinkConnection) {
        let (host, device) = IpcStream::pair().unwrap();
        (
            LinkConnection::new(host, LinkRole::Host).unwrap(),
            LinkConnection::new(device, LinkRole::Device).unwrap(),
        )
    }

    #[test]
    fn named_stream_carries_packets_both_ways() {
        let (host, device) = linked();
        let host_rpc = host.open_stream("__rpc_main", 1024).unwrap();
        let device_rpc = device.open_stream("__rpc_main", 0).unwrap();

        assert_eq!(host_rpc.id(), FIRST_DYNAMIC_STREAM);
        assert_eq!(device_rpc.id(), host_rpc.id());
        assert_eq!(device_rpc.max_size(), 1024);

        host_rpc.write(b"request").unwrap();
        assert_eq!(device_rpc.read().unwrap().as_ref(), b"request");
        device_rpc.write(b"response").unwrap();
        assert_eq!(host_rpc.read().unwrap().as_ref(), b"response");
    }

    #[test]
    fn streams_are_independent() {
        let (host, device) = linked();
        let a = host.open_stream("a", 64).unwrap();
        let b = host.open_stream("b", 64).unwrap();
        let dev_b = device.open_stream("b", 0).unwrap();
        let dev_a = device.open_stream("a", 0).unwrap();

        a.write(b"first-a").unwrap();
        b.write(b"first-b").unwrap();
        a.write(b"second-a").unwrap();

        assert_eq!(dev_b.read().unwrap().as_ref(), b"first-b");
        assert_eq!(dev_a.read().unwrap().as_ref(), b"first-a");
        assert_eq!(dev_a.read().unwrap().as_ref(), b"second-a");
    }

    #[test]
    fn reopening_a_name_shares_the_stream() {
        let (host, _device) = linked();
        let first = host.open_stream("__log", 128).unwrap();
        let second = host.open_stream("__log", 4096).unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(second.max_size(), 128);
    }

    #[test]
    fn device_open_waits_for_announcement() {
        let (host, device) = linked();
        let device = Arc::new(device);

        let waiter = {
            let device = Arc::clone(&device);
            thread::spawn(move || device.open_stream("__timesync", 0).map(|s| s.id()))
        };
        thread::sleep(Duration::from_millis(30));
        let stream = host.open_stream("__timesync", 128).unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), stream.id());
    }

    #[test]
    fn oversized_write_rejected() {
        let (host, _device) = linked();
        let watchdog = host.open_stream("__watchdog", 4).unwrap();
        assert!(matches!(
            watchdog.write(&[0u8; 5]),
            Err(LinkError::PayloadTooLarge { size: 5, max: 4, .. })
        ));
        watchdog.write(&[0u8; 4]).unwrap();
    }

    #[test]
    fn write_split_respects_limit() {
        let (host, device) = linked();
        let upload = host.open_stream("__stream_asset_storage", 4).unwrap();
        let sink = device.open_stream("__stream_asset_storage", 0).unwrap();

        assert_eq!(upload.write_split(b"0123456789").unwrap(), 3);
        let parts: Vec<Bytes> = (0..3).map(|_| sink.read().unwrap()).collect();
        assert_eq!(parts, vec![
            Bytes::from_static(b"0123"),
            Bytes::from_static(b"4567"),
            Bytes::from_static(b"89"),
        ]);
    }

    #[test]
    fn close_unblocks_pending_read() {
        let (host, _device) = linked();
        let host = Arc::new(host);
        let stream = host.open_stream("__log", 1024).unwrap();

        let reader = thread::spawn(move || stream.read());
        thread::sleep(Duration::from_millis(30));
        host.close();

        assert!(matches!(reader.join().unwrap(), Err(LinkError::Closed)));
        assert!(host.is_closed());
        host.close();
    }

    #[test]
    fn peer_drop_unblocks_reads_and_fails_writes() {
        let (host, device) = linked();
        let stream = host.open_stream("__rpc_main", 1024).unwrap();
        let dev_stream = device.open_stream("__rpc_main", 0).unwrap();
        dev_stream.write(b"last words").unwrap();
        drop(dev_stream);
        drop(device);

        // Packets that made it before the drop are still delivered.
        assert_eq!(stream.read().unwrap().as_ref(), b"last words");
        assert!(matches!(stream.read(), Err(LinkError::Closed)));
        assert!(matches!(stream.write(b"x"), Err(LinkError::Closed)));
        assert!(matches!(
            host.open_stream("late", 8),
            Err(LinkError::Closed)
        ));
    }

    #[test]
    fn device_open_fails_once_link_closes() {
        let (host, device) = linked();
        let device = Arc::new(device);
        let waiter = {
            let device = Arc::clone(&device);
            thread::spawn(move || device.open_stream("never", 0))
        };
        thread::sleep(Duration::from_millis(20));
        drop(host);
        assert!(matches!(waiter.join().unwrap(), Err(LinkError::Closed)));
    }

    #[test]
    fn full_inbox_blocks_the_peer_writer() {
        let (host, device) = linked();
        host.set_inbox_capacity(2);
        let rx = host.open_stream("frames", 1024 * 1024).unwrap();
        let tx = device.open_stream("frames", 0).unwrap();

        let total = 32;
        let written = Arc::new(AtomicUsize::new(0));
        let writer = {
            let written = Arc::clone(&written);
            thread::spawn(move || {
                let packet = vec![0xabu8; 1024 * 1024];
                for _ in 0..total {
                    tx.write(&packet)?;
                    written.fetch_add(1, Ordering::SeqCst);
                }
                Ok::<_, LinkError>(())
            })
        };

        thread::sleep(Duration::from_millis(300));
        let stalled_at = written.load(Ordering::SeqCst);
        assert!(stalled_at < total, "writer finished with nobody reading");

        for _ in 0..total {
            assert_eq!(rx.read().unwrap().len(), 1024 * 1024);
        }
        writer.join().unwrap().unwrap();
        assert_eq!(written.load(Ordering::SeqCst), total);
    }

    #[test]
    fn close_releases_a_receive_thread_waiting_for_space() {
        let (host, device) = linked();
        host.set_inbox_capacity(1);
        let _rx = host.open_stream("frames", 64).unwrap();
        let tx = device.open_stream("frames", 0).unwrap();
        for _ in 0..4 {
            tx.write(b"unread").unwrap();
        }
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        host.close();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(host.is_closed());
    }

    #[test]
    fn read_timeout_expires_then_delivers() {
        let (host, device) = linked();
        let tx = host.open_stream("s", 16).unwrap();
        let rx = device.open_stream("s", 0).unwrap();

        assert!(rx.read_timeout(Duration::from_millis(20)).unwrap().is_none());
        tx.write(b"late").unwrap();
        assert_eq!(
            rx.read_timeout(Duration::from_secs(2)).unwrap().unwrap().as_ref(),
            b"late"
        );
    }
}
