use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use visionlink_stream::StreamChannel;

use crate::error::{DeviceError, Result};
use crate::init::monotonic_now;
use crate::locking_queue::LockingQueue;

/// One message on a data stream. The payload encoding belongs to the
/// pipeline node that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub data: Bytes,
    /// Host monotonic time when the message was received or created.
    pub timestamp: Duration,
}

impl RawMessage {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            timestamp: monotonic_now(),
        }
    }

    /// Decode a JSON payload.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.data)?)
    }
}

pub type CallbackId = u64;

type Callback = Arc<dyn Fn(&str, &Arc<RawMessage>) + Send + Sync>;
type MessageQueue = LockingQueue<Arc<RawMessage>>;

fn join_worker(worker: &Mutex<Option<JoinHandle<()>>>) {
    let handle = worker.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(handle) = handle {
        if handle.thread().id() != thread::current().id() {
            let _ = handle.join();
        }
    }
}

/// Device-to-host messages for one named stream.
///
/// A reader thread fills the queue from the stream and then runs every
/// registered callback with the new message, in that thread. The queue is
/// destroyed when the stream fails or the owning session closes.
pub struct DataOutputQueue {
    name: String,
    queue: Arc<MessageQueue>,
    callbacks: Arc<Mutex<BTreeMap<CallbackId, Callback>>>,
    next_callback: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl DataOutputQueue {
    pub fn new(stream: StreamChannel, max_size: usize, blocking: bool) -> Result<Self> {
        let name = stream.name().to_string();
        let queue = Arc::new(MessageQueue::new(max_size, blocking));
        let callbacks: Arc<Mutex<BTreeMap<CallbackId, Callback>>> = Arc::default();

        let reader = {
            let name = name.clone();
            let queue = Arc::clone(&queue);
            let callbacks = Arc::clone(&callbacks);
            thread::Builder::new()
                .name(format!("xlink-out-{name}"))
                .spawn(move || read_loop(&name, &stream, &queue, &callbacks))
                .map_err(DeviceError::Spawn)?
        };

        Ok(Self {
            name,
            queue,
            callbacks,
            next_callback: AtomicU64::new(1),
            reader: Mutex::new(Some(reader)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_max_size(&self, max_size: usize) {
        self.queue.set_max_size(max_size);
    }

    pub fn max_size(&self) -> usize {
        self.queue.max_size()
    }

    pub fn set_blocking(&self, blocking: bool) {
        self.queue.set_blocking(blocking);
    }

    pub fn blocking(&self) -> bool {
        self.queue.is_blocking()
    }

    /// Register `callback` to run on every new message.
    pub fn add_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&str, &Arc<RawMessage>) + Send + Sync + 'static,
    {
        let id = self.next_callback.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(callback));
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    fn check_alive(&self) -> Result<()> {
        if self.queue.is_destructed() {
            return Err(DeviceError::QueueDestroyed);
        }
        Ok(())
    }

    /// Wait for the next message.
    pub fn get(&self) -> Result<Arc<RawMessage>> {
        self.queue.pop().ok_or(DeviceError::QueueDestroyed)
    }

    pub fn try_get(&self) -> Result<Option<Arc<RawMessage>>> {
        self.check_alive()?;
        Ok(self.queue.try_pop())
    }

    /// Wait up to `timeout` for the next message.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Option<Arc<RawMessage>>> {
        let message = self.queue.pop_timeout(timeout);
        if message.is_none() {
            self.check_alive()?;
        }
        Ok(message)
    }

    pub fn try_get_all(&self) -> Result<Vec<Arc<RawMessage>>> {
        self.check_alive()?;
        Ok(self.queue.try_pop_all())
    }

    /// Oldest message, left in the queue.
    pub fn front(&self) -> Result<Option<Arc<RawMessage>>> {
        self.check_alive()?;
        Ok(self.queue.front())
    }

    pub fn has(&self) -> Result<bool> {
        self.check_alive()?;
        Ok(!self.queue.is_empty())
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_destructed()
    }

    /// Destroy the queue, waking anyone blocked on it.
    pub fn close(&self) {
        self.queue.destruct();
    }

    /// Wait for the reader thread. It exits once the stream fails.
    pub(crate) fn join(&self) {
        join_worker(&self.reader);
    }
}

fn read_loop(
    name: &str,
    stream: &StreamChannel,
    queue: &MessageQueue,
    callbacks: &Mutex<BTreeMap<CallbackId, Callback>>,
) {
    loop {
        let data = match stream.read() {
            Ok(data) => data,
            Err(err) => {
                debug!(stream = name, error = %err, "output stream ended");
                break;
            }
        };
        let message = Arc::new(RawMessage::new(data));
        if !queue.push(Arc::clone(&message)) {
            break;
        }

        let current: Vec<Callback> = callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for callback in current {
            callback(name, &message);
        }
    }
    queue.destruct();
}

/// Host-to-device messages for one named stream.
///
/// A writer thread drains the queue onto the stream in order.
pub struct DataInputQueue {
    name: String,
    max_data_size: usize,
    queue: Arc<MessageQueue>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl DataInputQueue {
    /// `max_data_size` bounds each message and should match the stream's
    /// packet limit.
    pub fn new(
        stream: StreamChannel,
        max_size: usize,
        blocking: bool,
        max_data_size: usize,
    ) -> Result<Self> {
        let name = stream.name().to_string();
        let queue = Arc::new(MessageQueue::new(max_size, blocking));

        let writer = {
            let name = name.clone();
            let queue = Arc::clone(&queue);
            thread::Builder::new()
                .name(format!("xlink-in-{name}"))
                .spawn(move || {
                    while let Some(message) = queue.pop() {
                        if let Err(err) = stream.write(&message.data) {
                            debug!(stream = %name, error = %err, "input stream ended");
                            break;
                        }
                        trace!(stream = %name, size = message.data.len(), "message sent");
                    }
                    queue.destruct();
                })
                .map_err(DeviceError::Spawn)?
        };

        Ok(Self {
            name,
            max_data_size,
            queue,
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_data_size(&self) -> usize {
        self.max_data_size
    }

    pub fn set_max_size(&self, max_size: usize) {
        self.queue.set_max_size(max_size);
    }

    pub fn max_size(&self) -> usize {
        self.queue.max_size()
    }

    pub fn set_blocking(&self, blocking: bool) {
        self.queue.set_blocking(blocking);
    }

    pub fn blocking(&self) -> bool {
        self.queue.is_blocking()
    }

    fn check_size(&self, message: &RawMessage) -> Result<()> {
        if message.data.len() > self.max_data_size {
            return Err(DeviceError::MessageTooLarge {
                queue: self.name.clone(),
                size: message.data.len(),
                max: self.max_data_size,
            });
        }
        Ok(())
    }

    /// Queue `message` for the device, waiting for space on a blocking queue.
    pub fn send(&self, message: RawMessage) -> Result<()> {
        self.check_size(&message)?;
        if !self.queue.push(Arc::new(message)) {
            return Err(DeviceError::QueueDestroyed);
        }
        Ok(())
    }

    /// Like [`send`](Self::send), but returns `Ok(false)` instead of waiting
    /// when a blocking queue is full.
    pub fn try_send(&self, message: RawMessage) -> Result<bool> {
        self.check_size(&message)?;
        if self.queue.is_destructed() {
            return Err(DeviceError::QueueDestroyed);
        }
        Ok(self.queue.try_push(Arc::new(message)))
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_destructed()
    }

    pub fn close(&self) {
        self.queue.destruct();
    }

    pub(crate) fn join(&self) {
        join_worker(&self.writer);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use visionlink_stream::{LinkConnection, LinkRole};
    use visionlink_transport::IpcStream;

    use super::*;

    fn linked() -> (LinkConnection, LinkConnection) {
        let (host, device) = IpcStream::pair().unwrap();
        (
            LinkConnection::new(host, LinkRole::Host).unwrap(),
            LinkConnection::new(device, LinkRole::Device).unwrap(),
        )
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(std::time::Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn non_blocking_output_keeps_last_three() {
        let (host, device) = linked();
        let queue = DataOutputQueue::new(host.open_stream("rgb", 1024).unwrap(), 3, false).unwrap();
        let delivered = Arc::new(AtomicUsize::new(0));
        {
            let delivered = Arc::clone(&delivered);
            queue.add_callback(move |_, _| {
                delivered.fetch_add(1, Ordering::SeqCst);
            });
        }

        let producer = device.open_stream("rgb", 0).unwrap();
        for i in 0..5u8 {
            producer.write(&[i]).unwrap();
        }
        wait_until(|| delivered.load(Ordering::SeqCst) == 5);

        let kept: Vec<u8> = queue
            .try_get_all()
            .unwrap()
            .iter()
            .map(|m| m.data[0])
            .collect();
        assert_eq!(kept, [2, 3, 4]);
    }

    #[test]
    fn callbacks_see_stream_name_and_can_be_removed() {
        let (host, device) = linked();
        let queue = DataOutputQueue::new(host.open_stream("imu", 1024).unwrap(), 8, false).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let id = {
            let seen = Arc::clone(&seen);
            queue.add_callback(move |name, message| {
                seen.lock().unwrap().push((name.to_string(), message.data.clone()));
            })
        };

        let producer = device.open_stream("imu", 0).unwrap();
        producer.write(b"a").unwrap();
        wait_until(|| seen.lock().unwrap().len() == 1);
        assert_eq!(seen.lock().unwrap()[0], ("imu".to_string(), Bytes::from_static(b"a")));

        assert!(queue.remove_callback(id));
        assert!(!queue.remove_callback(id));
        producer.write(b"b").unwrap();
        assert_eq!(queue.get().unwrap().data.as_ref(), b"a");
        assert_eq!(queue.get().unwrap().data.as_ref(), b"b");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn link_loss_destroys_output_queue() {
        let (host, device) = linked();
        let queue = DataOutputQueue::new(host.open_stream("depth", 64).unwrap(), 4, true).unwrap();
        drop(device);
        assert!(matches!(queue.get(), Err(DeviceError::QueueDestroyed)));
        queue.join();
        assert!(queue.is_closed());
    }

    #[test]
    fn input_queue_delivers_in_order() {
        let (host, device) = linked();
        let input = DataInputQueue::new(host.open_stream("control", 16).unwrap(), 4, true, 16).unwrap();
        let sink = device.open_stream("control", 0).unwrap();

        input.send(RawMessage::new(&b"one"[..])).unwrap();
        input.send(RawMessage::new(&b"two"[..])).unwrap();
        assert_eq!(sink.read().unwrap().as_ref(), b"one");
        assert_eq!(sink.read().unwrap().as_ref(), b"two");

        assert!(matches!(
            input.send(RawMessage::new(vec![0u8; 17])),
            Err(DeviceError::MessageTooLarge { size: 17, max: 16, .. })
        ));

        input.close();
        input.join();
        assert!(matches!(
            input.send(RawMessage::new(&b"late"[..])),
            Err(DeviceError::QueueDestroyed)
        ));
    }

    #[test]
    fn json_payloads_decode() {
        let message = RawMessage::new(&br#"{"seq":4}"#[..]);
        let value: serde_json::Value = message.decode_json().unwrap();
        assert_eq!(value["seq"], 4);
    }
}
