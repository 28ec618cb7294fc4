//! Host-side sessions with a vision processor.
//!
//! [`Device`] boots a device (or attaches to one already running), keeps it
//! alive with a watchdog, forwards its logs, and moves pipeline data through
//! [`DataOutputQueue`]s and [`DataInputQueue`]s. [`DeviceBootloader`] talks
//! to the bootloader instead: version queries and flashing application
//! packages.

pub mod bootloader;
pub mod config;
pub mod data_queue;
pub mod device;
pub mod error;
pub mod event_queue;
pub mod init;
pub mod locking_queue;
pub mod pipeline;
pub mod resources;
pub mod rpc;
mod worker;

pub use bootloader::DeviceBootloader;
pub use config::{BootloaderConfig, DeviceConfig, FirmwareSource};
pub use data_queue::{CallbackId, DataInputQueue, DataOutputQueue, RawMessage};
pub use device::{Device, LogCallbackId, DEFAULT_QUEUE_SIZE, DEVICE_LOG_TARGET};
pub use error::{DeviceError, Result};
pub use event_queue::{EventQueue, EVENT_QUEUE_MAXIMUM_SIZE};
pub use init::{initialize, monotonic_now};
pub use locking_queue::LockingQueue;
pub use pipeline::{Endpoint, GenericNode, Node, NodeId, Pipeline, SerializedPipeline, XLinkIn, XLinkOut};
pub use resources::{FirmwareProvider, Resources, BOOTLOADER_VERSION, DEVICE_FIRMWARE_VERSION};
pub use rpc::RpcClient;

pub use visionlink_protocol::{
    CameraBoardSocket, ChipTemperature, CpuUsage, LogLevel, LogMessage, MemoryInfo, UsbSpeed,
    Version,
};
pub use visionlink_stream::{
    get_all_available_devices, get_any_available_device, get_device_by_mx_id,
    get_first_available_device, BootState, DeviceInfo, LinkBackend, UdsBackend,
};
