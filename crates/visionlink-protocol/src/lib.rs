//! Wire types spoken over a device link.
//!
//! Both the host session and the simulated device use these, so the
//! encodings live in one place:
//! - [`rpc`]: JSON request/response envelope on `__rpc_main`
//! - [`bootloader`]: fixed-layout little-endian structs on `__bootloader`
//! - [`log`]: log record batches on `__log`
//! - [`timesync`]: the 16-byte clock packet on `__timesync`
//! - [`firmware`]: the header every boot image starts with

pub mod bootloader;
pub mod error;
pub mod firmware;
pub mod log;
pub mod rpc;
pub mod schema;
pub mod streams;
pub mod telemetry;
pub mod timesync;
pub mod version;

pub use error::{ProtocolError, Result};
pub use firmware::{FirmwareHeader, FirmwareKind};
pub use log::{LogLevel, LogMessage, Timestamp};
pub use rpc::{RpcRequest, RpcResponse};
pub use telemetry::{CameraBoardSocket, ChipTemperature, CpuUsage, MemoryInfo, UsbSpeed};
pub use version::Version;
