//! Device links: discovery, link setup, and named stream channels.
//!
//! A host finds devices through a [`LinkBackend`], runs the hello exchange,
//! then either boots an unbooted device with a firmware image or attaches to
//! one that already runs firmware. The resulting [`LinkConnection`] carries
//! any number of named [`StreamChannel`]s over a single byte stream.

pub mod connection;
pub mod connector;
pub mod control;
pub mod device_info;
pub mod discovery;
pub mod error;
pub mod handshake;
pub mod listener;

pub use connection::{LinkConnection, LinkRole, StreamChannel};
pub use connector::{attach, boot, probe, LinkConfig};
pub use control::{ControlMessage, ImageKind};
pub use device_info::{BootState, DeviceInfo};
pub use discovery::{
    get_all_available_devices, get_any_available_device, get_device_by_mx_id,
    get_first_available_device, LinkBackend, UdsBackend, DEFAULT_DEVICE_DIR,
    DEFAULT_SEARCH_TIME, DEVICE_DIR_ENV, POLL_INTERVAL,
};
pub use error::{LinkError, Result};
pub use handshake::{hello_device, hello_host, HelloConfig, HelloRequest, HelloResult};
pub use listener::{DeviceListener, LinkStart, PendingHost};
