//! A simulated device for tests and demos.
//!
//! [`SimDevice::spawn`] binds a Unix socket and answers hosts the way real
//! hardware would: it reports its boot state in hello, accepts application
//! or bootloader images, serves RPC once booted, produces data on XLinkOut
//! streams, records what arrives on XLinkIn streams, and runs the bootloader
//! flashing protocol. A watchdog resets the device when the host goes
//! quiet.

mod application;
mod bootloader;
pub mod config;
mod device;
pub mod error;

pub use config::SimConfig;
pub use device::{SimDevice, SimHandle};
pub use error::{Result, SimError};
