//! Well-known stream names, packet limits, and protocol timings.

use std::time::Duration;

pub const RPC_STREAM: &str = "__rpc_main";
pub const RPC_MAX_SIZE: usize = 5 * 1024 * 1024;

/// Carries raw keepalive frames to the bootloader. The application
/// watchdog uses RPC instead.
pub const WATCHDOG_STREAM: &str = "__watchdog";
pub const WATCHDOG_MAX_SIZE: usize = 64;

pub const TIMESYNC_STREAM: &str = "__timesync";
pub const TIMESYNC_MAX_SIZE: usize = 128;

pub const LOG_STREAM: &str = "__log";
pub const LOG_MAX_SIZE: usize = 128 * 1024;

/// Stream the device pulls asset storage bytes from during pipeline start.
pub const ASSET_STORAGE_STREAM: &str = "__stream_asset_storage";
pub const ASSET_STORAGE_MAX_SIZE: usize = 5 * 1024 * 1024;

/// Packet limit for pipeline data streams.
pub const DEFAULT_STREAM_MAX_SIZE: usize = 5 * 1024 * 1024;

pub const BOOTLOADER_STREAM: &str = "__bootloader";
pub const BOOTLOADER_MAX_SIZE: usize = 5 * 1024 * 1024;

/// The device resets if it hears no keepalive for this long.
pub const DEVICE_WATCHDOG_TIMEOUT: Duration = Duration::from_millis(1500);
pub const BOOTLOADER_WATCHDOG_TIMEOUT: Duration = Duration::from_millis(1500);

/// Time the bootloader needs to drop off the bus after a reset.
pub const BOOTLOADER_SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Event name pushed when the watchdog loses the device.
pub const LINK_LOST_EVENT: &str = "__link_lost";
