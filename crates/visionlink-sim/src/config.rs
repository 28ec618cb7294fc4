use std::time::Duration;

use visionlink_protocol::Version;
use visionlink_stream::{BootState, HelloConfig};

/// Behaviour of a simulated device.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub device_id: String,
    /// State the device powers up in and returns to after every reset.
    pub initial_state: BootState,
    /// Reset when no keepalive (or, once booted, no RPC) arrives for this
    /// long. `None` disables the watchdog.
    pub watchdog_timeout: Option<Duration>,
    pub bootloader_version: Version,
    /// Progress values reported while flashing, in order.
    pub flash_progress: Vec<f32>,
    /// Fail every flash with this message.
    pub flash_error: Option<String>,
    /// End every flash with a reply that is not a flash response.
    pub flash_unknown_response: bool,
    /// Fail `buildPipeline` with this message.
    pub build_error: Option<String>,
    /// Fail `setLogLevel` with this message.
    pub log_level_error: Option<String>,
    /// Send one log batch that does not parse before any real records.
    pub garbage_log_batch: bool,
    /// Delay between messages on each XLinkOut stream.
    pub output_interval: Duration,
    pub timesync_interval: Duration,
    pub hello: HelloConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            device_id: "14442C10D13EABCE00".to_string(),
            initial_state: BootState::Unbooted,
            watchdog_timeout: Some(Duration::from_millis(1500)),
            bootloader_version: Version::new(0, 0, 15),
            flash_progress: vec![0.3, 0.6, 0.9],
            flash_error: None,
            flash_unknown_response: false,
            build_error: None,
            log_level_error: None,
            garbage_log_batch: false,
            output_interval: Duration::from_millis(50),
            timesync_interval: Duration::from_millis(500),
            hello: HelloConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn new(device_id: impl Into<String>, initial_state: BootState) -> Self {
        Self {
            device_id: device_id.into(),
            initial_state,
            ..Self::default()
        }
    }
}
