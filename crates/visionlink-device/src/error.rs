use std::path::PathBuf;

use visionlink_stream::{BootState, LinkError};

/// Errors from device and bootloader sessions.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Discovery found nothing to connect to.
    #[error("no available devices")]
    NoDevicesFound,

    /// The device is in a state this session cannot start from.
    #[error("device in unexpected state: {0}")]
    InvalidBootState(BootState),

    #[error(transparent)]
    Link(#[from] LinkError),

    /// The device answered a call with an error.
    #[error("rpc '{method}' failed: {message}")]
    Rpc { method: String, message: String },

    /// The session was closed; only `close` and `is_closed` remain usable.
    #[error("device already closed or disconnected")]
    Closed,

    /// The device could not build the pipeline.
    #[error("couldn't build pipeline: {0}")]
    PipelineBuild(String),

    #[error("no queue named '{0}'")]
    QueueNotFound(String),

    /// The queue was torn down while the call was waiting on it.
    #[error("queue destroyed")]
    QueueDestroyed,

    #[error("message of {size} bytes exceeds queue '{queue}' limit of {max}")]
    MessageTooLarge {
        queue: String,
        size: usize,
        max: usize,
    },

    /// The bootloader answered with something other than what was asked.
    #[error("unexpected bootloader response: {0}")]
    BootloaderResponse(String),

    #[error("firmware unavailable: {0}")]
    Firmware(String),

    #[error(transparent)]
    Package(#[from] visionlink_package::PackageError),

    #[error(transparent)]
    Protocol(#[from] visionlink_protocol::ProtocolError),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
