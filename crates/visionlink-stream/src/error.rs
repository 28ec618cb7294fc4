use std::time::Duration;

/// Errors that can occur on a device link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] visionlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] visionlink_frame::FrameError),

    /// Control payload could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The hello exchange failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The device went away during connection setup.
    #[error("device disconnected: {0}")]
    Disconnected(String),

    /// A blocking setup step did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The link has been closed; no stream on it is usable any more.
    #[error("link closed")]
    Closed,

    /// A write exceeded the stream's maximum packet size.
    #[error("packet of {size} bytes exceeds stream '{stream}' limit of {max}")]
    PayloadTooLarge {
        stream: String,
        size: usize,
        max: usize,
    },

    /// The device refused the boot image.
    #[error("boot rejected by device: {0}")]
    BootRejected(String),

    /// The device is not in the boot state this operation needs.
    #[error("device is {actual}, expected {expected}")]
    UnexpectedState {
        expected: crate::device_info::BootState,
        actual: crate::device_info::BootState,
    },

    /// The peer sent something the link protocol does not allow here.
    #[error("link protocol violation: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, LinkError>;
