use std::path::PathBuf;

/// Errors that can occur while reaching a device over its byte transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind a listening address (simulated devices only).
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to reach the device at the given address.
    #[error("failed to connect to device at {address}: {source}")]
    Connect {
        address: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming host connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the byte stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The platform has no transport implementation.
    #[error("no transport available on this platform")]
    Unsupported,
}

pub type Result<T> = std::result::Result<T, TransportError>;
