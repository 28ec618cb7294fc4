/// Errors decoding or encoding link payloads.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A binary packet was shorter than its layout requires.
    #[error("{what} needs {expected} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Leading command word not known for this direction.
    #[error("unknown command {0}")]
    UnknownCommand(u32),

    #[error("unknown firmware image magic {0:02x?}")]
    UnknownImage([u8; 4]),

    #[error("invalid version '{0}': expected '<major>.<minor>.<patch>'")]
    InvalidVersion(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
