use std::path::PathBuf;

/// Errors building or reading SBR containers.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("not an SBR container (identifier {0:02x?})")]
    BadIdentifier([u8; 2]),

    #[error("container too short: {0} bytes, header needs {1}")]
    Truncated(usize, usize),

    #[error("section '{name}' spans {offset}..{end}, past end of container ({len} bytes)")]
    SectionOutOfBounds {
        name: String,
        offset: u64,
        end: u64,
        len: usize,
    },

    #[error("section '{name}' checksum mismatch: header {expected:#010x}, data {actual:#010x}")]
    ChecksumMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },

    #[error("section name '{0}' is empty or longer than 16 bytes")]
    InvalidName(String),

    #[error("too many sections: {0} (max 17)")]
    TooManySections(usize),

    #[error("container exceeds the 4 GiB addressable by the header")]
    TooLarge,

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PackageError>;
