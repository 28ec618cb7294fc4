//! Length-prefixed framing with stream-id multiplexing.
//!
//! Every frame on the link carries:
//! - A 2-byte magic number ("XL") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A 2-byte little-endian stream id
//!
//! Named streams are mapped onto ids by the layer above.

pub mod codec;
pub mod error;
pub mod reader;
pub mod stream;
pub mod writer;

pub use codec::{decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use stream::{is_reserved, BOOT, CONTROL, FIRST_DYNAMIC_STREAM};
pub use writer::FrameWriter;
