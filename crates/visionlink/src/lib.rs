//! Host-side control of XLink vision devices.
//!
//! visionlink finds devices, boots them, talks to their firmware over RPC,
//! moves pipeline data through bounded queues, and flashes application
//! packages through the resident bootloader.
//!
//! # Crate Structure
//!
//! - [`transport`] - Byte stream transport (Unix domain sockets)
//! - [`frame`] - Length-prefixed frames tagged with a stream id
//! - [`stream`] - Link handshake, stream demultiplexing, discovery
//! - [`protocol`] - Wire types shared by host and device
//! - [`package`] - SBR flash containers
//! - [`device`] - Device and bootloader sessions
//! - [`sim`] - Simulated device (behind `sim` feature)

/// Re-export transport types.
pub mod transport {
    pub use visionlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use visionlink_frame::*;
}

/// Re-export link and discovery types.
pub mod stream {
    pub use visionlink_stream::*;
}

/// Re-export wire protocol types.
pub mod protocol {
    pub use visionlink_protocol::*;
}

/// Re-export SBR package types.
pub mod package {
    pub use visionlink_package::*;
}

/// Re-export session types.
pub mod device {
    pub use visionlink_device::*;
}

/// Re-export the simulated device (requires `sim` feature).
#[cfg(feature = "sim")]
pub mod sim {
    pub use visionlink_sim::*;
}
