//! Reliable ordered byte-stream transport to a device.
//!
//! This is the lowest layer of visionlink. A device (or a simulated one) is
//! reached through an [`IpcStream`]; everything above treats it as an opaque
//! ordered byte pipe that can be shut down from any thread to unblock
//! pending reads and writes.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use traits::IpcStream;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
