use std::fmt;
use std::io;

use visionlink_device::DeviceError;
use visionlink_package::PackageError;
use visionlink_sim::SimError;
use visionlink_stream::LinkError;
use visionlink_transport::TransportError;

// Exit code constants aligned with rsfulmen/DDR-0002 semantics.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const NOT_FOUND: i32 = 2;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::NotFound => NOT_FOUND,
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn link_error(context: &str, err: LinkError) -> CliError {
    match err {
        LinkError::Transport(err) => transport_error(context, err),
        LinkError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        LinkError::PayloadTooLarge { .. } | LinkError::Json(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        LinkError::BootRejected(_) | LinkError::UnexpectedState { .. } => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn package_error(context: &str, err: PackageError) -> CliError {
    match err {
        PackageError::Io { source, .. } => io_error(context, source),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn device_error(context: &str, err: DeviceError) -> CliError {
    match err {
        DeviceError::NoDevicesFound => CliError::new(NOT_FOUND, format!("{context}: {err}")),
        DeviceError::Link(err) => link_error(context, err),
        DeviceError::Package(err) => package_error(context, err),
        DeviceError::Io { source, .. } => io_error(context, source),
        DeviceError::InvalidBootState(_)
        | DeviceError::Rpc { .. }
        | DeviceError::Closed
        | DeviceError::PipelineBuild(_)
        | DeviceError::BootloaderResponse(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        DeviceError::Firmware(_)
        | DeviceError::MessageTooLarge { .. }
        | DeviceError::Protocol(_)
        | DeviceError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn sim_error(context: &str, err: SimError) -> CliError {
    match err {
        SimError::Link(err) => link_error(context, err),
        SimError::Spawn(source) => io_error(context, source),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn missing_device_maps_to_not_found() {
        let err = device_error("open failed", DeviceError::NoDevicesFound);
        assert_eq!(err.code, NOT_FOUND);
        assert_eq!(err.message, "open failed: no available devices");
    }

    #[test]
    fn link_timeout_maps_to_timeout() {
        let err = device_error(
            "open failed",
            DeviceError::Link(LinkError::Timeout(Duration::from_secs(1))),
        );
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn corrupt_package_is_data_invalid() {
        let err = package_error("inspect failed", PackageError::BadIdentifier(*b"XX"));
        assert_eq!(err.code, DATA_INVALID);
    }
}
