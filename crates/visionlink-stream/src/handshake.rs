use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use visionlink_frame::{Frame, FrameError, FrameReader, FrameWriter, CONTROL};

use crate::device_info::BootState;
use crate::error::{LinkError, Result};

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_VERSION_LEN: usize = 16;
const MAX_DEVICE_ID_LEN: usize = 64;

/// First message on a fresh link, host to device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloRequest {
    pub protocol: String,
    pub version: String,
}

/// Device answer to [`HelloRequest`], carrying its identity and boot state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloResponse {
    pub protocol: String,
    pub version: String,
    pub device_id: String,
    pub state: BootState,
}

/// What the host learned from the hello exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloResult {
    pub device_id: String,
    pub state: BootState,
    pub protocol_version: String,
}

/// Configuration for the hello exchange.
#[derive(Debug, Clone)]
pub struct HelloConfig {
    /// Upper bound for the whole exchange.
    pub timeout: Duration,
    pub protocol_name: String,
    pub protocol_version: String,
    /// Largest hello frame accepted before the link is established.
    pub max_hello_payload: usize,
}

impl Default for HelloConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            protocol_name: "xlink".to_string(),
            protocol_version: "1.0".to_string(),
            max_hello_payload: 4 * 1024,
        }
    }
}

/// Host side of the hello exchange.
pub fn hello_host<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    config: &HelloConfig,
) -> Result<HelloResult> {
    validate_protocol_name(&config.protocol_name)?;
    validate_version(&config.protocol_version)?;

    send_control_json(
        writer,
        &HelloRequest {
            protocol: config.protocol_name.clone(),
            version: config.protocol_version.clone(),
        },
    )?;

    let payload = recv_control_payload(reader, config)?;
    let resp: HelloResponse = serde_json::from_slice(&payload)?;

    validate_protocol_name(&resp.protocol)?;
    validate_version(&resp.version)?;
    validate_device_id(&resp.device_id)?;

    if resp.protocol != config.protocol_name {
        return Err(LinkError::HandshakeFailed(format!(
            "unknown protocol '{}' (expected '{}')",
            resp.protocol, config.protocol_name
        )));
    }
    if !is_version_compatible(&config.protocol_version, &resp.version)? {
        return Err(LinkError::HandshakeFailed(format!(
            "incompatible device version '{}' (host '{}')",
            resp.version, config.protocol_version
        )));
    }

    Ok(HelloResult {
        device_id: resp.device_id,
        state: resp.state,
        protocol_version: resp.version,
    })
}

/// Device side of the hello exchange: answer with identity and boot state.
pub fn hello_device<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    device_id: &str,
    state: BootState,
    config: &HelloConfig,
) -> Result<HelloRequest> {
    validate_device_id(device_id)?;

    let payload = recv_control_payload(reader, config)?;
    let req: HelloRequest = serde_json::from_slice(&payload)?;

    validate_protocol_name(&req.protocol)?;
    validate_version(&req.version)?;
    if req.protocol != config.protocol_name {
        return Err(LinkError::HandshakeFailed(format!(
            "unknown protocol '{}' (expected '{}')",
            req.protocol, config.protocol_name
        )));
    }
    if !is_version_compatible(&req.version, &config.protocol_version)? {
        return Err(LinkError::HandshakeFailed(format!(
            "incompatible host version '{}' (device '{}')",
            req.version, config.protocol_version
        )));
    }

    send_control_json(
        writer,
        &HelloResponse {
            protocol: config.protocol_name.clone(),
            version: config.protocol_version.clone(),
            device_id: device_id.to_string(),
            state,
        },
    )?;
    Ok(req)
}

pub(crate) fn send_control_json<T: Serialize, W: Write>(
    writer: &mut FrameWriter<W>,
    value: &T,
) -> Result<()> {
    let payload = serde_json::to_vec(value)?;
    writer.send(CONTROL, &payload)?;
    Ok(())
}

/// Next CONTROL payload before the link is up, honoring the hello deadline.
pub(crate) fn recv_control_payload<R: Read>(
    reader: &mut FrameReader<R>,
    config: &HelloConfig,
) -> Result<Vec<u8>> {
    let frame = recv_setup_frame(reader, Instant::now() + config.timeout, config.timeout)?;
    if frame.stream != CONTROL {
        return Err(LinkError::HandshakeFailed(format!(
            "expected CONTROL stream {}, got {}",
            CONTROL, frame.stream
        )));
    }
    if frame.payload.len() > config.max_hello_payload {
        return Err(LinkError::HandshakeFailed(format!(
            "control payload too large: {} (max {})",
            frame.payload.len(),
            config.max_hello_payload
        )));
    }
    Ok(frame.payload.to_vec())
}

/// Next frame of any stream during setup, giving up at `deadline`.
///
/// The socket read timeout set for setup turns a silent peer into
/// `WouldBlock`, which is retried until the deadline passes.
pub(crate) fn recv_setup_frame<R: Read>(
    reader: &mut FrameReader<R>,
    deadline: Instant,
    budget: Duration,
) -> Result<Frame> {
    loop {
        if Instant::now() >= deadline {
            return Err(LinkError::Timeout(budget));
        }

        match reader.read_frame() {
            Ok(frame) => return Ok(frame),
            Err(FrameError::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(FrameError::ConnectionClosed) => {
                return Err(LinkError::Disconnected(
                    "link closed during setup".to_string(),
                ));
            }
            Err(err) => return Err(LinkError::Frame(err)),
        }
    }
}

fn validate_protocol_name(protocol: &str) -> Result<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_LEN {
        return Err(LinkError::HandshakeFailed(format!(
            "invalid protocol name length: {}",
            protocol.len()
        )));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(LinkError::HandshakeFailed(format!(
            "invalid protocol version length: {}",
            version.len()
        )));
    }
    parse_version(version).map(|_| ())
}

fn validate_device_id(device_id: &str) -> Result<()> {
    if device_id.is_empty() || device_id.len() > MAX_DEVICE_ID_LEN {
        return Err(LinkError::HandshakeFailed(format!(
            "invalid device id length: {}",
            device_id.len()
        )));
    }
    Ok(())
}

/// Same major, and the responder's minor is at least the requester's.
fn is_version_compatible(requester: &str, responder: &str) -> Result<bool> {
    let (req_major, req_minor) = parse_version(requester)?;
    let (resp_major, resp_minor) = parse_version(responder)?;
    Ok(req_major == resp_major && resp_minor >= req_minor)
}

fn parse_version(version: &str) -> Result<(u16, u16)> {
    let invalid = |why: &str| LinkError::HandshakeFailed(format!("invalid version '{version}': {why}"));

    let (major, minor) = version
        .split_once('.')
        .ok_or_else(|| invalid("expected '<major>.<minor>'"))?;
    if minor.contains('.') {
        return Err(invalid("expected '<major>.<minor>'"));
    }
    let major = major.parse::<u16>().map_err(|_| invalid("non-numeric major"))?;
    let minor = minor.parse::<u16>().map_err(|_| invalid("non-numeric minor"))?;
    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, ErrorKind, Read};
    use std::thread;

    use visionlink_transport::IpcStream;

    use super::*;

    fn framed_pair() -> (
        (FrameReader<IpcStream>, FrameWriter<IpcStream>),
        (FrameReader<IpcStream>, FrameWriter<IpcStream>),
    ) {
        let (host, device) = IpcStream::pair().unwrap();
        (
            (FrameReader::new(host.try_clone().unwrap()), FrameWriter::new(host)),
            (FrameReader::new(device.try_clone().unwrap()), FrameWriter::new(device)),
        )
    }

    #[test]
    fn host_learns_identity_and_state() {
        let ((mut hr, mut hw), (mut dr, mut dw)) = framed_pair();

        let device = thread::spawn(move || {
            hello_device(
                &mut dr,
                &mut dw,
                "14442C10D13EABCE00",
                BootState::Bootloader,
                &HelloConfig::default(),
            )
            .unwrap()
        });

        let result = hello_host(&mut hr, &mut hw, &HelloConfig::default()).unwrap();
        let request = device.join().unwrap();

        assert_eq!(result.device_id, "14442C10D13EABCE00");
        assert_eq!(result.state, BootState::Bootloader);
        assert_eq!(result.protocol_version, "1.0");
        assert_eq!(request.protocol, "xlink");
    }

    #[test]
    fn newer_device_minor_is_accepted() {
        let ((mut hr, mut hw), (mut dr, mut dw)) = framed_pair();

        let device = thread::spawn(move || {
            let cfg = HelloConfig {
                protocol_version: "1.3".to_string(),
                ..HelloConfig::default()
            };
            hello_device(&mut dr, &mut dw, "dev", BootState::Unbooted, &cfg)
        });

        let result = hello_host(&mut hr, &mut hw, &HelloConfig::default()).unwrap();
        assert_eq!(result.protocol_version, "1.3");
        assert!(device.join().unwrap().is_ok());
    }

    #[test]
    fn major_mismatch_is_rejected_by_device() {
        let ((mut hr, mut hw), (mut dr, mut dw)) = framed_pair();

        let device = thread::spawn(move || {
            let cfg = HelloConfig {
                protocol_version: "2.0".to_string(),
                ..HelloConfig::default()
            };
            hello_device(&mut dr, &mut dw, "dev", BootState::Unbooted, &cfg)
        });

        let host_result = hello_host(&mut hr, &mut hw, &HelloConfig::default());
        assert!(matches!(host_result, Err(LinkError::Disconnected(_))));
        assert!(matches!(
            device.join().unwrap(),
            Err(LinkError::HandshakeFailed(_))
        ));
    }

    #[test]
    fn wrong_protocol_name_rejected() {
        let ((mut hr, mut hw), (mut dr, mut dw)) = framed_pair();

        let device = thread::spawn(move || {
            hello_device(&mut dr, &mut dw, "dev", BootState::Booted, &HelloConfig::default())
        });

        let cfg = HelloConfig {
            protocol_name: "usb-rom".to_string(),
            ..HelloConfig::default()
        };
        let host_result = hello_host(&mut hr, &mut hw, &cfg);
        assert!(matches!(
            device.join().unwrap(),
            Err(LinkError::HandshakeFailed(_))
        ));
        assert!(host_result.is_err());
    }

    #[test]
    fn invalid_json_rejected() {
        let (host, device) = IpcStream::pair().unwrap();
        let mut raw = FrameWriter::new(host);
        raw.send(CONTROL, b"{not-json").unwrap();

        let mut dr = FrameReader::new(device.try_clone().unwrap());
        let mut dw = FrameWriter::new(device);
        let result = hello_device(&mut dr, &mut dw, "dev", BootState::Unbooted, &HelloConfig::default());
        assert!(matches!(result, Err(LinkError::Json(_))));
    }

    #[test]
    fn hello_times_out_on_silent_device() {
        struct Silent;
        impl Read for Silent {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(ErrorKind::TimedOut.into())
            }
        }

        let mut reader = FrameReader::new(Silent);
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let cfg = HelloConfig {
            timeout: Duration::from_millis(25),
            ..HelloConfig::default()
        };
        assert!(matches!(
            hello_host(&mut reader, &mut writer, &cfg),
            Err(LinkError::Timeout(_))
        ));
    }

    #[test]
    fn version_parsing() {
        assert_eq!(parse_version("1.0").unwrap(), (1, 0));
        assert!(parse_version("1").is_err());
        assert!(parse_version("1.0.0").is_err());
        assert!(parse_version("a.b").is_err());
        assert!(is_version_compatible("1.0", "1.2").unwrap());
        assert!(!is_version_compatible("1.2", "1.0").unwrap());
    }
}
