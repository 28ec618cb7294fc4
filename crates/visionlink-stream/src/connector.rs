use std::time::{Duration, Instant};

use tracing::{debug, info};
use visionlink_frame::{
    FrameConfig, FrameReader, FrameWriter, BOOT, CONTROL, DEFAULT_MAX_PAYLOAD,
};
use visionlink_transport::IpcStream;

use crate::connection::{LinkConnection, LinkRole};
use crate::control::{
    BootAck, BootNack, ControlMessage, ImageKind, CONTROL_BOOT_ACK, CONTROL_BOOT_NACK,
};
use crate::device_info::BootState;
use crate::error::{LinkError, Result};
use crate::handshake::{hello_host, recv_control_payload, HelloConfig, HelloResult};

/// Host-side link setup configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub hello: HelloConfig,
    /// Size of each BOOT frame when uploading a firmware image.
    pub boot_chunk_size: usize,
    /// How long the device may take to accept an uploaded image.
    pub boot_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            hello: HelloConfig::default(),
            boot_chunk_size: 1024 * 1024,
            boot_timeout: Duration::from_secs(10),
        }
    }
}

type Framed = (FrameReader<IpcStream>, FrameWriter<IpcStream>);

fn framed(stream: IpcStream, hello: &HelloConfig) -> Result<Framed> {
    let reader_stream = stream.try_clone()?;
    let frame_config = FrameConfig {
        max_payload_size: hello.max_hello_payload,
        read_timeout: Some(hello.timeout),
        write_timeout: Some(hello.timeout),
    };
    let reader = FrameReader::with_config_ipc(reader_stream, frame_config.clone())?;
    let writer = FrameWriter::with_config_ipc(stream, frame_config)?;
    Ok((reader, writer))
}

/// Run only the hello exchange and hang up. Used by discovery.
pub fn probe(stream: IpcStream, config: &HelloConfig) -> Result<HelloResult> {
    let (mut reader, mut writer) = framed(stream, config)?;
    let hello = hello_host(&mut reader, &mut writer, config)?;
    let _ = writer.get_ref().shutdown();
    Ok(hello)
}

/// Attach to a device without booting it.
///
/// Used for devices that already run firmware (bootloader or booted
/// application).
pub fn attach(stream: IpcStream, config: &LinkConfig) -> Result<(LinkConnection, HelloResult)> {
    let (mut reader, mut writer) = framed(stream, &config.hello)?;
    let hello = hello_host(&mut reader, &mut writer, &config.hello)?;

    writer.send(CONTROL, &ControlMessage::attach().to_bytes()?)?;
    debug!(device_id = %hello.device_id, state = %hello.state, "attached");

    let link = LinkConnection::from_parts(reader, writer, LinkRole::Host)?;
    Ok((link, hello))
}

/// Upload `image` to an unbooted device and start it.
///
/// On success the returned [`HelloResult`] carries the state the device
/// reported after booting.
pub fn boot(
    stream: IpcStream,
    kind: ImageKind,
    image: &[u8],
    config: &LinkConfig,
) -> Result<(LinkConnection, HelloResult)> {
    let (mut reader, mut writer) = framed(stream, &config.hello)?;
    let mut hello = hello_host(&mut reader, &mut writer, &config.hello)?;
    if hello.state != BootState::Unbooted {
        return Err(LinkError::UnexpectedState {
            expected: BootState::Unbooted,
            actual: hello.state,
        });
    }

    writer.set_max_payload_size(DEFAULT_MAX_PAYLOAD);
    writer.send(
        CONTROL,
        &ControlMessage::boot(kind, image.len())?.to_bytes()?,
    )?;
    for chunk in image.chunks(config.boot_chunk_size.max(1)) {
        writer.send(BOOT, chunk)?;
    }
    info!(device_id = %hello.device_id, ?kind, size = image.len(), "boot image sent");

    let reply_config = HelloConfig {
        timeout: config.boot_timeout,
        ..config.hello.clone()
    };
    let started = Instant::now();
    let payload = recv_control_payload(&mut reader, &reply_config)?;
    let reply = ControlMessage::from_bytes(&payload)?;
    match reply.msg_type.as_str() {
        CONTROL_BOOT_ACK => {
            let ack: BootAck = reply.payload_as()?;
            debug!(state = %ack.state, elapsed_ms = started.elapsed().as_millis() as u64, "boot acknowledged");
            hello.state = ack.state;
        }
        CONTROL_BOOT_NACK => {
            let nack: BootNack = reply.payload_as()?;
            return Err(LinkError::BootRejected(nack.reason));
        }
        other => {
            return Err(LinkError::Protocol(format!(
                "expected boot reply, got '{other}'"
            )));
        }
    }

    let link = LinkConnection::from_parts(reader, writer, LinkRole::Host)?;
    Ok((link, hello))
}
