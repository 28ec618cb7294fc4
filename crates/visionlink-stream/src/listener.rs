use std::path::Path;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::debug;
use visionlink_frame::{FrameConfig, FrameReader, FrameWriter, BOOT, DEFAULT_MAX_PAYLOAD};
use visionlink_transport::{IpcStream, UnixDomainSocket};

use crate::connection::{LinkConnection, LinkRole};
use crate::control::{BootRequest, ControlMessage, ImageKind, CONTROL_ATTACH, CONTROL_BOOT};
use crate::device_info::BootState;
use crate::error::{LinkError, Result};
use crate::handshake::{
    hello_device, recv_control_payload, recv_setup_frame, send_control_json, HelloConfig,
    HelloRequest,
};

/// Device end of the link: a socket that hosts connect to.
pub struct DeviceListener {
    socket: UnixDomainSocket,
    hello_config: HelloConfig,
}

impl DeviceListener {
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            socket: UnixDomainSocket::bind(path)?,
            hello_config: HelloConfig::default(),
        })
    }

    pub fn with_hello_config(mut self, config: HelloConfig) -> Self {
        self.hello_config = config;
        self
    }

    pub fn path(&self) -> &Path {
        self.socket.path()
    }

    /// Wait up to `timeout` for a host to connect.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<Option<IpcStream>> {
        Ok(self.socket.accept_timeout(timeout)?)
    }

    /// Answer the hello on a freshly accepted stream.
    pub fn greet(&self, stream: IpcStream, device_id: &str, state: BootState) -> Result<PendingHost> {
        PendingHost::greet(stream, device_id, state, &self.hello_config)
    }
}

/// How the host chose to start the link after hello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStart {
    Attach,
    Boot { kind: ImageKind, image: Bytes },
}

/// A host that has completed hello but not yet started the link.
pub struct PendingHost {
    reader: FrameReader<IpcStream>,
    writer: FrameWriter<IpcStream>,
    request: HelloRequest,
    config: HelloConfig,
}

impl PendingHost {
    pub fn greet(
        stream: IpcStream,
        device_id: &str,
        state: BootState,
        config: &HelloConfig,
    ) -> Result<Self> {
        let reader_stream = stream.try_clone()?;
        let frame_config = FrameConfig {
            max_payload_size: config.max_hello_payload,
            read_timeout: Some(config.timeout),
            write_timeout: Some(config.timeout),
        };
        let mut reader = FrameReader::with_config_ipc(reader_stream, frame_config.clone())?;
        let mut writer = FrameWriter::with_config_ipc(stream, frame_config)?;
        let request = hello_device(&mut reader, &mut writer, device_id, state, config)?;
        Ok(Self {
            reader,
            writer,
            request,
            config: config.clone(),
        })
    }

    pub fn request(&self) -> &HelloRequest {
        &self.request
    }

    /// Read the host's link-start message, collecting the image for a boot.
    ///
    /// A host that only probed hangs up here, which surfaces as
    /// [`LinkError::Disconnected`].
    pub fn read_start(&mut self) -> Result<LinkStart> {
        let payload = recv_control_payload(&mut self.reader, &self.config)?;
        let msg = ControlMessage::from_bytes(&payload)?;
        match msg.msg_type.as_str() {
            CONTROL_ATTACH => Ok(LinkStart::Attach),
            CONTROL_BOOT => {
                let req: BootRequest = msg.payload_as()?;
                let image = self.read_image(req.size)?;
                debug!(kind = ?req.image, size = req.size, "boot image received");
                Ok(LinkStart::Boot {
                    kind: req.image,
                    image,
                })
            }
            other => Err(LinkError::Protocol(format!(
                "expected attach or boot, got '{other}'"
            ))),
        }
    }

    fn read_image(&mut self, size: usize) -> Result<Bytes> {
        self.reader.set_max_payload_size(DEFAULT_MAX_PAYLOAD);
        let deadline = Instant::now() + self.config.timeout;
        let mut image = BytesMut::with_capacity(size);
        while image.len() < size {
            let frame = recv_setup_frame(&mut self.reader, deadline, self.config.timeout)?;
            if frame.stream != BOOT {
                return Err(LinkError::Protocol(format!(
                    "expected BOOT frame, got stream {}",
                    frame.stream
                )));
            }
            image.extend_from_slice(&frame.payload);
        }
        if image.len() != size {
            return Err(LinkError::Protocol(format!(
                "boot image overran announced size: {} > {size}",
                image.len()
            )));
        }
        Ok(image.freeze())
    }

    pub fn ack_boot(&mut self, state: BootState) -> Result<()> {
        send_control_json(&mut self.writer, &ControlMessage::boot_ack(state)?)
    }

    pub fn nack_boot(&mut self, reason: &str) -> Result<()> {
        send_control_json(&mut self.writer, &ControlMessage::boot_nack(reason)?)
    }

    /// Hand the stream over to a device-role [`LinkConnection`].
    pub fn into_link(self) -> Result<LinkConnection> {
        LinkConnection::from_parts(self.reader, self.writer, LinkRole::Device)
    }
}
