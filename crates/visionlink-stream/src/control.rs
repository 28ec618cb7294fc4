use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::device_info::BootState;
use crate::error::{LinkError, Result};

/// CONTROL message type: host announces a named stream.
pub const CONTROL_STREAM_OPEN: &str = "stream_open";
/// CONTROL message type: host is about to send a firmware image.
pub const CONTROL_BOOT: &str = "boot";
/// CONTROL message type: device accepted the image.
pub const CONTROL_BOOT_ACK: &str = "boot_ack";
/// CONTROL message type: device refused the image.
pub const CONTROL_BOOT_NACK: &str = "boot_nack";
/// CONTROL message type: host attaches without booting.
pub const CONTROL_ATTACH: &str = "attach";

/// CONTROL stream message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Which firmware a boot image contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Application,
    Bootloader,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamOpen {
    pub name: String,
    pub id: u16,
    pub max_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootRequest {
    pub image: ImageKind,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootAck {
    pub state: BootState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootNack {
    pub reason: String,
}

impl ControlMessage {
    fn with_payload<T: Serialize>(msg_type: &str, payload: &T) -> Result<Self> {
        Ok(Self {
            msg_type: msg_type.to_string(),
            payload: Some(serde_json::to_value(payload)?),
        })
    }

    pub fn stream_open(name: &str, id: u16, max_size: usize) -> Result<Self> {
        Self::with_payload(
            CONTROL_STREAM_OPEN,
            &StreamOpen {
                name: name.to_string(),
                id,
                max_size,
            },
        )
    }

    pub fn boot(image: ImageKind, size: usize) -> Result<Self> {
        Self::with_payload(CONTROL_BOOT, &BootRequest { image, size })
    }

    pub fn boot_ack(state: BootState) -> Result<Self> {
        Self::with_payload(CONTROL_BOOT_ACK, &BootAck { state })
    }

    pub fn boot_nack(reason: &str) -> Result<Self> {
        Self::with_payload(
            CONTROL_BOOT_NACK,
            &BootNack {
                reason: reason.to_string(),
            },
        )
    }

    pub fn attach() -> Self {
        Self {
            msg_type: CONTROL_ATTACH.to_string(),
            payload: None,
        }
    }

    /// Decode the payload as `T`, failing if it is missing or malformed.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self.payload.clone().ok_or_else(|| {
            LinkError::Protocol(format!("'{}' message without payload", self.msg_type))
        })?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_open_wire_shape() {
        let msg = ControlMessage::stream_open("__rpc_main", 256, 1024).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(json["type"], "stream_open");
        assert_eq!(json["payload"]["name"], "__rpc_main");
        assert_eq!(json["payload"]["id"], 256);

        let parsed: StreamOpen = msg.payload_as().unwrap();
        assert_eq!(parsed.max_size, 1024);
    }

    #[test]
    fn attach_has_no_payload() {
        let msg = ControlMessage::attach();
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(bytes, br#"{"type":"attach"}"#);
        assert!(matches!(
            msg.payload_as::<BootAck>(),
            Err(LinkError::Protocol(_))
        ));
    }

    #[test]
    fn boot_messages_roundtrip_through_bytes() {
        let msg = ControlMessage::boot(ImageKind::Bootloader, 42).unwrap();
        let back = ControlMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(back, msg);
        let req: BootRequest = back.payload_as().unwrap();
        assert_eq!(req.image, ImageKind::Bootloader);

        let nack = ControlMessage::boot_nack("already booted").unwrap();
        assert_eq!(nack.payload_as::<BootNack>().unwrap().reason, "already booted");
    }
}
