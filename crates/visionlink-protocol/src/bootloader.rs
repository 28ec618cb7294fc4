//! Bootloader command protocol.
//!
//! Every packet starts with a little-endian `u32` command word followed by
//! fixed-size little-endian fields. Requests and responses have separate
//! command spaces.

use crate::error::{ProtocolError, Result};
use crate::version::Version;

/// Keepalive written to the bootloader watchdog stream.
pub const WATCHDOG_KEEPALIVE: [u8; 4] = [0, 0, 0, 0];
/// Written once on teardown to make the bootloader reset.
pub const WATCHDOG_RESET: [u8; 4] = [1, 0, 0, 0];

/// Length of the NUL-padded error text in [`Response::FlashComplete`].
pub const ERROR_MSG_LEN: usize = 64;

pub mod command {
    pub const UPDATE_FLASH: u32 = 0;
    pub const BOOT_APPLICATION: u32 = 1;
    pub const GET_BOOTLOADER_VERSION: u32 = 2;
}

pub mod response {
    pub const FLASH_COMPLETE: u32 = 0;
    pub const FLASH_STATUS_UPDATE: u32 = 1;
    pub const BOOTLOADER_VERSION: u32 = 2;
}

/// Flash region an update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Application package.
    Sbr = 0,
    Bootloader = 1,
}

impl Storage {
    fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Sbr),
            1 => Ok(Self::Bootloader),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    UpdateFlash {
        storage: Storage,
        total_size: u32,
        num_packets: u32,
    },
    BootApplication,
    GetBootloaderVersion,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    FlashComplete { success: bool, error_msg: String },
    /// Progress in `0.0..=1.0`.
    FlashStatusUpdate { progress: f32 },
    BootloaderVersion(Version),
}

impl Request {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        match self {
            Self::UpdateFlash {
                storage,
                total_size,
                num_packets,
            } => {
                put_u32(&mut out, command::UPDATE_FLASH);
                put_u32(&mut out, *storage as u32);
                put_u32(&mut out, *total_size);
                put_u32(&mut out, *num_packets);
            }
            Self::BootApplication => put_u32(&mut out, command::BOOT_APPLICATION),
            Self::GetBootloaderVersion => put_u32(&mut out, command::GET_BOOTLOADER_VERSION),
        }
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        match get_u32(bytes, 0, "request command")? {
            command::UPDATE_FLASH => {
                need(bytes, 16, "update flash request")?;
                Ok(Self::UpdateFlash {
                    storage: Storage::from_u32(get_u32(bytes, 4, "storage")?)?,
                    total_size: get_u32(bytes, 8, "total size")?,
                    num_packets: get_u32(bytes, 12, "packet count")?,
                })
            }
            command::BOOT_APPLICATION => Ok(Self::BootApplication),
            command::GET_BOOTLOADER_VERSION => Ok(Self::GetBootloaderVersion),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

impl Response {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + ERROR_MSG_LEN);
        match self {
            Self::FlashComplete { success, error_msg } => {
                put_u32(&mut out, response::FLASH_COMPLETE);
                put_u32(&mut out, u32::from(*success));
                let mut text = [0u8; ERROR_MSG_LEN];
                // Keep a terminating NUL.
                let len = error_msg.len().min(ERROR_MSG_LEN - 1);
                text[..len].copy_from_slice(&error_msg.as_bytes()[..len]);
                out.extend_from_slice(&text);
            }
            Self::FlashStatusUpdate { progress } => {
                put_u32(&mut out, response::FLASH_STATUS_UPDATE);
                out.extend_from_slice(&progress.to_le_bytes());
            }
            Self::BootloaderVersion(version) => {
                put_u32(&mut out, response::BOOTLOADER_VERSION);
                put_u32(&mut out, version.major);
                put_u32(&mut out, version.minor);
                put_u32(&mut out, version.patch);
            }
        }
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        match get_u32(bytes, 0, "response command")? {
            response::FLASH_COMPLETE => {
                need(bytes, 8 + ERROR_MSG_LEN, "flash complete response")?;
                let text = &bytes[8..8 + ERROR_MSG_LEN];
                let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
                Ok(Self::FlashComplete {
                    success: get_u32(bytes, 4, "success")? != 0,
                    error_msg: String::from_utf8_lossy(&text[..end]).into_owned(),
                })
            }
            response::FLASH_STATUS_UPDATE => {
                need(bytes, 8, "flash status response")?;
                Ok(Self::FlashStatusUpdate {
                    progress: f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
                })
            }
            response::BOOTLOADER_VERSION => {
                need(bytes, 16, "bootloader version response")?;
                Ok(Self::BootloaderVersion(Version::new(
                    get_u32(bytes, 4, "major")?,
                    get_u32(bytes, 8, "minor")?,
                    get_u32(bytes, 12, "patch")?,
                )))
            }
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn need(bytes: &[u8], expected: usize, what: &'static str) -> Result<()> {
    if bytes.len() < expected {
        return Err(ProtocolError::Truncated {
            what,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn get_u32(bytes: &[u8], at: usize, what: &'static str) -> Result<u32> {
    need(bytes, at + 4, what)?;
    Ok(u32::from_le_bytes([
        bytes[at],
        bytes[at + 1],
        bytes[at + 2],
        bytes[at + 3],
    ]))
}
