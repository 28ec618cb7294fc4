//! Firmware image header.
//!
//! Images start with a 4-byte magic naming what they contain and a 16-byte
//! NUL-padded version string; the firmware body follows.

use crate::error::{ProtocolError, Result};
use crate::version::Version;

pub const APPLICATION_MAGIC: [u8; 4] = *b"VLFW";
pub const BOOTLOADER_MAGIC: [u8; 4] = *b"VLBL";
pub const HEADER_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareKind {
    Application,
    Bootloader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareHeader {
    pub kind: FirmwareKind,
    pub version: Version,
}

impl FirmwareHeader {
    pub fn parse(image: &[u8]) -> Result<Self> {
        if image.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated {
                what: "firmware header",
                expected: HEADER_LEN,
                actual: image.len(),
            });
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&image[..4]);
        let kind = match magic {
            APPLICATION_MAGIC => FirmwareKind::Application,
            BOOTLOADER_MAGIC => FirmwareKind::Bootloader,
            other => return Err(ProtocolError::UnknownImage(other)),
        };
        let field = &image[4..HEADER_LEN];
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        let version = String::from_utf8_lossy(&field[..end]).parse()?;
        Ok(Self { kind, version })
    }

    /// Header followed by `body`.
    pub fn build_image(&self, body: &[u8]) -> Vec<u8> {
        let mut image = Vec::with_capacity(HEADER_LEN + body.len());
        image.extend_from_slice(match self.kind {
            FirmwareKind::Application => &APPLICATION_MAGIC,
            FirmwareKind::Bootloader => &BOOTLOADER_MAGIC,
        });
        let mut field = [0u8; HEADER_LEN - 4];
        let text = self.version.to_string();
        let len = text.len().min(field.len());
        field[..len].copy_from_slice(&text.as_bytes()[..len]);
        image.extend_from_slice(&field);
        image.extend_from_slice(body);
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = FirmwareHeader {
            kind: FirmwareKind::Bootloader,
            version: Version::new(0, 0, 15),
        };
        let image = header.build_image(b"body");
        assert_eq!(&image[..4], b"VLBL");
        assert_eq!(image.len(), HEADER_LEN + 4);
        assert_eq!(FirmwareHeader::parse(&image).unwrap(), header);
    }

    #[test]
    fn foreign_image_rejected() {
        assert!(FirmwareHeader::parse(&[0u8; 32]).is_err());
        assert!(FirmwareHeader::parse(b"VLFW").is_err());
    }
}
