use serde::Serialize;
use tracing::debug;

use crate::checksum::djb2;
use crate::error::{PackageError, Result};

/// Fixed header size; section data may start right after it.
pub const HEADER_SIZE: usize = 512;
pub const IDENTIFIER: [u8; 2] = *b"BR";
pub const MAX_SECTIONS: usize = 17;
pub const NAME_LEN: usize = 16;
const SLOT_SIZE: usize = 30;

/// The bootloader jumps into this section.
pub const FLAG_BOOTABLE: u8 = 0x80;
/// Stored checksum is not meaningful and must not be verified.
pub const FLAG_IGNORE_CHECKSUM: u8 = 0x40;

/// One section descriptor from the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SbrSection {
    pub name: String,
    pub size: u32,
    pub offset: u32,
    pub checksum: u32,
    #[serde(rename = "type")]
    pub section_type: u8,
    pub flags: u8,
}

impl SbrSection {
    pub fn bootable(&self) -> bool {
        self.flags & FLAG_BOOTABLE != 0
    }

    pub fn ignores_checksum(&self) -> bool {
        self.flags & FLAG_IGNORE_CHECKSUM != 0
    }

    fn range(&self) -> std::ops::Range<usize> {
        let start = self.offset as usize;
        start..start + self.size as usize
    }

    fn write_slot(&self, slot: &mut [u8]) {
        slot[..self.name.len()].copy_from_slice(self.name.as_bytes());
        slot[16..20].copy_from_slice(&self.size.to_be_bytes());
        slot[20..24].copy_from_slice(&self.offset.to_be_bytes());
        slot[24..28].copy_from_slice(&self.checksum.to_be_bytes());
        slot[28] = self.section_type;
        slot[29] = self.flags;
    }

    fn read_slot(slot: &[u8]) -> Option<Self> {
        if slot.iter().all(|&b| b == 0) {
            return None;
        }
        let be = |at: usize| u32::from_be_bytes([slot[at], slot[at + 1], slot[at + 2], slot[at + 3]]);
        let name_end = slot[..NAME_LEN].iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        Some(Self {
            name: String::from_utf8_lossy(&slot[..name_end]).into_owned(),
            size: be(16),
            offset: be(20),
            checksum: be(24),
            section_type: slot[28],
            flags: slot[29],
        })
    }
}

/// A parsed container borrowing its bytes.
#[derive(Debug, Clone)]
pub struct SbrPackage<'a> {
    sections: Vec<SbrSection>,
    data: &'a [u8],
}

impl<'a> SbrPackage<'a> {
    /// Parse and check the header, section bounds, and checksums.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let package = Self::parse_unverified(data)?;
        package.verify()?;
        Ok(package)
    }

    /// Parse the header and check section bounds, without hashing data.
    pub fn parse_unverified(data: &'a [u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(PackageError::Truncated(data.len(), HEADER_SIZE));
        }
        if data[..2] != IDENTIFIER {
            return Err(PackageError::BadIdentifier([data[0], data[1]]));
        }

        let sections: Vec<SbrSection> = data[2..2 + MAX_SECTIONS * SLOT_SIZE]
            .chunks_exact(SLOT_SIZE)
            .filter_map(SbrSection::read_slot)
            .collect();

        for section in &sections {
            let end = u64::from(section.offset) + u64::from(section.size);
            if end > data.len() as u64 {
                return Err(PackageError::SectionOutOfBounds {
                    name: section.name.clone(),
                    offset: u64::from(section.offset),
                    end,
                    len: data.len(),
                });
            }
        }

        Ok(Self { sections, data })
    }

    /// Check every section's checksum unless it opts out.
    pub fn verify(&self) -> Result<()> {
        for section in &self.sections {
            if section.ignores_checksum() {
                continue;
            }
            let actual = djb2(&self.data[section.range()]);
            if actual != section.checksum {
                return Err(PackageError::ChecksumMismatch {
                    name: section.name.clone(),
                    expected: section.checksum,
                    actual,
                });
            }
        }
        Ok(())
    }

    pub fn sections(&self) -> &[SbrSection] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&SbrSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Bytes of the named section.
    pub fn section_data(&self, name: &str) -> Option<&'a [u8]> {
        let data = self.data;
        self.section(name).map(|s| &data[s.range()])
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

struct PendingSection<'a> {
    name: String,
    data: &'a [u8],
    flags: u8,
    align: usize,
}

/// Assemble an SBR container in memory.
///
/// Sections are laid out in insertion order. The first starts right after
/// the header; each later one starts at the next multiple of its alignment.
#[derive(Default)]
pub struct SbrBuilder<'a> {
    sections: Vec<PendingSection<'a>>,
}

impl<'a> SbrBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(mut self, name: &str, data: &'a [u8], flags: u8, align: usize) -> Self {
        self.sections.push(PendingSection {
            name: name.to_string(),
            data,
            flags,
            align: align.max(1),
        });
        self
    }

    pub fn build(self) -> Result<Vec<u8>> {
        if self.sections.len() > MAX_SECTIONS {
            return Err(PackageError::TooManySections(self.sections.len()));
        }

        let mut placed = Vec::with_capacity(self.sections.len());
        let mut cursor = HEADER_SIZE;
        for (index, pending) in self.sections.iter().enumerate() {
            if pending.name.is_empty() || pending.name.len() > NAME_LEN {
                return Err(PackageError::InvalidName(pending.name.clone()));
            }
            let offset = if index == 0 {
                cursor
            } else {
                cursor.div_ceil(pending.align) * pending.align
            };
            let end = offset
                .checked_add(pending.data.len())
                .ok_or(PackageError::TooLarge)?;
            placed.push(SbrSection {
                name: pending.name.clone(),
                size: u32::try_from(pending.data.len()).map_err(|_| PackageError::TooLarge)?,
                offset: u32::try_from(offset).map_err(|_| PackageError::TooLarge)?,
                checksum: djb2(pending.data),
                section_type: 0,
                flags: pending.flags,
            });
            cursor = end;
        }
        u32::try_from(cursor).map_err(|_| PackageError::TooLarge)?;

        let mut out = vec![0u8; cursor];
        out[..2].copy_from_slice(&IDENTIFIER);
        for (index, (section, pending)) in placed.iter().zip(&self.sections).enumerate() {
            let slot_start = 2 + index * SLOT_SIZE;
            section.write_slot(&mut out[slot_start..slot_start + SLOT_SIZE]);
            out[section.range()].copy_from_slice(pending.data);
            debug!(
                section = %section.name,
                offset = section.offset,
                size = section.size,
                checksum = format_args!("{:#010x}", section.checksum),
                "sbr section placed"
            );
        }
        Ok(out)
    }
}
