//! SBR ("simple binary resource") containers.
//!
//! An SBR file is a 512-byte header describing up to 17 sections, followed
//! by the section bytes. Each section carries its own checksum so a flasher
//! can verify it independently.
//!
//! [`ApplicationPackage`] builds the four-section layout the bootloader
//! expects for a flashable application.

pub mod application;
pub mod checksum;
pub mod error;
pub mod sbr;

pub use application::{
    ApplicationPackage, ASSETS_SECTION, ASSET_STORAGE_SECTION, FIRMWARE_SECTION, PIPELINE_SECTION,
    SECTION_ALIGNMENT,
};
pub use checksum::djb2;
pub use error::{PackageError, Result};
pub use sbr::{
    SbrBuilder, SbrPackage, SbrSection, FLAG_BOOTABLE, FLAG_IGNORE_CHECKSUM, HEADER_SIZE,
};
