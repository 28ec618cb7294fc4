use std::path::Path;

use tracing::info;

use crate::error::{PackageError, Result};
use crate::sbr::{SbrBuilder, FLAG_BOOTABLE};

/// Sections after the first start on a 1 MiB boundary.
pub const SECTION_ALIGNMENT: usize = 1024 * 1024;

pub const FIRMWARE_SECTION: &str = "__firmware";
pub const PIPELINE_SECTION: &str = "pipeline";
pub const ASSETS_SECTION: &str = "assets";
pub const ASSET_STORAGE_SECTION: &str = "asset_storage";

/// The four parts of a flashable application.
#[derive(Debug, Clone, Copy)]
pub struct ApplicationPackage<'a> {
    pub firmware: &'a [u8],
    /// Serialized pipeline schema.
    pub pipeline: &'a [u8],
    /// Serialized asset map.
    pub assets: &'a [u8],
    pub asset_storage: &'a [u8],
}

impl ApplicationPackage<'_> {
    /// Build the SBR container in memory.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        SbrBuilder::new()
            .section(FIRMWARE_SECTION, self.firmware, FLAG_BOOTABLE, SECTION_ALIGNMENT)
            .section(PIPELINE_SECTION, self.pipeline, 0, SECTION_ALIGNMENT)
            .section(ASSETS_SECTION, self.assets, 0, SECTION_ALIGNMENT)
            .section(ASSET_STORAGE_SECTION, self.asset_storage, 0, SECTION_ALIGNMENT)
            .build()
    }

    /// Build the container and write it to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        std::fs::write(path, &bytes).map_err(|source| PackageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), size = bytes.len(), "application package written");
        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::checksum::djb2;
    use crate::sbr::{SbrPackage, HEADER_SIZE};

    #[test]
    fn application_layout() {
        let firmware = vec![0xAB; 3000];
        let package = ApplicationPackage {
            firmware: &firmware,
            pipeline: br#"{"nodes":[]}"#,
            assets: b"{}",
            asset_storage: &[1, 2, 3],
        };
        let bytes = package.to_bytes().unwrap();
        let parsed = SbrPackage::parse(&bytes).unwrap();

        let names: Vec<_> = parsed.sections().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, [FIRMWARE_SECTION, PIPELINE_SECTION, ASSETS_SECTION, ASSET_STORAGE_SECTION]);

        let fw = parsed.section(FIRMWARE_SECTION).unwrap();
        assert!(fw.bootable());
        assert_eq!(fw.offset as usize, HEADER_SIZE);
        assert_eq!(fw.size, 3000);

        let offsets: Vec<u32> = parsed.sections()[1..].iter().map(|s| s.offset).collect();
        assert_eq!(offsets, [1 << 20, 2 << 20, 3 << 20]);
        assert!(!parsed.section(PIPELINE_SECTION).unwrap().bootable());
        assert_eq!(parsed.section_data(ASSET_STORAGE_SECTION).unwrap(), &[1, 2, 3]);
        assert_eq!(bytes.len(), (3 << 20) + 3);
    }

    #[test]
    fn save_writes_file() {
        let path = std::env::temp_dir().join(format!("vl-pkg-{}.sbr", std::process::id()));
        let written = ApplicationPackage {
            firmware: b"fw",
            pipeline: b"p",
            assets: b"a",
            asset_storage: b"",
        }
        .save(&path)
        .unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), written);
        assert!(SbrPackage::parse(&bytes).is_ok());
        let _ = std::fs::remove_file(&path);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn sections_match_what_was_written(
            firmware in proptest::collection::vec(any::<u8>(), 0..4096),
            pipeline in proptest::collection::vec(any::<u8>(), 0..512),
            storage in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let bytes = ApplicationPackage {
                firmware: &firmware,
                pipeline: &pipeline,
                assets: b"{}",
                asset_storage: &storage,
            }
            .to_bytes()
            .unwrap();
            let parsed = SbrPackage::parse(&bytes).unwrap();

            for (name, data) in [
                (FIRMWARE_SECTION, &firmware[..]),
                (PIPELINE_SECTION, &pipeline[..]),
                (ASSET_STORAGE_SECTION, &storage[..]),
            ] {
                let section = parsed.section(name).unwrap();
                prop_assert_eq!(section.size as usize, data.len());
                prop_assert_eq!(section.checksum, djb2(data));
                prop_assert_eq!(parsed.section_data(name).unwrap(), data);
            }
        }
    }
}
