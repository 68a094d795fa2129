use std::{fmt, path::Path};

use anyhow::{Context, Result};
use bindicator_core::protocol::{Digest, MAX_CHUNK_SIZE};
use sha2::{Digest as _, Sha256};

/// Slot size of the stock `partitions.csv`.
pub(crate) const PARTITION_SIZE: usize = 0x1F_0000;

/// First byte of an ESP application image header.
const ESP_IMAGE_MAGIC: u8 = 0xE9;

pub(crate) struct ImageSummary {
    pub(crate) data: Vec<u8>,
    pub(crate) digest: Digest,
}

impl ImageSummary {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        Ok(Self::new(data))
    }

    pub(crate) fn new(data: Vec<u8>) -> Self {
        let digest = Sha256::digest(&data).into();
        Self { data, digest }
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn chunk_count(&self) -> usize {
        self.data.len().div_ceil(MAX_CHUNK_SIZE)
    }

    pub(crate) fn is_esp_image(&self) -> bool {
        self.data.first() == Some(&ESP_IMAGE_MAGIC)
    }

    pub(crate) fn fits(&self, max_size: usize) -> bool {
        !self.data.is_empty() && self.data.len() <= max_size
    }
}

impl fmt::Display for ImageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Size: {} bytes ({} KB)", self.len(), self.len() / 1024)?;
        writeln!(f, "Chunks: {} x {} bytes", self.chunk_count(), MAX_CHUNK_SIZE)?;
        writeln!(f, "SHA256: {}", hex::encode(self.digest))?;
        if self.is_esp_image() {
            writeln!(f, "Format: ESP application image")?;
        } else {
            writeln!(f, "Format: unknown (missing 0xE9 header)")?;
        }
        if self.fits(PARTITION_SIZE) {
            writeln!(
                f,
                "Fits partition: yes ({} bytes free)",
                PARTITION_SIZE - self.len()
            )
        } else {
            writeln!(f, "Fits partition: NO (max {PARTITION_SIZE} bytes)")
        }
    }
}
