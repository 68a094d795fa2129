//! A/B partition geometry.
//!
//! The layout is fixed at provisioning time: two equally sized bootable
//! regions followed by an unpartitioned reserved tail. This module only does
//! arithmetic on that layout, it never touches flash.

use core::fmt;

/// Smallest erasable unit of the flash chip.
pub const SECTOR_SIZE: u32 = 4096;

/// Upper bound on sectors per partition (2 MiB), sizes the erase bitmap.
pub const MAX_PARTITION_SECTORS: usize = 512;

/// One of the two bootable image slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    A,
    B,
}

impl Partition {
    /// The complementary slot, the only valid update target while `self` runs.
    pub const fn other(self) -> Self {
        match self {
            Partition::A => Partition::B,
            Partition::B => Partition::A,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Partition::A => "A",
            Partition::B => "B",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("partition offset is not sector aligned")]
    UnalignedOffset,
    #[error("partition size is not a whole number of sectors")]
    UnalignedSize,
    #[error("partition size exceeds the erase bitmap")]
    TooLarge,
    #[error("partitions overlap")]
    Overlap,
}

/// Static description of the two bootable regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionTable {
    offset_a: u32,
    offset_b: u32,
    max_image_size: u32,
    xip_base: u32,
}

impl PartitionTable {
    /// Describe a layout, rejecting anything but two sector aligned,
    /// non-overlapping, equally sized slots.
    pub const fn new(
        offset_a: u32,
        offset_b: u32,
        max_image_size: u32,
        xip_base: u32,
    ) -> Result<Self, LayoutError> {
        if offset_a % SECTOR_SIZE != 0 || offset_b % SECTOR_SIZE != 0 {
            return Err(LayoutError::UnalignedOffset);
        }
        if max_image_size == 0 || max_image_size % SECTOR_SIZE != 0 {
            return Err(LayoutError::UnalignedSize);
        }
        if (max_image_size / SECTOR_SIZE) as usize > MAX_PARTITION_SECTORS {
            return Err(LayoutError::TooLarge);
        }
        let (low, high) = if offset_a < offset_b {
            (offset_a, offset_b)
        } else {
            (offset_b, offset_a)
        };
        if high - low < max_image_size {
            return Err(LayoutError::Overlap);
        }
        Ok(Self {
            offset_a,
            offset_b,
            max_image_size,
            xip_base,
        })
    }

    /// Raw flash offset of a slot, relative to the start of flash.
    pub const fn offset_of(&self, partition: Partition) -> u32 {
        match partition {
            Partition::A => self.offset_a,
            Partition::B => self.offset_b,
        }
    }

    /// Address of the slot inside the memory mapped flash window.
    pub const fn xip_address_of(&self, partition: Partition) -> u32 {
        self.xip_base + self.offset_of(partition)
    }

    pub const fn max_image_size(&self) -> u32 {
        self.max_image_size
    }

    pub const fn sector_count(&self) -> u32 {
        self.max_image_size / SECTOR_SIZE
    }

    /// Index of the sector holding byte `image_offset` of an image.
    pub const fn sector_index(image_offset: u32) -> u32 {
        image_offset / SECTOR_SIZE
    }

    /// Raw flash offset of sector `index` inside `partition`.
    pub const fn sector_offset(&self, partition: Partition, index: u32) -> u32 {
        self.offset_of(partition) + index * SECTOR_SIZE
    }

    /// Which slot, if any, contains the raw flash offset.
    pub const fn partition_at(&self, flash_offset: u32) -> Option<Partition> {
        if flash_offset >= self.offset_a && flash_offset - self.offset_a < self.max_image_size {
            Some(Partition::A)
        } else if flash_offset >= self.offset_b
            && flash_offset - self.offset_b < self.max_image_size
        {
            Some(Partition::B)
        } else {
            None
        }
    }
}
