//! Raw flash programming for an update target.
//!
//! [`FlashController`] is the hardware seam: two primitives on raw,
//! flash-start-relative offsets. [`ImageWriter`] sits on top of it and
//! streams an image into one partition, erasing each sector lazily the first
//! time a byte lands in it.

use embassy_futures::yield_now;

use crate::partition::{MAX_PARTITION_SECTORS, Partition, PartitionTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FlashError {
    #[error("erase failed")]
    Erase,
    #[error("write failed")]
    Write,
    #[error("offset out of range")]
    OutOfRange,
    #[error("offset not aligned")]
    Unaligned,
}

/// Erase and program primitives of the flash chip.
///
/// Implementations run each call with interrupts masked and leave the
/// instruction cache coherent with flash before returning. `erase_sector`
/// takes a sector aligned offset; `write_bytes` accepts any offset and
/// length, callers guarantee the range was erased beforehand.
pub trait FlashController {
    fn erase_sector(&mut self, offset: u32) -> Result<(), FlashError>;

    fn write_bytes(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError>;
}

impl<T: FlashController + ?Sized> FlashController for &mut T {
    fn erase_sector(&mut self, offset: u32) -> Result<(), FlashError> {
        T::erase_sector(self, offset)
    }

    fn write_bytes(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        T::write_bytes(self, offset, data)
    }
}

const BITMAP_WORDS: usize = MAX_PARTITION_SECTORS.div_ceil(32);

/// One flag per sector of a partition, set once the sector has been erased
/// during the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EraseBitmap {
    words: [u32; BITMAP_WORDS],
}

impl Default for EraseBitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl EraseBitmap {
    pub const fn new() -> Self {
        Self {
            words: [0; BITMAP_WORDS],
        }
    }

    pub fn is_erased(&self, sector: u32) -> bool {
        let sector = sector as usize;
        sector < MAX_PARTITION_SECTORS && self.words[sector / 32] & (1 << (sector % 32)) != 0
    }

    pub fn mark(&mut self, sector: u32) {
        let sector = sector as usize;
        if sector < MAX_PARTITION_SECTORS {
            self.words[sector / 32] |= 1 << (sector % 32);
        }
    }

    pub fn erased_count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    #[error("firmware too large")]
    TooLarge,
    #[error("erase failed")]
    Erase(FlashError),
    #[error("write failed")]
    Write(FlashError),
}

/// Sequential writer for one update session.
///
/// Owns the erase bitmap for the session; a new writer starts with every
/// sector marked dirty.
pub struct ImageWriter<'a, F> {
    flash: &'a mut F,
    table: PartitionTable,
    target: Partition,
    erased: EraseBitmap,
    written: u32,
}

impl<'a, F: FlashController> ImageWriter<'a, F> {
    pub fn new(flash: &'a mut F, table: PartitionTable, target: Partition) -> Self {
        Self {
            flash,
            table,
            target,
            erased: EraseBitmap::new(),
            written: 0,
        }
    }

    /// Bytes programmed so far.
    pub fn written(&self) -> u32 {
        self.written
    }

    pub fn erased(&self) -> &EraseBitmap {
        &self.erased
    }

    /// Whether `len` more bytes still fit the partition.
    pub fn fits(&self, len: u32) -> bool {
        self.written
            .checked_add(len)
            .is_some_and(|end| end <= self.table.max_image_size())
    }

    /// Append `data` to the image.
    ///
    /// Sectors touched by the chunk for the first time are erased before the
    /// program call, yielding to the executor after each erase so the
    /// network stack keeps up.
    pub async fn append(&mut self, data: &[u8]) -> Result<u32, WriteError> {
        let len = u32::try_from(data.len()).map_err(|_| WriteError::TooLarge)?;
        if !self.fits(len) {
            return Err(WriteError::TooLarge);
        }
        if len == 0 {
            return Ok(self.written);
        }

        let first = PartitionTable::sector_index(self.written);
        let last = PartitionTable::sector_index(self.written + len - 1);
        for sector in first..=last {
            if self.erased.is_erased(sector) {
                continue;
            }
            let offset = self.table.sector_offset(self.target, sector);
            log::debug!("ota: erase sector={} offset={:#010x}", sector, offset);
            self.flash
                .erase_sector(offset)
                .map_err(WriteError::Erase)?;
            self.erased.mark(sector);
            yield_now().await;
        }

        let offset = self.table.offset_of(self.target) + self.written;
        self.flash
            .write_bytes(offset, data)
            .map_err(WriteError::Write)?;
        self.written += len;
        Ok(self.written)
    }
}
