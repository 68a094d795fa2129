use core::cell::RefCell;

use bindicator_core::{FlashController, flash::FlashError, partition::SECTOR_SIZE};
use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};
use embedded_storage::nor_flash::NorFlash;
use esp_hal::peripherals;
use esp_storage::FlashStorage;

use crate::infrastructure::config;

/// Program granularity of the SPI flash driver.
const WORD: usize = 4;

/// Global flash storage, shared by the image writer and the otadata access.
///
/// This is initialized once via [`init_flash_storage`].
static FLASH_STORAGE: Mutex<CriticalSectionRawMutex, RefCell<Option<FlashStorage<'static>>>> =
    Mutex::new(RefCell::new(None));

/// Initialize the flash storage.
///
/// This function MUST be called before any other flash storage operations.
pub fn init_flash_storage(raw_flash: peripherals::FLASH<'static>) {
    FLASH_STORAGE.lock(|cell| {
        cell.replace(Some(FlashStorage::new(raw_flash)));
    });
}

/// Run `f` with exclusive access to the flash. `None` before initialisation.
pub(crate) fn with_flash<R>(f: impl FnOnce(&mut FlashStorage<'static>) -> R) -> Option<R> {
    FLASH_STORAGE.lock(|cell| cell.borrow_mut().as_mut().map(f))
}

/// Raw sector erase and byte programming on the SPI flash, limited to the
/// two application slots.
#[derive(Debug, Default, Clone, Copy)]
pub struct EspFlashController;

impl FlashController for EspFlashController {
    fn erase_sector(&mut self, offset: u32) -> Result<(), FlashError> {
        if offset % SECTOR_SIZE != 0 {
            return Err(FlashError::Unaligned);
        }
        check_slot_range(offset, SECTOR_SIZE)?;
        with_flash(|flash| flash.erase(offset, offset + SECTOR_SIZE))
            .ok_or(FlashError::Erase)?
            .map_err(|e| {
                log::error!("flash: erase failed offset={:#x} err={:?}", offset, e);
                FlashError::Erase
            })
    }

    fn write_bytes(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        let len = u32::try_from(data.len()).map_err(|_| FlashError::OutOfRange)?;
        check_slot_range(offset, len)?;
        with_flash(|flash| write_unaligned(flash, offset, data))
            .ok_or(FlashError::Write)?
            .map_err(|e| {
                log::error!(
                    "flash: write failed offset={:#x} len={} err={:?}",
                    offset,
                    data.len(),
                    e
                );
                FlashError::Write
            })
    }
}

/// Refuse ranges that leave a single application slot, so the bootloader,
/// partition table and otadata can never be hit through this driver.
fn check_slot_range(offset: u32, len: u32) -> Result<(), FlashError> {
    if len == 0 {
        return Ok(());
    }
    let last = offset.checked_add(len - 1).ok_or(FlashError::OutOfRange)?;
    let slot = config::PARTITIONS.partition_at(offset);
    if slot.is_none() || slot != config::PARTITIONS.partition_at(last) {
        log::error!("flash: refusing range offset={:#x} len={}", offset, len);
        return Err(FlashError::OutOfRange);
    }
    Ok(())
}

/// Program `data` at an arbitrary offset.
///
/// Partial words at either end are padded with `0xFF`, which leaves the
/// neighbouring bytes of an erased or already programmed word untouched.
fn write_unaligned<F: NorFlash>(flash: &mut F, offset: u32, data: &[u8]) -> Result<(), F::Error> {
    let mut offset = offset;
    let mut rest = data;

    let head = offset as usize % WORD;
    if head != 0 && !rest.is_empty() {
        let take = (WORD - head).min(rest.len());
        let mut word = [0xFF; WORD];
        word[head..head + take].copy_from_slice(&rest[..take]);
        flash.write(offset - head as u32, &word)?;
        offset += take as u32;
        rest = &rest[take..];
    }

    let aligned_len = rest.len() & !(WORD - 1);
    if aligned_len > 0 {
        flash.write(offset, &rest[..aligned_len])?;
        offset += aligned_len as u32;
        rest = &rest[aligned_len..];
    }

    if !rest.is_empty() {
        let mut word = [0xFF; WORD];
        word[..rest.len()].copy_from_slice(rest);
        flash.write(offset, &word)?;
    }
    Ok(())
}
