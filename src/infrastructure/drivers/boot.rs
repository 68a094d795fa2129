use bindicator_core::{
    BootController, Partition, PartitionTable,
    boot::{ConfirmError, RebootError},
};
use embassy_time::{Duration, Timer};
use esp_bootloader_esp_idf::{
    ota::{Ota, OtaImageState},
    partitions::{
        AppPartitionSubType, DataPartitionSubType, PARTITION_TABLE_MAX_LEN, PartitionType,
        read_partition_table,
    },
};
use esp_storage::FlashStorage;

use super::flash::with_flash;

const OTA_SLOTS: usize = 2;

fn app_subtype(partition: Partition) -> AppPartitionSubType {
    match partition {
        Partition::A => AppPartitionSubType::Ota0,
        Partition::B => AppPartitionSubType::Ota1,
    }
}

/// Boot selection through the bootloader's `otadata` partition.
#[derive(Debug, Default, Clone, Copy)]
pub struct EspBootController;

impl EspBootController {
    /// Run `f` against the otadata of the flashed partition table.
    /// `None` when the flash, the table or otadata cannot be read.
    fn with_ota<R>(f: impl FnOnce(&mut Ota<'_, FlashStorage<'static>>) -> R) -> Option<R> {
        with_flash(|flash| {
            let mut part_buffer = [0u8; PARTITION_TABLE_MAX_LEN];
            let pt = read_partition_table(flash, &mut part_buffer).ok()?;
            let ota_part = pt
                .find_partition(PartitionType::Data(DataPartitionSubType::Ota))
                .ok()??;
            let mut ota_part = ota_part.as_embedded_storage(flash);
            let mut ota = Ota::new(&mut ota_part, OTA_SLOTS).ok()?;
            Some(f(&mut ota))
        })
        .flatten()
    }
}

impl BootController for EspBootController {
    fn running_partition(&mut self) -> Option<Partition> {
        match Self::with_ota(|ota| ota.current_app_partition().ok())?? {
            AppPartitionSubType::Ota0 => Some(Partition::A),
            AppPartitionSubType::Ota1 => Some(Partition::B),
            _ => None,
        }
    }

    fn confirm_partition(&mut self) -> Result<(), ConfirmError> {
        Self::with_ota(|ota| match ota.current_ota_state() {
            Ok(OtaImageState::New | OtaImageState::PendingVerify) => ota
                .set_current_ota_state(OtaImageState::Valid)
                .map_err(|_| ConfirmError::MarkValid),
            // Factory images and images confirmed on an earlier boot.
            _ => Ok(()),
        })
        .ok_or(ConfirmError::StateUnavailable)?
    }

    async fn reboot_to_partition(&mut self, partition: Partition, delay: Duration) -> RebootError {
        let selected = Self::with_ota(|ota| {
            ota.set_current_app_partition(app_subtype(partition))?;
            ota.set_current_ota_state(OtaImageState::New)
        });
        match selected {
            None => return RebootError::StateUnavailable,
            Some(Err(e)) => {
                log::error!("boot: select failed partition={} err={:?}", partition, e);
                return RebootError::SelectPartition;
            }
            Some(Ok(())) => {}
        }
        log::info!("boot: rebooting into partition={} in {}ms", partition, delay.as_millis());
        Timer::after(delay).await;
        esp_hal::system::software_reset()
    }
}

#[derive(Debug)]
pub enum LayoutCheckError {
    TableUnreadable,
    Missing(Partition),
    Mismatch {
        partition: Partition,
        offset: u32,
        len: u32,
    },
}

/// Compare the flashed partition table with the compiled slot geometry.
pub fn check_partition_layout(table: &PartitionTable) -> Result<(), LayoutCheckError> {
    with_flash(|flash| {
        let mut part_buffer = [0u8; PARTITION_TABLE_MAX_LEN];
        let pt = read_partition_table(flash, &mut part_buffer)
            .map_err(|_| LayoutCheckError::TableUnreadable)?;
        for partition in [Partition::A, Partition::B] {
            let entry = pt
                .find_partition(PartitionType::App(app_subtype(partition)))
                .map_err(|_| LayoutCheckError::TableUnreadable)?
                .ok_or(LayoutCheckError::Missing(partition))?;
            let (offset, len) = (entry.offset(), entry.len());
            if offset != table.offset_of(partition) || len < table.max_image_size() {
                return Err(LayoutCheckError::Mismatch {
                    partition,
                    offset,
                    len,
                });
            }
            log::debug!(
                "boot: partition={} offset={:#x} len={:#x}",
                partition,
                offset,
                len
            );
        }
        Ok(())
    })
    .ok_or(LayoutCheckError::TableUnreadable)?
}
