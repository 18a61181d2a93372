//! Settings records in the last flash page.
//!
//! Fixed-size record slots indexed by the settings key address. A write
//! stages the whole page in RAM, erases, and writes back; the store sees a
//! handful of writes per technician session, so wear is not a concern
//! here. An erased slot (0xFF length marker) reads as absent, which lets
//! the boot-time loader heal first-boot and post-erase states.

use embassy_stm32::flash::{Bank1Region, Blocking};
use node_core::config::persist::{MAX_RECORD_LEN, SettingsStore};

/// One erase page on the G0.
const PAGE_SIZE: usize = 2_048;
/// Byte offset of the settings page inside bank 1 (last 2 KiB of 512 KiB).
const PAGE_OFFSET: u32 = 0x7_F800;
/// Length marker byte plus payload, padded to a flash-friendly stride.
const RECORD_STRIDE: usize = 32;
/// Marker value of an erased slot.
const ERASED: u8 = 0xFF;

/// Errors surfaced by the flash-backed store.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlashStoreError {
    /// Record address falls outside the settings page.
    AddressOutOfRange,
    /// Record exceeds the slot payload size.
    RecordTooLong,
    /// The flash peripheral reported a failure.
    Device,
}

/// Settings store over the bank-1 flash region.
pub struct SettingsFlash<'d> {
    region: Bank1Region<'d, Blocking>,
}

impl<'d> SettingsFlash<'d> {
    /// Wraps the flash region.
    pub fn new(region: Bank1Region<'d, Blocking>) -> Self {
        Self { region }
    }

    fn slot_offset(address: u16) -> Result<u32, FlashStoreError> {
        let offset = u32::from(address) * RECORD_STRIDE as u32;
        if offset + RECORD_STRIDE as u32 > PAGE_SIZE as u32 {
            return Err(FlashStoreError::AddressOutOfRange);
        }
        Ok(PAGE_OFFSET + offset)
    }
}

impl SettingsStore for SettingsFlash<'_> {
    type Error = FlashStoreError;

    fn read_record(&mut self, address: u16, buf: &mut [u8]) -> Result<Option<usize>, Self::Error> {
        let offset = Self::slot_offset(address)?;
        let mut slot = [0u8; RECORD_STRIDE];
        self.region
            .blocking_read(offset, &mut slot)
            .map_err(|_| FlashStoreError::Device)?;

        let len = slot[0];
        if len == ERASED {
            return Ok(None);
        }
        let len = usize::from(len);
        if len > MAX_RECORD_LEN || len > buf.len() {
            // Unreadable record; the loader falls back to defaults.
            return Ok(None);
        }
        buf[..len].copy_from_slice(&slot[1..=len]);
        Ok(Some(len))
    }

    fn write_record(&mut self, address: u16, bytes: &[u8]) -> Result<(), Self::Error> {
        if bytes.len() > MAX_RECORD_LEN {
            return Err(FlashStoreError::RecordTooLong);
        }
        let offset = Self::slot_offset(address)?;

        let mut page = [0u8; PAGE_SIZE];
        self.region
            .blocking_read(PAGE_OFFSET, &mut page)
            .map_err(|_| FlashStoreError::Device)?;

        let slot_start = (offset - PAGE_OFFSET) as usize;
        let slot = &mut page[slot_start..slot_start + RECORD_STRIDE];
        slot.fill(0);
        #[allow(clippy::cast_possible_truncation)]
        {
            slot[0] = bytes.len() as u8;
        }
        slot[1..=bytes.len()].copy_from_slice(bytes);

        #[allow(clippy::cast_possible_truncation)]
        self.region
            .blocking_erase(PAGE_OFFSET, PAGE_OFFSET + PAGE_SIZE as u32)
            .map_err(|_| FlashStoreError::Device)?;
        self.region
            .blocking_write(PAGE_OFFSET, &page)
            .map_err(|_| FlashStoreError::Device)?;
        Ok(())
    }
}
