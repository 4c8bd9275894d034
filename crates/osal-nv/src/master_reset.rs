//! The master-reset convenience item: one ordinary client of the store,
//! carrying no flash-layout knowledge of its own.

use embedded_storage::nor_flash::NorFlash;
use log::debug;

use crate::cache::SearchMode;
use crate::codec::Checksum;
use crate::error::NvError;
use crate::item::NvId;
use crate::store::{find, item_init_impl, rewrite_item, Engine};

/// Well-known Id of the master-reset flag item.
pub const NVID_MASTER_RESET: u16 = 0x0F00;

const MAGIC: u16 = 0xDEAF;

/// Runs at mount: if the flag item holds the magic value, clears it and
/// latches `master_reset_pending` so this boot session's `item_init` calls
/// rewrite existing Ids instead of leaving them untouched.
pub(crate) fn check_pending<F: NorFlash, C: Checksum>(
    engine: &mut Engine<F, C>,
    word_size: u8,
) -> Result<(), NvError<F::Error>> {
    let id = NvId::new(NVID_MASTER_RESET).expect("reserved id is within range");
    if let Some((page, off)) = find(engine, id, SearchMode::Current).map_err(NvError::Flash)? {
        let mut raw = [0u8; 2];
        engine.codec.read_payload(page, off, 0, &mut raw).map_err(NvError::Flash)?;
        if u16::from_le_bytes(raw) == MAGIC {
            debug!("master reset key set, latching pending reset for this boot");
            engine.master_reset_pending = true;
            rewrite_item(engine, word_size, id, page, off, 2, 0, &0u16.to_le_bytes(), true)?;
        }
    }
    Ok(())
}

/// Schedules a factory reset for the next boot by writing the magic value
/// to the flag item (creating it first if it has never been written).
pub(crate) fn schedule<F: NorFlash, C: Checksum>(
    engine: &mut Engine<F, C>,
    word_size: u8,
) -> Result<(), NvError<F::Error>> {
    let id = NvId::new(NVID_MASTER_RESET).expect("reserved id is within range");
    match find(engine, id, SearchMode::Current).map_err(NvError::Flash)? {
        Some((page, off)) => rewrite_item(engine, word_size, id, page, off, 2, 0, &MAGIC.to_le_bytes(), true),
        None => item_init_impl(engine, word_size, id, 2, Some(&MAGIC.to_le_bytes())).map(|_| ()),
    }
}
