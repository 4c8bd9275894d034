//! Copies live items off a full page onto the reserve, then erases the
//! source — the only way free space is reclaimed.

use embedded_storage::nor_flash::NorFlash;
use log::debug;

use crate::codec::Checksum;
use crate::error::NvError;
use crate::item::{ItemStat, NvId, ITEM_HDR_SIZE};
use crate::page::PAGE_HDR_SIZE;
use crate::store::Engine;

/// Compacts `src`: every live item (current or superseded-but-not-yet-
/// tombstoned) except `skip` is copied onto the reserve page; `src` is then
/// erased and becomes the new reserve.
///
/// `skip`, when given, names an Id the caller is already about to rewrite
/// from an in-memory copy — compaction does not bother preserving its
/// stale on-flash copy, since `src` is erased at the end regardless.
pub(crate) fn compact<F: NorFlash, C: Checksum>(
    engine: &mut Engine<F, C>,
    src: u8,
    skip: Option<NvId>,
) -> Result<(), NvError<F::Error>> {
    debug!("compaction: page {} -> reserve {}", src, engine.table.reserve());

    engine.codec.mark_compacting(src).map_err(NvError::Flash)?;

    let page_size = engine.codec.page_size();
    let word_size = engine.codec.word_size();
    let reserve = engine.table.reserve();

    let mut off = PAGE_HDR_SIZE;
    loop {
        if off + ITEM_HDR_SIZE > page_size {
            break;
        }
        let hdr = engine.codec.read_item_header(src, off).map_err(NvError::Flash)?;
        if hdr.is_erased() {
            break;
        }
        let padded = hdr.padded_len(word_size);
        let item_size = ITEM_HDR_SIZE + padded;
        if off + item_size > page_size {
            break;
        }

        let is_skip = skip.is_some_and(|id| id.get() == hdr.id);
        if !hdr.is_tombstone() && !is_skip {
            if let Err(e) = copy_item(engine, src, off, hdr.id, hdr.len, padded, reserve) {
                debug!("compaction: aborting, item copy failed");
                abort(engine, reserve).map_err(NvError::Flash)?;
                return Err(e);
            }
        }

        off += item_size;
    }

    engine.codec.mark_in_use(reserve).map_err(NvError::Flash)?;
    engine.codec.erase_page(src).map_err(NvError::Flash)?;
    engine.table.set_reserve(src);
    engine.table.reset_page(src);

    Ok(())
}

fn copy_item<F: NorFlash, C: Checksum>(
    engine: &mut Engine<F, C>,
    src: u8,
    src_off: u32,
    id: u16,
    len: u16,
    padded: u32,
    reserve: u8,
) -> Result<(), NvError<F::Error>> {
    let dst_off = engine.table.off(reserve);
    let was_xfer = engine
        .codec
        .read_item_header(src, src_off)
        .map_err(NvError::Flash)?
        .stat()
        == ItemStat::Xfer;

    engine
        .codec
        .write_header_half(reserve, dst_off, id, len)
        .map_err(NvError::Flash)?;
    engine
        .codec
        .xfer_payload(src, src_off, 0, reserve, dst_off, 0, padded)
        .map_err(NvError::Flash)?;

    let payload = engine
        .codec
        .read_padded_payload(reserve, dst_off, len)
        .map_err(NvError::Flash)?;
    let chk = engine.codec.checksum_of(&payload);
    engine
        .codec
        .write_checksum(reserve, dst_off, chk)
        .map_err(NvError::Flash)?;

    if was_xfer {
        engine
            .codec
            .clear_stat_to_xfer(reserve, dst_off)
            .map_err(NvError::Flash)?;
    }

    let readback = engine
        .codec
        .read_item_header(reserve, dst_off)
        .map_err(NvError::Flash)?;
    if readback.chk != chk {
        return Err(NvError::OperFailed);
    }

    let item_size = ITEM_HDR_SIZE + padded;
    engine.table.set_off(reserve, dst_off + item_size);
    if readback.stat() == ItemStat::Current {
        if let Ok(nv_id) = NvId::new(id) {
            engine.cache.update(nv_id, reserve, dst_off);
        }
    }

    Ok(())
}

fn abort<F: NorFlash, C: Checksum>(engine: &mut Engine<F, C>, reserve: u8) -> Result<(), F::Error> {
    engine.codec.erase_page(reserve)?;
    engine.table.reset_page(reserve);
    Ok(())
}
