//! Boot-time recovery: reconstructs per-page bookkeeping and finishes
//! whatever write or compaction a crash interrupted.

use alloc::vec::Vec;

use embedded_storage::nor_flash::NorFlash;
use log::{debug, warn};

use crate::codec::Checksum;
use crate::item::{ItemStat, ITEM_HDR_SIZE};
use crate::page::{PageState, PAGE_HDR_SIZE};
use crate::store::Engine;

/// Runs once, at [`crate::store::NvStore::mount`], before any client call
/// is accepted.
pub(crate) fn recover<F: NorFlash, C: Checksum>(engine: &mut Engine<F, C>) -> Result<(), F::Error> {
    let page_count = engine.table.page_count();

    let mut erased = Vec::new();
    let mut compacting = None;
    for page in 0..page_count {
        match engine.codec.read_page_header(page)?.state() {
            PageState::Erased => erased.push(page),
            PageState::Compacting if compacting.is_none() => compacting = Some(page),
            _ => {}
        }
    }

    let reserve = resolve_reserve(engine, compacting, &erased)?;
    engine.table.set_reserve(reserve);
    engine.table.reset_page(reserve);

    let mut any_xfer = false;
    for page in 0..page_count {
        if page == reserve {
            continue;
        }
        if init_page(engine, page)? {
            any_xfer = true;
        }
    }
    if any_xfer {
        collapse_duplicates(engine)?;
    }

    Ok(())
}

/// Determines the single reserve page, completing any compaction a crash
/// left half finished.
fn resolve_reserve<F: NorFlash, C: Checksum>(
    engine: &mut Engine<F, C>,
    compacting: Option<u8>,
    erased: &[u8],
) -> Result<u8, F::Error> {
    match (compacting, erased.first().copied()) {
        (Some(old_page), Some(reserve_page)) => {
            debug!(
                "recovery: compaction source {} and reserve {} both present, redoing compaction",
                old_page, reserve_page
            );
            engine.codec.erase_page(reserve_page)?;
            engine.table.reset_page(reserve_page);
            engine.table.set_reserve(reserve_page);
            promote_extra_reserves(engine, erased, reserve_page)?;
            if let Err(_e) = crate::compactor::compact(engine, old_page, None) {
                warn!("recovery: redoing interrupted compaction failed, continuing with page states as found");
            }
            Ok(engine.table.reserve())
        }
        (Some(old_page), None) => {
            warn!(
                "recovery: compaction source {} found with no reserve; the reserve was already absorbed",
                old_page
            );
            engine.codec.erase_page(old_page)?;
            Ok(old_page)
        }
        (None, Some(reserve_page)) => {
            engine.codec.erase_page(reserve_page)?;
            promote_extra_reserves(engine, erased, reserve_page)?;
            Ok(reserve_page)
        }
        (None, None) => {
            let fallback = pick_fallback_reserve(engine)?;
            warn!("recovery: no reserve page found; erasing most-lost page {} as fallback", fallback);
            engine.codec.erase_page(fallback)?;
            Ok(fallback)
        }
    }
}

fn promote_extra_reserves<F: NorFlash, C: Checksum>(
    engine: &mut Engine<F, C>,
    erased: &[u8],
    keep: u8,
) -> Result<(), F::Error> {
    for &page in erased {
        if page == keep {
            continue;
        }
        warn!("recovery: extra erased page {} found, promoting into rotation", page);
        engine.codec.promote_active(page)?;
        engine.codec.mark_in_use(page)?;
        engine.table.reset_page(page);
    }
    Ok(())
}

/// Recomputes `off[page]`/`lost[page]` by scanning its items; zeros any
/// item whose checksum fails to validate. Returns whether an `Xfer` item
/// was found on this page, which triggers [`collapse_duplicates`].
fn init_page<F: NorFlash, C: Checksum>(engine: &mut Engine<F, C>, page: u8) -> Result<bool, F::Error> {
    let page_size = engine.codec.page_size();
    let word_size = engine.codec.word_size();
    let mut off = PAGE_HDR_SIZE;
    let mut lost = 0u32;
    let mut saw_xfer = false;

    loop {
        if off + ITEM_HDR_SIZE > page_size {
            break;
        }
        let hdr = engine.codec.read_item_header(page, off)?;
        if hdr.is_erased() {
            break;
        }
        let item_size = ITEM_HDR_SIZE + hdr.padded_len(word_size);
        if off + item_size > page_size {
            lost += page_size - off;
            break;
        }

        if hdr.is_tombstone() {
            lost += item_size;
        } else {
            match hdr.stat() {
                ItemStat::Xfer => saw_xfer = true,
                ItemStat::Current => {
                    let payload = engine.codec.read_padded_payload(page, off, hdr.len)?;
                    if engine.codec.checksum_of(&payload) != hdr.chk {
                        warn!("recovery: checksum mismatch for item at page {} offset {}, tombstoning", page, off);
                        engine.codec.clear_id_to_zero(page, off)?;
                        lost += item_size;
                    }
                }
            }
        }

        off += item_size;
    }

    engine.table.set_off(page, off);
    engine.table.set_lost(page, lost);
    Ok(saw_xfer)
}

/// For every validated `Current` item, zeros any other item sharing its Id
/// with `stat == Xfer` — the duplicate left by an update interrupted after
/// the new copy was verified but before the old copy was tombstoned.
fn collapse_duplicates<F: NorFlash, C: Checksum>(engine: &mut Engine<F, C>) -> Result<(), F::Error> {
    let page_count = engine.table.page_count();
    let reserve = engine.table.reserve();
    let word_size = engine.codec.word_size();
    let page_size = engine.codec.page_size();

    let mut currents = Vec::new();
    for page in 0..page_count {
        if page == reserve {
            continue;
        }
        let mut off = PAGE_HDR_SIZE;
        loop {
            if off + ITEM_HDR_SIZE > page_size {
                break;
            }
            let hdr = engine.codec.read_item_header(page, off)?;
            if hdr.is_erased() {
                break;
            }
            let item_size = ITEM_HDR_SIZE + hdr.padded_len(word_size);
            if off + item_size > page_size {
                break;
            }
            if !hdr.is_tombstone() && hdr.stat() == ItemStat::Current {
                let payload = engine.codec.read_padded_payload(page, off, hdr.len)?;
                if engine.codec.checksum_of(&payload) == hdr.chk {
                    currents.push((page, off, hdr.id));
                }
            }
            off += item_size;
        }
    }

    for (cur_page, cur_off, id) in currents {
        for page in 0..page_count {
            if page == reserve {
                continue;
            }
            let mut off = PAGE_HDR_SIZE;
            loop {
                if off + ITEM_HDR_SIZE > page_size {
                    break;
                }
                let hdr = engine.codec.read_item_header(page, off)?;
                if hdr.is_erased() {
                    break;
                }
                let item_size = ITEM_HDR_SIZE + hdr.padded_len(word_size);
                if off + item_size > page_size {
                    break;
                }
                let is_self = page == cur_page && off == cur_off;
                if !is_self && !hdr.is_tombstone() && hdr.id == id && hdr.stat() == ItemStat::Xfer {
                    debug!("recovery: collapsing duplicate of id {:#06x} at page {} offset {}", id, page, off);
                    engine.codec.clear_id_to_zero(page, off)?;
                    engine.table.add_lost(page, item_size);
                }
                off += item_size;
            }
        }
    }

    Ok(())
}

/// Safety-net fallback when no page is in the `Erased` state: picks the
/// page that looks most reclaimed (all items tombstoned or superseded),
/// erasing it to become the new reserve.
///
/// This is a heuristic, not a correctness proof — it is the same kind of
/// best-effort choice the original recovery made when the reserve's
/// identity could not be determined any other way.
fn pick_fallback_reserve<F: NorFlash, C: Checksum>(engine: &mut Engine<F, C>) -> Result<u8, F::Error> {
    let page_count = engine.table.page_count();
    let page_size = engine.codec.page_size();
    let mut best_page = 0u8;
    let mut best_lost = 0u32;

    for page in 0..page_count {
        let lost = count_reclaimable(engine, page)?;
        if lost == page_size - PAGE_HDR_SIZE {
            return Ok(page);
        }
        if lost >= best_lost {
            best_lost = lost;
            best_page = page;
        }
    }
    Ok(best_page)
}

fn count_reclaimable<F: NorFlash, C: Checksum>(engine: &mut Engine<F, C>, page: u8) -> Result<u32, F::Error> {
    let page_size = engine.codec.page_size();
    let word_size = engine.codec.word_size();
    let mut off = PAGE_HDR_SIZE;
    let mut lost = 0u32;

    loop {
        if off + ITEM_HDR_SIZE > page_size {
            break;
        }
        let hdr = engine.codec.read_item_header(page, off)?;
        if hdr.is_erased() {
            break;
        }
        let item_size = ITEM_HDR_SIZE + hdr.padded_len(word_size);
        if off + item_size > page_size {
            lost += page_size - off;
            break;
        }
        if hdr.is_tombstone() || hdr.stat() == ItemStat::Xfer {
            lost += item_size;
        }
        off += item_size;
    }
    Ok(lost)
}
