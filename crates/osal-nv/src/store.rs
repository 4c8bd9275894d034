//! The public API: mounts a flash region, serializes every call through a
//! single critical section, and integrates the page codec, allocator,
//! compactor, and hot cache.

use alloc::vec::Vec;

use embedded_storage::nor_flash::NorFlash;
use log::debug;

use crate::allocator::PageTable;
use crate::cache::{HotCache, SearchMode};
use crate::codec::{Checksum, PageCodec};
use crate::compactor;
use crate::error::NvError;
use crate::item::{ItemStat, NvId, ITEM_HDR_SIZE};
use crate::master_reset;
use crate::mutex::NvMutex;
use crate::page::PAGE_HDR_SIZE;
use crate::recovery;
use crate::voltage::VoltageMonitor;

/// Geometry and tuning parameters for a store, supplied to
/// [`NvStore::mount`].
pub struct StoreConfig {
    /// Number of logical pages; must be at least 2 (one is always the
    /// reserve).
    pub page_count: u8,
    /// Size in bytes of one logical page, header included.
    pub page_size: u32,
    /// Minimum programmable unit in bytes; must be a power of two, at
    /// least 2.
    pub word_size: u8,
    /// Ids whose location should be cached rather than found by linear
    /// scan.
    pub hot_ids: Vec<NvId>,
}

/// Outcome of [`NvStore::item_init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemInitOutcome {
    /// A new item was created with the supplied (or default) payload.
    Created,
    /// The Id already existed; no action was taken (unless a pending
    /// master reset upgraded this call to a rewrite).
    Existed,
}

/// The mutable engine state guarded by the store's critical section: page
/// codec, per-page bookkeeping, hot cache, and the master-reset latch.
pub(crate) struct Engine<F, C> {
    pub codec: PageCodec<F, C>,
    pub table: PageTable,
    pub cache: HotCache,
    pub master_reset_pending: bool,
}

/// A mounted, power-fail-safe key-value store over one flash region.
pub struct NvStore<F, C, V> {
    engine: NvMutex<Engine<F, C>>,
    voltage: V,
    word_size: u8,
}

impl<F: NorFlash, C: Checksum, V: VoltageMonitor> NvStore<F, C, V> {
    /// Mounts `flash`, running the recovery engine before any item call is
    /// accepted.
    ///
    /// The original firmware's `init()` returned `void`; this returns a
    /// `Result` because a Rust library should surface construction
    /// failure rather than silently continue on a region it could not
    /// make sense of. The only way this fails is a region with no erased
    /// page and no page recoverable as one (see [`crate::recovery`]).
    pub fn mount(flash: F, voltage: V, config: StoreConfig) -> Result<Self, NvError<F::Error>> {
        assert!(config.page_count >= 2, "a store needs at least 2 logical pages");
        assert!(config.word_size >= 2 && config.word_size.is_power_of_two(), "word_size must be a power of two >= 2");
        assert!(config.page_size > PAGE_HDR_SIZE, "page_size must be larger than the page header");
        assert_eq!(
            config.word_size as usize,
            F::WRITE_SIZE,
            "word_size must match the flash device's minimum programmable unit"
        );

        let codec = PageCodec::<F, C>::new(flash, config.page_size, config.word_size);
        let table = PageTable::new(config.page_count, config.page_size, 0);
        let cache = HotCache::new(config.hot_ids.clone());
        let mut engine = Engine {
            codec,
            table,
            cache,
            master_reset_pending: false,
        };

        recovery::recover(&mut engine).map_err(NvError::Flash)?;

        for id in &config.hot_ids {
            if let Some((page, off)) = find(&mut engine, *id, SearchMode::Current).map_err(NvError::Flash)? {
                engine.cache.update(*id, page, off);
            }
        }

        master_reset::check_pending(&mut engine, config.word_size)?;

        debug!("mount complete: reserve page {}", engine.table.reserve());

        Ok(NvStore {
            engine: NvMutex::new(engine),
            voltage,
            word_size: config.word_size,
        })
    }

    /// Creates `id` with `len` bytes if it does not already exist. `buf`,
    /// if `Some`, is the initial payload (must be exactly `len` bytes);
    /// `None` leaves the payload at its erased value (`0xFF`) with the
    /// checksum of a null buffer.
    pub fn item_init(
        &self,
        id: NvId,
        len: u16,
        buf: Option<&[u8]>,
    ) -> Result<ItemInitOutcome, NvError<F::Error>> {
        if buf.is_some_and(|b| b.len() != len as usize) {
            return Err(NvError::BadItemLen);
        }
        if !self.voltage.bus_voltage_ok() {
            return Err(NvError::OperFailed);
        }
        self.engine.with(|engine| item_init_impl(engine, self.word_size, id, len, buf))
    }

    /// Reads `out.len()` bytes starting at byte offset `ndx` of `id`'s
    /// payload.
    pub fn read(&self, id: NvId, ndx: u16, out: &mut [u8]) -> Result<(), NvError<F::Error>> {
        self.engine.with(|engine| {
            let (page, off) = find(engine, id, SearchMode::Current)
                .map_err(NvError::Flash)?
                .ok_or(NvError::OperFailed)?;
            let hdr = engine.codec.read_item_header(page, off).map_err(NvError::Flash)?;
            if ndx as u32 + out.len() as u32 > hdr.len as u32 {
                return Err(NvError::BadItemLen);
            }
            engine
                .codec
                .read_payload(page, off, ndx as u32, out)
                .map_err(NvError::Flash)
        })
    }

    /// Writes `buf` at byte offset `ndx` of `id`'s payload. A no-op if the
    /// bytes already on flash match `buf`.
    pub fn write(&self, id: NvId, ndx: u16, buf: &[u8]) -> Result<(), NvError<F::Error>> {
        if !self.voltage.bus_voltage_ok() {
            return Err(NvError::OperFailed);
        }
        self.engine.with(|engine| write_impl(engine, self.word_size, id, ndx, buf))
    }

    /// The declared length of `id`'s payload, or `0` if `id` does not
    /// exist.
    pub fn item_length(&self, id: NvId) -> u16 {
        self.engine.with(|engine| {
            match find(engine, id, SearchMode::Current) {
                Ok(Some((page, off))) => engine
                    .codec
                    .read_item_header(page, off)
                    .map(|hdr| hdr.len)
                    .unwrap_or(0),
                _ => 0,
            }
        })
    }

    /// Schedules a factory reset: on the *next* mount, every `item_init`
    /// call this boot session will overwrite an already-existing Id with
    /// its supplied default.
    pub fn write_master_reset_key(&self) -> Result<(), NvError<F::Error>> {
        if !self.voltage.bus_voltage_ok() {
            return Err(NvError::OperFailed);
        }
        self.engine.with(|engine| master_reset::schedule(engine, self.word_size))
    }
}

/// Which header state [`find`] should match, replacing the original
/// Id-top-bit trick. Consumed across `store`, `compactor`, `recovery`, and
/// `master_reset`.
pub(crate) fn find<F: NorFlash, C: Checksum>(
    engine: &mut Engine<F, C>,
    id: NvId,
    mode: SearchMode,
) -> Result<Option<(u8, u32)>, F::Error> {
    if mode == SearchMode::Current {
        if let Some(loc) = engine.cache.lookup(id) {
            return Ok(Some(loc));
        }
    }

    if let Some(loc) = find_by_stat(engine, id, mode)? {
        return Ok(Some(loc));
    }

    // A crash can land between clearing a source's `stat` to `xfer` and the
    // new copy ever existing — the source is then the only surviving copy
    // of `id`, with no `Current` anywhere. Fall back to it so a value is
    // never reported lost just because its supersession was interrupted.
    if mode == SearchMode::Current {
        return find_by_stat(engine, id, SearchMode::PriorXfer);
    }
    Ok(None)
}

fn find_by_stat<F: NorFlash, C: Checksum>(
    engine: &mut Engine<F, C>,
    id: NvId,
    mode: SearchMode,
) -> Result<Option<(u8, u32)>, F::Error> {
    let page_size = engine.codec.page_size();
    let word_size = engine.codec.word_size();
    let reserve = engine.table.reserve();

    for page in 0..engine.table.page_count() {
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
            if !hdr.is_tombstone() && hdr.id == id.get() {
                let matches = match mode {
                    SearchMode::Current => hdr.stat() == ItemStat::Current,
                    SearchMode::PriorXfer => hdr.stat() == ItemStat::Xfer,
                };
                if matches {
                    return Ok(Some((page, off)));
                }
            }
            off += item_size;
        }
    }
    Ok(None)
}

pub(crate) fn item_init_impl<F: NorFlash, C: Checksum>(
    engine: &mut Engine<F, C>,
    word_size: u8,
    id: NvId,
    len: u16,
    buf: Option<&[u8]>,
) -> Result<ItemInitOutcome, NvError<F::Error>> {
    if let Some((page, off)) = find(engine, id, SearchMode::Current).map_err(NvError::Flash)? {
        if engine.master_reset_pending {
            if let Some(bytes) = buf {
                let hdr = engine.codec.read_item_header(page, off).map_err(NvError::Flash)?;
                if bytes.len() as u16 == hdr.len {
                    rewrite_item(engine, word_size, id, page, off, hdr.len, 0, bytes, true)?;
                }
            }
        }
        return Ok(ItemInitOutcome::Existed);
    }

    let size = PageTable::item_size(len, word_size);
    let (target, needs_compaction) = engine.table.select_destination(size).ok_or(NvError::OperFailed)?;
    let dst_page = if needs_compaction {
        let promoted = engine.table.reserve();
        compactor::compact(engine, target, None)?;
        promoted
    } else {
        target
    };
    let dst_off = engine.table.off(dst_page);

    engine
        .codec
        .write_header_half(dst_page, dst_off, id.get(), len)
        .map_err(NvError::Flash)?;

    let chk = match buf {
        Some(bytes) => {
            engine
                .codec
                .write_payload_padded(dst_page, dst_off, bytes)
                .map_err(NvError::Flash)?;
            engine.codec.checksum_of_padded(bytes)
        }
        None => engine.codec.null_checksum_of(len),
    };
    engine.codec.write_checksum(dst_page, dst_off, chk).map_err(NvError::Flash)?;

    let readback = engine
        .codec
        .read_item_header(dst_page, dst_off)
        .map_err(NvError::Flash)?;
    if readback.chk != chk {
        engine.table.add_lost(dst_page, size);
        return Err(NvError::OperFailed);
    }

    engine.table.set_off(dst_page, dst_off + size);
    engine.cache.update(id, dst_page, dst_off);
    Ok(ItemInitOutcome::Created)
}

fn write_impl<F: NorFlash, C: Checksum>(
    engine: &mut Engine<F, C>,
    word_size: u8,
    id: NvId,
    ndx: u16,
    buf: &[u8],
) -> Result<(), NvError<F::Error>> {
    let (page, off) = find(engine, id, SearchMode::Current)
        .map_err(NvError::Flash)?
        .ok_or(NvError::ItemUninit)?;
    let hdr = engine.codec.read_item_header(page, off).map_err(NvError::Flash)?;
    if ndx as u32 + buf.len() as u32 > hdr.len as u32 {
        return Err(NvError::BadItemLen);
    }
    rewrite_item(engine, word_size, id, page, off, hdr.len, ndx, buf, false)
}

/// Splices `new_bytes` into the padded payload of the item at
/// `(src_page, src_off)` at byte offset `ndx`, writes the spliced result as
/// a fresh copy (allocating/compacting as needed), verifies it, then
/// tombstones the source. Shared by `write` and the master-reset rewrite
/// path.
///
/// `force` skips the idempotence short-circuit (used by the master-reset
/// path, which must rewrite unconditionally).
pub(crate) fn rewrite_item<F: NorFlash, C: Checksum>(
    engine: &mut Engine<F, C>,
    word_size: u8,
    id: NvId,
    src_page: u8,
    src_off: u32,
    item_len: u16,
    ndx: u16,
    new_bytes: &[u8],
    force: bool,
) -> Result<(), NvError<F::Error>> {
    let original = engine
        .codec
        .read_padded_payload(src_page, src_off, item_len)
        .map_err(NvError::Flash)?;
    let rel = ndx as usize;
    if !force && original[rel..rel + new_bytes.len()] == *new_bytes {
        return Ok(());
    }
    let mut spliced = original;
    spliced[rel..rel + new_bytes.len()].copy_from_slice(new_bytes);

    // Mark the source superseded before the new copy exists at all, so at
    // most one header ever claims `Current` for this Id. `src` may already
    // be `Xfer` here if a prior crash landed in this same window (`find`
    // falls back to a lone `Xfer` copy when no `Current` exists) — skip the
    // write rather than clear already-cleared bits again.
    let src_hdr = engine.codec.read_item_header(src_page, src_off).map_err(NvError::Flash)?;
    if src_hdr.stat() == ItemStat::Current {
        engine.codec.clear_stat_to_xfer(src_page, src_off).map_err(NvError::Flash)?;
    }

    let size = PageTable::item_size(item_len, word_size);
    let (target, needs_compaction) = engine.table.select_destination(size).ok_or(NvError::OperFailed)?;
    let (dst_page, src_erased) = if needs_compaction {
        let promoted = engine.table.reserve();
        compactor::compact(engine, target, Some(id))?;
        (promoted, target == src_page)
    } else {
        (target, false)
    };
    let dst_off = engine.table.off(dst_page);

    engine
        .codec
        .write_header_half(dst_page, dst_off, id.get(), item_len)
        .map_err(NvError::Flash)?;
    engine
        .codec
        .write_payload(dst_page, dst_off, 0, &spliced)
        .map_err(NvError::Flash)?;
    let chk = engine.codec.checksum_of(&spliced);
    engine.codec.write_checksum(dst_page, dst_off, chk).map_err(NvError::Flash)?;

    let readback = engine
        .codec
        .read_item_header(dst_page, dst_off)
        .map_err(NvError::Flash)?;
    if readback.chk != chk {
        engine.table.add_lost(dst_page, size);
        return Err(NvError::OperFailed);
    }
    engine.table.set_off(dst_page, dst_off + size);

    if !src_erased {
        engine.codec.clear_id_to_zero(src_page, src_off).map_err(NvError::Flash)?;
        engine.table.add_lost(src_page, size);
    }

    engine.cache.update(id, dst_page, dst_off);
    Ok(())
}
