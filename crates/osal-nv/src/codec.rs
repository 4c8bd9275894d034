//! Encode/decode of page and item headers, word-aligned read-modify-write
//! staging, and the payload checksum.

use alloc::vec;
use alloc::vec::Vec;
use core::marker::PhantomData;

use embedded_storage::nor_flash::NorFlash;

use crate::item::{pad_to_word, ItemHeader, ItemStat, ITEM_HDR_SIZE, TOMBSTONE_ID};
use crate::page::{PageHeader, PAGE_HDR_SIZE};

/// Computes and validates the checksum stored in an item's `chk` field.
///
/// Implementors only ever see the padded payload (filler bytes already
/// `0xFF`); [`Checksum::null_buffer_checksum`] covers the one case where no
/// payload bytes exist to checksum at all (`item_init` with no initial
/// value).
pub trait Checksum {
    /// The checksum of `payload`, which has already been padded to the
    /// configured word size.
    fn checksum(payload: &[u8]) -> u16;

    /// The checksum recorded for an item created with `buf = None`, whose
    /// payload bytes are left at their erased value (`0xFF`) rather than
    /// actually written.
    fn null_buffer_checksum(len: u16, word_size: u8) -> u16;
}

/// The original weak byte-sum checksum: wrapping sum of the padded payload.
///
/// Reproduces the source format's inconsistency between its two checksum
/// helpers bit-for-bit: the "real payload" path sums the padded length,
/// while the "no payload yet" path historically summed the *unpadded*
/// length. This is a compatibility switch, not a bug fix — changing it
/// changes what a freshly `item_init`'d item's `chk` field reads on flash.
pub struct ByteSumChecksum;

impl Checksum for ByteSumChecksum {
    fn checksum(payload: &[u8]) -> u16 {
        payload.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
    }

    fn null_buffer_checksum(len: u16, _word_size: u8) -> u16 {
        len.wrapping_mul(0xFF)
    }
}

/// CRC-16/ARC over the padded payload.
///
/// Gated behind the `crc16` feature. Switching a store from
/// [`ByteSumChecksum`] to this one changes the on-flash checksum format; it
/// is meant to be chosen once at provisioning time, not toggled between
/// mounts of the same region.
#[cfg(feature = "crc16")]
pub struct Crc16Checksum;

#[cfg(feature = "crc16")]
impl Checksum for Crc16Checksum {
    fn checksum(payload: &[u8]) -> u16 {
        const CRC16: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_ARC);
        CRC16.checksum(payload)
    }

    fn null_buffer_checksum(len: u16, word_size: u8) -> u16 {
        const CRC16: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_ARC);
        let mut digest = CRC16.digest();
        let mut remaining = pad_to_word(len as u32, word_size);
        let chunk = [0xFFu8; 16];
        while remaining > 0 {
            let n = remaining.min(chunk.len() as u32) as usize;
            digest.update(&chunk[..n]);
            remaining -= n as u32;
        }
        digest.finalize()
    }
}

/// Stages `bytes` into a word-aligned buffer (read-modify-write) and writes
/// it back, so bytes outside `bytes` but inside the aligned span read back
/// whatever was already on flash — a no-op AND, never a corruption.
fn write_aligned<F: NorFlash>(
    flash: &mut F,
    word_size: u8,
    offset: u32,
    bytes: &[u8],
) -> Result<(), F::Error> {
    let w = word_size as u32;
    let aligned_start = offset - offset % w;
    let end = offset + bytes.len() as u32;
    let aligned_end = pad_to_word(end - aligned_start, word_size) + aligned_start;
    let span = (aligned_end - aligned_start) as usize;
    let mut staged = vec![0xFFu8; span];
    flash.read(aligned_start, &mut staged)?;
    let rel = (offset - aligned_start) as usize;
    staged[rel..rel + bytes.len()].copy_from_slice(bytes);
    flash.write(aligned_start, &staged)
}

/// Reads and writes page/item headers and payloads for one flash region,
/// computing checksums with `C`.
pub struct PageCodec<F, C> {
    flash: F,
    page_size: u32,
    word_size: u8,
    _checksum: PhantomData<C>,
}

impl<F: NorFlash, C: Checksum> PageCodec<F, C> {
    /// Wraps `flash`, treating it as `page_size`-byte logical pages with the
    /// given minimum programmable unit.
    pub fn new(flash: F, page_size: u32, word_size: u8) -> Self {
        PageCodec {
            flash,
            page_size,
            word_size,
            _checksum: PhantomData,
        }
    }

    /// The wrapped flash device.
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// The configured minimum programmable unit.
    pub fn word_size(&self) -> u8 {
        self.word_size
    }

    /// The configured logical page size.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page_base(&self, page: u8) -> u32 {
        page as u32 * self.page_size
    }

    /// Reads `page`'s header.
    pub fn read_page_header(&mut self, page: u8) -> Result<PageHeader, F::Error> {
        let mut buf = [0u8; PAGE_HDR_SIZE as usize];
        self.flash.read(self.page_base(page), &mut buf)?;
        Ok(PageHeader {
            active: u16::from_le_bytes([buf[0], buf[1]]),
            in_use: u16::from_le_bytes([buf[2], buf[3]]),
            xfer: u16::from_le_bytes([buf[4], buf[5]]),
            spare: u16::from_le_bytes([buf[6], buf[7]]),
        })
    }

    /// Writes `active = 0x0000`: promotes an erased page into rotation.
    pub fn promote_active(&mut self, page: u8) -> Result<(), F::Error> {
        write_aligned(&mut self.flash, self.word_size, self.page_base(page), &0u16.to_le_bytes())
    }

    /// Writes `in_use = 0x0000`: the page now accepts item writes.
    pub fn mark_in_use(&mut self, page: u8) -> Result<(), F::Error> {
        write_aligned(
            &mut self.flash,
            self.word_size,
            self.page_base(page) + 2,
            &0u16.to_le_bytes(),
        )
    }

    /// Writes `xfer = 0x0000`: marks the page as a compaction source.
    pub fn mark_compacting(&mut self, page: u8) -> Result<(), F::Error> {
        write_aligned(
            &mut self.flash,
            self.word_size,
            self.page_base(page) + 4,
            &0u16.to_le_bytes(),
        )
    }

    /// Erases `page` entirely, returning it to the `Erased` state.
    pub fn erase_page(&mut self, page: u8) -> Result<(), F::Error> {
        let base = self.page_base(page);
        self.flash.erase(base, base + self.page_size)
    }

    /// Reads the item header at `item_off` bytes into `page`.
    pub fn read_item_header(&mut self, page: u8, item_off: u32) -> Result<ItemHeader, F::Error> {
        let mut buf = [0u8; ITEM_HDR_SIZE as usize];
        self.flash.read(self.page_base(page) + item_off, &mut buf)?;
        Ok(ItemHeader {
            id: u16::from_le_bytes([buf[0], buf[1]]),
            len: u16::from_le_bytes([buf[2], buf[3]]),
            chk: u16::from_le_bytes([buf[4], buf[5]]),
            stat_raw: u16::from_le_bytes([buf[6], buf[7]]),
        })
    }

    /// Writes the `(id, len)` half-header at `item_off`; `chk` and `stat`
    /// are left erased (`stat` erased reads back as `Current`).
    pub fn write_header_half(
        &mut self,
        page: u8,
        item_off: u32,
        id: u16,
        len: u16,
    ) -> Result<(), F::Error> {
        let mut buf = [0u8; 4];
        buf[0..2].copy_from_slice(&id.to_le_bytes());
        buf[2..4].copy_from_slice(&len.to_le_bytes());
        write_aligned(&mut self.flash, self.word_size, self.page_base(page) + item_off, &buf)
    }

    /// Writes `chk` at `item_off + 4`.
    pub fn write_checksum(&mut self, page: u8, item_off: u32, chk: u16) -> Result<(), F::Error> {
        write_aligned(
            &mut self.flash,
            self.word_size,
            self.page_base(page) + item_off + 4,
            &chk.to_le_bytes(),
        )
    }

    /// Clears `stat` to the `Xfer` pattern: this copy is superseded.
    pub fn clear_stat_to_xfer(&mut self, page: u8, item_off: u32) -> Result<(), F::Error> {
        write_aligned(
            &mut self.flash,
            self.word_size,
            self.page_base(page) + item_off + 6,
            &ItemStat::xfer_raw().to_le_bytes(),
        )
    }

    /// Clears `id` to `0x0000`: tombstones this item.
    pub fn clear_id_to_zero(&mut self, page: u8, item_off: u32) -> Result<(), F::Error> {
        write_aligned(
            &mut self.flash,
            self.word_size,
            self.page_base(page) + item_off,
            &TOMBSTONE_ID.to_le_bytes(),
        )
    }

    /// Writes `bytes` at byte offset `rel` within `item_off`'s payload
    /// area. A raw range write: callers writing a brand-new item's full
    /// payload are responsible for padding it to the word size themselves
    /// (see [`crate::item::pad_to_word`]).
    pub fn write_payload(&mut self, page: u8, item_off: u32, rel: u32, bytes: &[u8]) -> Result<(), F::Error> {
        let addr = self.page_base(page) + item_off + ITEM_HDR_SIZE + rel;
        write_aligned(&mut self.flash, self.word_size, addr, bytes)
    }

    /// Reads `buf.len()` payload bytes at byte offset `rel` within
    /// `item_off`'s payload area.
    pub fn read_payload(&mut self, page: u8, item_off: u32, rel: u32, buf: &mut [u8]) -> Result<(), F::Error> {
        self.flash
            .read(self.page_base(page) + item_off + ITEM_HDR_SIZE + rel, buf)
    }

    /// Writes a brand-new item's full payload, padding it to the word size
    /// with `0xFF` filler so the padded region matches what
    /// [`Checksum::null_buffer_checksum`] (or a checksum over the same
    /// padded bytes) expects.
    pub fn write_payload_padded(&mut self, page: u8, item_off: u32, bytes: &[u8]) -> Result<(), F::Error> {
        let padded = pad_to_word(bytes.len() as u32, self.word_size) as usize;
        if padded == bytes.len() {
            self.write_payload(page, item_off, 0, bytes)
        } else {
            let mut staged = vec![0xFFu8; padded];
            staged[..bytes.len()].copy_from_slice(bytes);
            self.write_payload(page, item_off, 0, &staged)
        }
    }

    /// Copies `n` payload bytes from one item's data area to another's,
    /// at the given relative offsets.
    pub fn xfer_payload(
        &mut self,
        src_page: u8,
        src_item_off: u32,
        src_rel: u32,
        dst_page: u8,
        dst_item_off: u32,
        dst_rel: u32,
        n: u32,
    ) -> Result<(), F::Error> {
        let mut buf = vec![0u8; n as usize];
        self.read_payload(src_page, src_item_off, src_rel, &mut buf)?;
        self.write_payload(dst_page, dst_item_off, dst_rel, &buf)
    }

    /// Reads `len` padded payload bytes back out of `item_off`'s data area
    /// for checksum verification.
    pub fn read_padded_payload(&mut self, page: u8, item_off: u32, len: u16) -> Result<Vec<u8>, F::Error> {
        let padded = pad_to_word(len as u32, self.word_size) as usize;
        let mut buf = vec![0u8; padded];
        self.read_payload(page, item_off, 0, &mut buf)?;
        Ok(buf)
    }

    /// The checksum of `payload` under this codec's configured algorithm.
    pub fn checksum_of(&self, payload: &[u8]) -> u16 {
        C::checksum(payload)
    }

    /// The checksum of an intended payload `bytes`, padded to the word size
    /// with `0xFF` filler exactly as [`PageCodec::write_payload_padded`]
    /// pads it on flash. Computing `chk` from the buffer the caller asked
    /// for — rather than from a read-back of whatever actually landed —
    /// means a torn payload write still produces a `chk` that disagrees
    /// with the bytes on flash, so boot-time recovery's checksum pass can
    /// catch it instead of the item looking self-consistently valid.
    pub fn checksum_of_padded(&self, bytes: &[u8]) -> u16 {
        let padded = pad_to_word(bytes.len() as u32, self.word_size) as usize;
        if padded == bytes.len() {
            C::checksum(bytes)
        } else {
            let mut staged = vec![0xFFu8; padded];
            staged[..bytes.len()].copy_from_slice(bytes);
            C::checksum(&staged)
        }
    }

    /// The checksum of a not-yet-written ("null buffer") item's payload.
    pub fn null_checksum_of(&self, len: u16) -> u16 {
        C::null_buffer_checksum(len, self.word_size)
    }
}
