//! Per-page free-space bookkeeping and the wear-leveling page allocator.

use alloc::vec;
use alloc::vec::Vec;

use crate::item::{pad_to_word, ITEM_HDR_SIZE};
use crate::page::PAGE_HDR_SIZE;

/// Tracks, for every logical page, how many bytes have been written
/// (`off`) and how many of those are reclaimable by compaction (`lost`) —
/// tombstones, superseded `Xfer` copies, and corrupt items.
pub struct PageTable {
    page_size: u32,
    off: Vec<u32>,
    lost: Vec<u32>,
    reserve: u8,
}

impl PageTable {
    /// Builds a table for `page_count` pages of `page_size` bytes each,
    /// with every page's offset reset to just past its header and no bytes
    /// lost. `reserve` is the page currently in the `Erased` state.
    pub fn new(page_count: u8, page_size: u32, reserve: u8) -> Self {
        PageTable {
            page_size,
            off: vec![PAGE_HDR_SIZE; page_count as usize],
            lost: vec![0; page_count as usize],
            reserve,
        }
    }

    /// Number of logical pages this table covers.
    pub fn page_count(&self) -> u8 {
        self.off.len() as u8
    }

    /// The page currently in the `Erased` state.
    pub fn reserve(&self) -> u8 {
        self.reserve
    }

    /// Records a new reserve page.
    pub fn set_reserve(&mut self, page: u8) {
        self.reserve = page;
    }

    /// Next free byte offset on `page`.
    pub fn off(&self, page: u8) -> u32 {
        self.off[page as usize]
    }

    /// Bytes on `page` occupied by tombstones, superseded copies, or
    /// corrupt items.
    pub fn lost(&self, page: u8) -> u32 {
        self.lost[page as usize]
    }

    /// Overwrites `page`'s next-free-offset bookkeeping.
    pub fn set_off(&mut self, page: u8, off: u32) {
        self.off[page as usize] = off;
    }

    /// Overwrites `page`'s lost-byte bookkeeping.
    pub fn set_lost(&mut self, page: u8, lost: u32) {
        self.lost[page as usize] = lost;
    }

    /// Adds `n` bytes to `page`'s lost-byte count.
    pub fn add_lost(&mut self, page: u8, n: u32) {
        self.lost[page as usize] += n;
    }

    /// Resets `page`'s bookkeeping to "just erased".
    pub fn reset_page(&mut self, page: u8) {
        self.off[page as usize] = PAGE_HDR_SIZE;
        self.lost[page as usize] = 0;
    }

    fn free(&self, page: u8) -> u32 {
        self.page_size - self.off[page as usize]
    }

    fn reclaimable(&self, page: u8) -> u32 {
        self.free(page) + self.lost[page as usize]
    }

    /// On-flash size (header included) of an item with payload length
    /// `len`, padded to `word_size`.
    pub fn item_size(len: u16, word_size: u8) -> u32 {
        ITEM_HDR_SIZE + pad_to_word(len as u32, word_size)
    }

    /// Picks the destination page for a new item of `size` bytes:
    /// starting at `(reserve + 1) mod page_count` and advancing, the first
    /// page whose free-plus-lost space can fit it. Returns
    /// `(page, needs_compaction)`; `needs_compaction` is true when the free
    /// space alone is insufficient and reclaiming lost bytes is required
    /// first.
    pub fn select_destination(&self, size: u32) -> Option<(u8, bool)> {
        let count = self.page_count();
        for step in 1..count {
            let page = (self.reserve + step) % count;
            if self.reclaimable(page) >= size {
                let needs_compaction = self.free(page) < size;
                return Some((page, needs_compaction));
            }
        }
        None
    }
}
