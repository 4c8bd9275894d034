//! Item index support: the search-mode flag and the hot-id cache.

use alloc::vec::Vec;

use crate::item::NvId;

/// Which header state `find` should match.
///
/// Stands in for the original format's trick of flipping the Id's top bit
/// to mean "find the superseded copy instead of the live one" — that bit
/// never appears in the public [`NvId`] type; callers select it through
/// this enum instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Match items with `stat == Current`.
    Current,
    /// Match items with `stat == Xfer`.
    PriorXfer,
}

#[derive(Clone, Copy)]
struct HotEntry {
    id: NvId,
    page: u8,
    item_offset: u32,
}

/// Caches the `(page, item_offset)` of a small configured set of "hot" Ids,
/// so reads and writes for them skip the linear page scan.
pub struct HotCache {
    ids: Vec<NvId>,
    entries: Vec<HotEntry>,
}

impl HotCache {
    /// Builds a cache that tracks exactly the Ids in `ids`.
    pub fn new(ids: Vec<NvId>) -> Self {
        HotCache {
            ids,
            entries: Vec::new(),
        }
    }

    /// Whether `id` is in the configured hot set.
    pub fn is_hot(&self, id: NvId) -> bool {
        self.ids.contains(&id)
    }

    /// The cached location of `id`, if known.
    pub fn lookup(&self, id: NvId) -> Option<(u8, u32)> {
        self.entries.iter().find(|e| e.id == id).map(|e| (e.page, e.item_offset))
    }

    /// Records `id`'s current location, if `id` is in the hot set;
    /// otherwise a no-op.
    pub fn update(&mut self, id: NvId, page: u8, item_offset: u32) {
        if !self.is_hot(id) {
            return;
        }
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.page = page;
            entry.item_offset = item_offset;
        } else {
            self.entries.push(HotEntry { id, page, item_offset });
        }
    }

    /// Drops any cached location for `id` (it no longer exists).
    pub fn invalidate(&mut self, id: NvId) {
        self.entries.retain(|e| e.id != id);
    }
}
