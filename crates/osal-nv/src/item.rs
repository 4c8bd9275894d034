//! Item headers: the per-record metadata stored immediately before every
//! item's payload.

/// Lowest valid application Id.
pub const NVID_MIN: u16 = 0x0001;
/// Highest valid application Id. Bit 15 is reserved for the internal
/// [`crate::cache::SearchMode`] and is never part of the representable
/// range of [`NvId`].
pub const NVID_MAX: u16 = 0x7FFF;

/// `id` value of a never-written item header.
pub const ERASED_ID: u16 = 0xFFFF;
/// `id` value of a tombstoned item: superseded and reclaimed by the next
/// compaction.
pub const TOMBSTONE_ID: u16 = 0x0000;

/// Size in bytes of an on-flash item header (four words).
pub const ITEM_HDR_SIZE: u32 = 8;

/// `raw` was outside `0x0001..=0x7FFF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidId(pub u16);

/// A validated application item identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NvId(u16);

impl NvId {
    /// Validates `raw` as an application Id.
    pub fn new(raw: u16) -> Result<Self, InvalidId> {
        if (NVID_MIN..=NVID_MAX).contains(&raw) {
            Ok(NvId(raw))
        } else {
            Err(InvalidId(raw))
        }
    }

    /// The raw 16-bit Id, as stored in an item header's `id` field.
    pub fn get(self) -> u16 {
        self.0
    }
}

/// The on-flash `stat` field, modeled as a tag instead of a bare sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStat {
    /// `0xFFFF`: this is the live copy.
    Current,
    /// Anything else: a prior copy, superseded and awaiting collection.
    Xfer,
}

impl ItemStat {
    pub(crate) fn from_raw(raw: u16) -> ItemStat {
        if raw == 0xFFFF {
            ItemStat::Current
        } else {
            ItemStat::Xfer
        }
    }

    pub(crate) fn xfer_raw() -> u16 {
        0x0000
    }
}

/// The decoded on-flash item header.
#[derive(Debug, Clone, Copy)]
pub struct ItemHeader {
    /// Raw Id; `0xFFFF` erased, `0x0000` tombstone, else an [`NvId`].
    pub id: u16,
    /// Declared payload length in bytes.
    pub len: u16,
    /// Checksum of the payload, padded to the store's word size.
    pub chk: u16,
    /// Raw `stat` word; decode with [`ItemHeader::stat`].
    pub stat_raw: u16,
}

impl ItemHeader {
    /// This header slot has never been written.
    pub fn is_erased(&self) -> bool {
        self.id == ERASED_ID
    }

    /// This header slot holds a tombstone.
    pub fn is_tombstone(&self) -> bool {
        self.id == TOMBSTONE_ID
    }

    /// The decoded `stat` field.
    pub fn stat(&self) -> ItemStat {
        ItemStat::from_raw(self.stat_raw)
    }

    /// This item's payload length, padded up to a whole number of words.
    pub fn padded_len(&self, word_size: u8) -> u32 {
        pad_to_word(self.len as u32, word_size)
    }
}

/// Rounds `len` up to the nearest multiple of `word_size`.
pub(crate) fn pad_to_word(len: u32, word_size: u8) -> u32 {
    let w = word_size as u32;
    (len + w - 1) / w * w
}
