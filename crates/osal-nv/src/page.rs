//! Page headers and the four-state page state machine.

/// Size in bytes of an on-flash page header (four words).
pub const PAGE_HDR_SIZE: u32 = 8;

const ERASED_WORD: u16 = 0xFFFF;
const SET_WORD: u16 = 0x0000;

/// The decoded on-flash page header.
#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    /// `0xFFFF` erased; `0x0000` once the page has entered rotation.
    pub active: u16,
    /// `0xFFFF` until the page starts accepting items; `0x0000` after.
    pub in_use: u16,
    /// `0xFFFF` normally; `0x0000` marks this page as a compaction source.
    pub xfer: u16,
    /// Reserved; never interpreted by this crate.
    pub spare: u16,
}

/// The page state machine, derived from the three meaningful header words
/// (`spare` is carried on flash but never examined).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Erased, unallocated: the sole candidate reserve.
    Erased,
    /// Promoted into rotation, not yet accepting writes.
    Active,
    /// Accepting writes.
    InUse,
    /// Marked as the source of an in-progress compaction.
    Compacting,
}

impl PageHeader {
    /// Classifies this header's state.
    ///
    /// Because each word only ever transitions `0xFFFF -> 0x0000`, and
    /// always in the order `active`, `in_use`, `xfer`, the four listed
    /// combinations are the only ones a correctly functioning writer can
    /// produce; anything else is corruption, and is treated the same as
    /// `Compacting` since that is the most conservative of the in-use
    /// states (recovery will re-validate every item on the page regardless).
    pub fn state(&self) -> PageState {
        match (self.active, self.in_use, self.xfer) {
            (ERASED_WORD, ERASED_WORD, ERASED_WORD) => PageState::Erased,
            (SET_WORD, ERASED_WORD, ERASED_WORD) => PageState::Active,
            (SET_WORD, SET_WORD, ERASED_WORD) => PageState::InUse,
            _ => PageState::Compacting,
        }
    }
}
