//! Shared scaffolding for the integration test binaries: a fixed geometry
//! (`P = 4, S = 512, W = 2`, matching the scenarios in the design doc) and
//! raw-byte helpers that decode page/item headers directly out of a
//! [`flash_sim::SimulatedFlash`] snapshot, independent of whatever page the
//! allocator actually picked.

use flash_sim::SimulatedFlash;
use osal_nv::voltage::AlwaysOk;
use osal_nv::{ByteSumChecksum, NvId, NvStore, StoreConfig};

const PAGE_SIZE_USIZE: usize = 512;
const PAGE_COUNT_USIZE: usize = 4;
const WORD_SIZE_USIZE: usize = 2;

pub const PAGE_SIZE: u32 = PAGE_SIZE_USIZE as u32;
pub const PAGE_COUNT: u8 = PAGE_COUNT_USIZE as u8;
pub const WORD_SIZE: u8 = WORD_SIZE_USIZE as u8;
const PAGE_HDR_SIZE: u32 = 8;
const ITEM_HDR_SIZE: u32 = 8;

pub type TestFlash = SimulatedFlash<PAGE_SIZE_USIZE, PAGE_COUNT_USIZE, WORD_SIZE_USIZE>;
pub type TestStore<'a> = NvStore<&'a mut TestFlash, ByteSumChecksum, AlwaysOk>;

/// The hot-Id set used by every scenario: `{0x0001}`.
pub fn hot_ids() -> Vec<NvId> {
    vec![NvId::new(0x0001).unwrap()]
}

pub fn config() -> StoreConfig {
    StoreConfig {
        page_count: PAGE_COUNT,
        page_size: PAGE_SIZE,
        word_size: WORD_SIZE,
        hot_ids: hot_ids(),
    }
}

/// Mounts a store over `flash` with the standard scenario geometry.
pub fn mount(flash: &mut TestFlash) -> TestStore<'_> {
    NvStore::mount(flash, AlwaysOk, config()).expect("mount of a freshly built region must succeed")
}

fn pad2(len: u16) -> u32 {
    ((len as u32) + 1) / 2 * 2
}

/// One decoded item header, with the logical page/offset it was found at.
#[derive(Debug, Clone, Copy)]
pub struct RawItem {
    pub page: u8,
    pub offset: u32,
    pub id: u16,
    pub len: u16,
    pub chk: u16,
    pub stat: u16,
}

impl RawItem {
    pub fn is_erased(&self) -> bool {
        self.id == 0xFFFF
    }

    pub fn is_tombstone(&self) -> bool {
        self.id == 0x0000
    }

    pub fn is_current(&self) -> bool {
        self.stat == 0xFFFF
    }
}

/// Decoded page header: `(active, in_use, xfer, spare)`.
pub fn page_header(bytes: &[u8], page: u8) -> (u16, u16, u16, u16) {
    let base = page as u32 * PAGE_SIZE;
    let word = |off: u32| {
        let i = (base + off) as usize;
        u16::from_le_bytes([bytes[i], bytes[i + 1]])
    };
    (word(0), word(2), word(4), word(6))
}

/// Scans every logical page of `bytes` for item headers, stopping each page
/// at its first never-written (erased) slot.
pub fn scan_items(bytes: &[u8]) -> Vec<RawItem> {
    let mut out = Vec::new();
    for page in 0..PAGE_COUNT {
        let base = page as u32 * PAGE_SIZE;
        let mut off = PAGE_HDR_SIZE;
        loop {
            if off + ITEM_HDR_SIZE > PAGE_SIZE {
                break;
            }
            let i = (base + off) as usize;
            let id = u16::from_le_bytes([bytes[i], bytes[i + 1]]);
            let len = u16::from_le_bytes([bytes[i + 2], bytes[i + 3]]);
            let chk = u16::from_le_bytes([bytes[i + 4], bytes[i + 5]]);
            let stat = u16::from_le_bytes([bytes[i + 6], bytes[i + 7]]);
            if id == 0xFFFF {
                break;
            }
            let item_size = ITEM_HDR_SIZE + pad2(len);
            if off + item_size > PAGE_SIZE {
                break;
            }
            out.push(RawItem { page, offset: off, id, len, chk, stat });
            off += item_size;
        }
    }
    out
}

/// Finds the one item in `items` (as returned by [`scan_items`]) matching
/// `id` and `stat == Current`, validating there is at most one.
pub fn find_current<'a>(items: &'a [RawItem], id: u16) -> Option<&'a RawItem> {
    let matches: Vec<&RawItem> = items
        .iter()
        .filter(|it| it.id == id && !it.is_tombstone() && it.is_current())
        .collect();
    assert!(matches.len() <= 1, "more than one Current copy of id {:#06x}", id);
    matches.into_iter().next()
}
