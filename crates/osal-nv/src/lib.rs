//! A power-fail-safe, wear-leveled key-value store for NOR-flash pages.
//!
//! Small, fixed-length records ("items"), each identified by a 16-bit
//! [`NvId`](item::NvId), live in a flash region partitioned into logical
//! pages. A read after an arbitrary reset or brownout returns either the
//! last fully-committed value for an Id, or the value committed before
//! that — never a torn one. See [`store::NvStore`] for the entry point.
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

/// The wear-leveling page allocator.
pub mod allocator;
/// The item index search mode and hot-Id cache.
pub mod cache;
/// Page/item header encode-decode and the payload checksum.
pub mod codec;
/// Compaction: reclaiming a full page onto the reserve.
mod compactor;
/// Error types surfaced by the store.
pub mod error;
/// Item headers and the validated Id type.
pub mod item;
/// The master-reset convenience item.
pub mod master_reset;
/// The process-wide critical section every public call holds.
mod mutex;
/// Page headers and the page state machine.
pub mod page;
/// Boot-time recovery of a consistent page table.
mod recovery;
/// The public API: `NvStore`.
pub mod store;
/// The bus-voltage gate.
pub mod voltage;

pub use codec::{ByteSumChecksum, Checksum};
#[cfg(feature = "crc16")]
pub use codec::Crc16Checksum;
pub use error::NvError;
pub use item::{InvalidId, NvId};
pub use store::{ItemInitOutcome, NvStore, StoreConfig};
pub use voltage::VoltageMonitor;
