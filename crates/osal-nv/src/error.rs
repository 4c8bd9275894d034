//! Error types surfaced by the store.

use core::fmt;

use crate::item::InvalidId;

/// Everything a call into [`crate::store::NvStore`] can fail with.
///
/// `E` is the underlying `NorFlash` implementation's error type; most
/// variants never carry one, since a failed read-back or checksum is
/// reported as [`NvError::OperFailed`] rather than propagating the flash
/// error that happened to trigger it (the flash device itself is fine —
/// the *content* didn't verify).
#[derive(Debug)]
#[non_exhaustive]
pub enum NvError<E> {
    /// The requested Id has never been created, or was deleted.
    ItemUninit,
    /// A write, checksum verification, allocation, or compaction failed.
    /// The previously committed value (if any) is unaffected.
    OperFailed,
    /// The caller-declared length did not match the item already on flash.
    BadItemLen,
    /// `id` was outside the representable range `0x0001..=0x7FFF`.
    InvalidId,
    /// The underlying `NorFlash` device reported an error performing a
    /// read, write, or erase.
    Flash(E),
}

impl<E> From<InvalidId> for NvError<E> {
    fn from(_: InvalidId) -> Self {
        NvError::InvalidId
    }
}

impl<E: fmt::Debug> fmt::Display for NvError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NvError::ItemUninit => write!(f, "item not initialized"),
            NvError::OperFailed => write!(f, "operation failed"),
            NvError::BadItemLen => write!(f, "bad item length"),
            NvError::InvalidId => write!(f, "id out of range 0x0001..=0x7FFF"),
            NvError::Flash(e) => write!(f, "flash error: {:?}", e),
        }
    }
}

#[cfg(feature = "std")]
impl<E: fmt::Debug> std::error::Error for NvError<E> {}
