use crate::raw::{Flash, FlashError};
use embedded_storage::nor_flash::{
    ErrorType, MultiwriteNorFlash, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

/// Adapts a register-level [`Flash`] implementation to the `embedded-storage`
/// traits the rest of the store is built on.
///
/// `PAGE_SIZE` is the erase granularity of the underlying part (1024 or 2048
/// bytes on most STM32F1 densities); `base` is the absolute address of byte
/// offset zero in the logical region this adapter exposes.
pub struct Stm32f1NorFlash<F, const PAGE_SIZE: usize> {
    flash: F,
    base: usize,
    capacity: usize,
}

impl<F: Flash, const PAGE_SIZE: usize> Stm32f1NorFlash<F, PAGE_SIZE> {
    /// Wrap `flash`, exposing `capacity` bytes starting at `base`.
    pub fn new(flash: F, base: usize, capacity: usize) -> Self {
        assert_eq!(capacity % PAGE_SIZE, 0, "capacity must be a whole number of pages");
        Stm32f1NorFlash { flash, base, capacity }
    }
}

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            FlashError::ProgrammingError => NorFlashErrorKind::NotAligned,
            _ => NorFlashErrorKind::Other,
        }
    }
}

impl<F: Flash, const PAGE_SIZE: usize> ErrorType for Stm32f1NorFlash<F, PAGE_SIZE> {
    type Error = FlashError;
}

impl<F: Flash, const PAGE_SIZE: usize> ReadNorFlash for Stm32f1NorFlash<F, PAGE_SIZE> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = self.base + offset as usize;
        let src = unsafe { core::slice::from_raw_parts(start as *const u8, bytes.len()) };
        bytes.copy_from_slice(src);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<F: Flash, const PAGE_SIZE: usize> NorFlash for Stm32f1NorFlash<F, PAGE_SIZE> {
    const WRITE_SIZE: usize = 2;
    const ERASE_SIZE: usize = PAGE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        let from = from as usize;
        let to = to as usize;
        assert_eq!(from % PAGE_SIZE, 0);
        assert_eq!(to % PAGE_SIZE, 0);

        let guard = unsafe { self.flash.unlock_guard()? };
        let mut addr = self.base + from;
        let end = self.base + to;
        while addr < end {
            unsafe { guard.erase_page(addr)? };
            addr += PAGE_SIZE;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert_eq!(offset as usize % Self::WRITE_SIZE, 0);
        assert_eq!(bytes.len() % Self::WRITE_SIZE, 0);

        let guard = unsafe { self.flash.unlock_guard()? };
        let mut addr = self.base + offset as usize;
        for half_word in bytes.chunks_exact(2) {
            let data = u16::from_le_bytes([half_word[0], half_word[1]]);
            unsafe { guard.program_half_word(addr, data)? };
            addr += 2;
        }
        Ok(())
    }
}

impl<F: Flash, const PAGE_SIZE: usize> MultiwriteNorFlash for Stm32f1NorFlash<F, PAGE_SIZE> {}
