//! The single process-wide critical section every public entry point holds
//! for its entire duration.
//!
//! Models the host kernel's binary mutex: the `critical-section` crate's
//! global section, not a task-blocking mutex type, because no operation in
//! this store ever suspends mid-flight (see the crate's design notes).

use core::cell::RefCell;

use critical_section::Mutex;

pub(crate) struct NvMutex<T> {
    inner: Mutex<RefCell<T>>,
}

impl<T> NvMutex<T> {
    pub fn new(value: T) -> Self {
        NvMutex {
            inner: Mutex::new(RefCell::new(value)),
        }
    }

    /// Runs `f` with exclusive access to the guarded value, inside the
    /// global critical section.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section::with(|cs| {
            let cell = self.inner.borrow(cs);
            let mut guard = cell.borrow_mut();
            f(&mut guard)
        })
    }
}
