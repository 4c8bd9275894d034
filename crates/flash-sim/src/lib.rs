//! A deterministic in-memory NOR flash, for exercising `osal-nv` without
//! real hardware.
//!
//! [`SimulatedFlash`] implements the `embedded-storage` blocking traits over
//! a `Vec<u8>`-backed region of `PAGES` logical pages of `PAGE_SIZE` bytes
//! each, and enforces the one constraint real NOR flash imposes that an
//! ordinary `Vec<u8>` does not: a `write` can only clear bits, never set
//! them back to `1` (only [`NorFlash::erase`] does that). On top of the
//! honest model, a [`CrashPoint`] can interrupt any `write`/`erase` call
//! partway through, leaving exactly the torn state a real power loss would —
//! the mechanism the recovery property tests drive.
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;

use embedded_storage::nor_flash::{
    ErrorType, MultiwriteNorFlash, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Where, in the lifetime of a [`SimulatedFlash`], the next `write`/`erase`
/// call should be interrupted to simulate a reset/brownout.
#[derive(Clone, Copy, Debug)]
pub struct CrashPoint {
    /// Number of `write`/`erase` calls to let through untouched before the
    /// crash fires. `0` crashes on the very next call.
    pub after_calls: u32,
    /// Byte offset within that call's buffer (for `write`) or byte range
    /// (for `erase`) at which the crash occurs; bytes at and after this
    /// offset are never applied.
    pub at_byte: u32,
}

/// Error surfaced by [`SimulatedFlash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFlashError {
    /// `offset`/length was not a multiple of the device's read/write/erase
    /// granularity.
    NotAligned,
    /// The access ran past the end of the configured region.
    OutOfBounds,
    /// A [`CrashPoint`] fired during this call; the flash is now frozen —
    /// issue no further calls against it. Snapshot its bytes with
    /// [`SimulatedFlash::bytes`] and mount a fresh [`SimulatedFlash`] over
    /// them to exercise recovery, the way a reboot would.
    Crashed,
}

impl NorFlashError for SimFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            SimFlashError::NotAligned => NorFlashErrorKind::NotAligned,
            SimFlashError::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            SimFlashError::Crashed => NorFlashErrorKind::Other,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct CrashState {
    point: Option<CrashPoint>,
    calls_seen: u32,
    fired: bool,
}

impl CrashState {
    fn none() -> Self {
        CrashState {
            point: None,
            calls_seen: 0,
            fired: false,
        }
    }

    /// Returns how many of `len` bytes of this call should actually be
    /// applied, and whether the flash is now (or still) crashed.
    fn interrupt(&mut self, len: usize) -> (usize, bool) {
        if self.fired {
            return (0, true);
        }
        match self.point {
            None => (len, false),
            Some(cp) => {
                if self.calls_seen < cp.after_calls {
                    self.calls_seen += 1;
                    (len, false)
                } else {
                    self.fired = true;
                    (usize::min(cp.at_byte as usize, len), true)
                }
            }
        }
    }
}

/// Builds a [`SimulatedFlash`], optionally configuring fault injection and a
/// stuck-bit wear-out model.
pub struct SimulatedFlashBuilder {
    crash: Option<CrashPoint>,
    min_safe_erase_cycles: u32,
    bit_failure_every_x_erases: u32,
    rng_seed: u64,
}

impl SimulatedFlashBuilder {
    /// Starts a builder with fault injection disabled.
    pub fn new() -> Self {
        SimulatedFlashBuilder {
            crash: None,
            min_safe_erase_cycles: u32::MAX,
            bit_failure_every_x_erases: u32::MAX,
            rng_seed: 0,
        }
    }

    /// Arranges for the `after_calls`-th subsequent `write`/`erase` call to
    /// be interrupted at `at_byte`.
    pub fn with_crash(mut self, crash: CrashPoint) -> Self {
        self.crash = Some(crash);
        self
    }

    /// Enables the stuck-bit wear-out model: past `min_safe_erase_cycles`
    /// erases of a given page, roughly one bit in `bit_failure_every_x_erases`
    /// subsequent erases gets stuck. Deterministic for a fixed `rng_seed`.
    pub fn with_wear_model(mut self, min_safe_erase_cycles: u32, bit_failure_every_x_erases: u32, rng_seed: u64) -> Self {
        self.min_safe_erase_cycles = min_safe_erase_cycles;
        self.bit_failure_every_x_erases = bit_failure_every_x_erases;
        self.rng_seed = rng_seed;
        self
    }

    /// Builds a blank (all-`0xFF`) flash of `PAGE_SIZE * PAGES` bytes.
    pub fn build<const PAGE_SIZE: usize, const PAGES: usize, const WS: usize>(
        self,
    ) -> SimulatedFlash<PAGE_SIZE, PAGES, WS> {
        self.build_from(vec![0xFFu8; PAGE_SIZE * PAGES])
    }

    /// Builds a flash pre-loaded with `data` (e.g. a snapshot captured from a
    /// prior run) with this builder's crash/wear-model configuration
    /// applied. This is how property tests replay a deterministic operation
    /// sequence from a known starting point while sweeping the crash point
    /// across every call the sequence issues: take a snapshot right before
    /// the operation under test, learn `calls_issued()` from an uninjected
    /// dry run starting from that snapshot, then rebuild from the same
    /// snapshot with `with_crash` set to each candidate call index in turn.
    pub fn build_from<const PAGE_SIZE: usize, const PAGES: usize, const WS: usize>(
        self,
        data: Vec<u8>,
    ) -> SimulatedFlash<PAGE_SIZE, PAGES, WS> {
        assert_eq!(data.len(), PAGE_SIZE * PAGES, "snapshot size does not match this flash's geometry");
        let len = data.len();
        SimulatedFlash {
            data,
            stuck_at_0: vec![0u8; len],
            stuck_at_1: vec![0u8; len],
            erase_cycles: [0u32; PAGES],
            crash: CrashState {
                point: self.crash,
                calls_seen: 0,
                fired: false,
            },
            min_safe_erase_cycles: self.min_safe_erase_cycles,
            bit_failure_every_x_erases: self.bit_failure_every_x_erases,
            rng: SmallRng::seed_from_u64(self.rng_seed),
            calls: 0,
        }
    }
}

impl Default for SimulatedFlashBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An in-memory NOR flash of `PAGES` logical pages, `PAGE_SIZE` bytes each,
/// with a minimum programmable unit of `WRITE_SIZE` bytes.
pub struct SimulatedFlash<const PAGE_SIZE: usize, const PAGES: usize, const WS: usize = 2> {
    data: Vec<u8>,
    stuck_at_0: Vec<u8>,
    stuck_at_1: Vec<u8>,
    erase_cycles: [u32; PAGES],
    crash: CrashState,
    min_safe_erase_cycles: u32,
    bit_failure_every_x_erases: u32,
    rng: SmallRng,
    calls: u32,
}

impl<const PAGE_SIZE: usize, const PAGES: usize, const WS: usize> SimulatedFlash<PAGE_SIZE, PAGES, WS> {
    /// A blank flash with no fault injection configured.
    pub fn blank() -> Self {
        SimulatedFlashBuilder::new().build()
    }

    /// Rebuilds a flash from a previously captured byte snapshot (e.g. one
    /// taken after [`Self::has_crashed`] went `true`), with fault injection
    /// disabled — the same as mounting a fresh store after a reboot.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        assert_eq!(data.len(), PAGE_SIZE * PAGES, "snapshot size does not match this flash's geometry");
        let len = data.len();
        SimulatedFlash {
            data,
            stuck_at_0: vec![0u8; len],
            stuck_at_1: vec![0u8; len],
            erase_cycles: [0u32; PAGES],
            crash: CrashState::none(),
            min_safe_erase_cycles: u32::MAX,
            bit_failure_every_x_erases: u32::MAX,
            rng: SmallRng::seed_from_u64(0),
            calls: 0,
        }
    }

    /// The raw backing bytes, for snapshotting across a simulated reboot.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Whether an injected [`CrashPoint`] has fired yet.
    pub fn has_crashed(&self) -> bool {
        self.crash.fired
    }

    /// Number of times `page` has been erased.
    pub fn erase_cycles(&self, page: usize) -> u32 {
        self.erase_cycles[page]
    }

    /// Total number of `write`/`erase` calls this flash has seen so far,
    /// regardless of whether fault injection is configured. Record this
    /// before and after a dry run of some operation to find the call range
    /// a [`CrashPoint`] should target, rather than counting by hand.
    pub fn calls_issued(&self) -> u32 {
        self.calls
    }

    fn maybe_inject_wear(&mut self, page: usize) {
        let cycles = self.erase_cycles[page];
        if cycles <= self.min_safe_erase_cycles {
            return;
        }
        if self.bit_failure_every_x_erases == 0 || !self.rng.gen_ratio(1, self.bit_failure_every_x_erases.max(1)) {
            return;
        }
        let base = page * PAGE_SIZE;
        let byte = base + self.rng.gen_range(0..PAGE_SIZE);
        let bit = 1u8 << self.rng.gen_range(0..8);
        if self.rng.gen_bool(0.5) {
            self.stuck_at_1[byte] |= bit;
        } else {
            self.stuck_at_0[byte] |= bit;
        }
    }
}

impl<const PAGE_SIZE: usize, const PAGES: usize, const WS: usize> ErrorType
    for SimulatedFlash<PAGE_SIZE, PAGES, WS>
{
    type Error = SimFlashError;
}

impl<const PAGE_SIZE: usize, const PAGES: usize, const WS: usize> ReadNorFlash
    for SimulatedFlash<PAGE_SIZE, PAGES, WS>
{
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        let end = start + bytes.len();
        if end > self.data.len() {
            return Err(SimFlashError::OutOfBounds);
        }
        for (i, b) in bytes.iter_mut().enumerate() {
            let idx = start + i;
            *b = (self.data[idx] | self.stuck_at_1[idx]) & !self.stuck_at_0[idx];
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl<const PAGE_SIZE: usize, const PAGES: usize, const WS: usize> NorFlash
    for SimulatedFlash<PAGE_SIZE, PAGES, WS>
{
    const WRITE_SIZE: usize = WS;
    const ERASE_SIZE: usize = PAGE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from as usize % PAGE_SIZE != 0 || to as usize % PAGE_SIZE != 0 {
            return Err(SimFlashError::NotAligned);
        }
        let start = from as usize;
        let end = to as usize;
        if end > self.data.len() || start >= end {
            return Err(SimFlashError::OutOfBounds);
        }
        if self.crash.fired {
            return Err(SimFlashError::Crashed);
        }
        self.calls += 1;

        let (apply_len, crashed_now) = self.crash.interrupt(end - start);
        for idx in start..start + apply_len {
            self.data[idx] = 0xFF;
        }
        for page in (start / PAGE_SIZE)..(end / PAGE_SIZE) {
            self.erase_cycles[page] += 1;
            self.maybe_inject_wear(page);
        }

        if crashed_now {
            Err(SimFlashError::Crashed)
        } else {
            Ok(())
        }
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if offset as usize % WS != 0 || bytes.len() % WS != 0 {
            return Err(SimFlashError::NotAligned);
        }
        let start = offset as usize;
        let end = start + bytes.len();
        if end > self.data.len() {
            return Err(SimFlashError::OutOfBounds);
        }
        if self.crash.fired {
            return Err(SimFlashError::Crashed);
        }
        self.calls += 1;

        let (apply_len, crashed_now) = self.crash.interrupt(bytes.len());
        for (i, &b) in bytes[..apply_len].iter().enumerate() {
            let idx = start + i;
            // NOR program can only clear bits; a caller trying to set one
            // back to 1 without an erase in between just doesn't see it take.
            self.data[idx] &= b;
        }

        if crashed_now {
            Err(SimFlashError::Crashed)
        } else {
            Ok(())
        }
    }
}

impl<const PAGE_SIZE: usize, const PAGES: usize, const WS: usize> MultiwriteNorFlash
    for SimulatedFlash<PAGE_SIZE, PAGES, WS>
{
}

// Mirrored impls for `&mut SimulatedFlash`, so a test can mount a store
// against a borrow and keep the flash itself available afterward to
// snapshot bytes or check `has_crashed`/`erase_cycles`.
impl<const PAGE_SIZE: usize, const PAGES: usize, const WS: usize> ErrorType
    for &mut SimulatedFlash<PAGE_SIZE, PAGES, WS>
{
    type Error = SimFlashError;
}

impl<const PAGE_SIZE: usize, const PAGES: usize, const WS: usize> ReadNorFlash
    for &mut SimulatedFlash<PAGE_SIZE, PAGES, WS>
{
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        (**self).read(offset, bytes)
    }

    fn capacity(&self) -> usize {
        (**self).capacity()
    }
}

impl<const PAGE_SIZE: usize, const PAGES: usize, const WS: usize> NorFlash
    for &mut SimulatedFlash<PAGE_SIZE, PAGES, WS>
{
    const WRITE_SIZE: usize = WS;
    const ERASE_SIZE: usize = PAGE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        (**self).erase(from, to)
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        (**self).write(offset, bytes)
    }
}

impl<const PAGE_SIZE: usize, const PAGES: usize, const WS: usize> MultiwriteNorFlash
    for &mut SimulatedFlash<PAGE_SIZE, PAGES, WS>
{
}
