//! NOR-flash adapter layer used by the `osal-nv` key-value store.
//!
//! This crate supplies the "Flash adapter" collaborator the store is built
//! against: the [`embedded_storage`] `ReadNorFlash` / `NorFlash` /
//! `MultiwriteNorFlash` traits, plus one concrete hardware backend
//! ([`stm32f1`] register-level access, gated behind the `stm32f103`
//! feature). Hosted code and tests use `flash-sim` instead.
#![no_std]
#![warn(missing_docs)]

/// Raw register-level Flash access, kept close to the hardware.
///
/// This is the contract a specific chip's Flash peripheral must satisfy so
/// [`Stm32f1NorFlash`] can adapt it to `embedded-storage`.
pub mod raw;

/// Adapts a [`raw::Flash`] implementation to the `embedded-storage` traits.
pub mod adapter;

pub use adapter::Stm32f1NorFlash;
pub use raw::{Flash, FlashError, FlashResult};
