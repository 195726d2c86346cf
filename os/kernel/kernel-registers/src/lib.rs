//! # Typed RISC-V Supervisor CSRs
//!
//! Bitfield views of the control and status registers the memory subsystem
//! touches. Reading or writing the actual CSR needs the `asm` feature and a
//! `riscv64` target; on any other target only the value types are available,
//! which is what host-side tests use.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "satp")]
pub mod satp;

#[cfg(feature = "scause")]
pub mod scause;

#[cfg(feature = "sstatus")]
pub mod sstatus;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// Supervisor CSRs trap when accessed from U-mode.
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// Writing `satp` or `sstatus` changes translation or interrupt state of
    /// the running hart.
    unsafe fn store_unsafe(self);
}

pub trait LoadRegister {
    fn load() -> Self;
}

pub trait StoreRegister {
    fn store(self);
}

impl<T> LoadRegisterUnsafe for T
where
    T: LoadRegister,
{
    #[inline]
    unsafe fn load_unsafe() -> Self {
        <Self as LoadRegister>::load()
    }
}

impl<T> StoreRegisterUnsafe for T
where
    T: StoreRegister,
{
    #[inline]
    unsafe fn store_unsafe(self) {
        <Self as StoreRegister>::store(self);
    }
}
