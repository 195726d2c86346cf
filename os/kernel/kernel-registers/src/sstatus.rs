#[cfg(all(feature = "asm", target_arch = "riscv64"))]
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// `sstatus`: Supervisor Status Register.
///
/// Only the fields the kernel reads or writes are named.
#[bitfield(u64)]
pub struct Sstatus {
    #[bits(1)]
    __: u8,

    /// Bit 1: SIE: supervisor interrupts enabled.
    pub sie: bool,

    #[bits(3)]
    __: u8,

    /// Bit 5: SPIE: SIE prior to the last trap.
    pub spie: bool,

    #[bits(2)]
    __: u8,

    /// Bit 8: SPP: privilege the hart trapped from (1 = supervisor).
    pub spp: bool,

    #[bits(9)]
    __: u16,

    /// Bit 18: SUM: permit supervisor access to user pages.
    pub sum: bool,

    /// Bit 19: MXR: make executable pages readable.
    pub mxr: bool,

    #[bits(44)]
    __: u64,
}

/// Bit mask of [`Sstatus::sie`].
pub const SSTATUS_SIE: u64 = 1 << 1;

/// Clear `sstatus.SIE` and return whether it was set before.
///
/// # Safety
/// Must run in S-mode.
#[cfg(all(feature = "asm", target_arch = "riscv64"))]
#[inline]
#[must_use]
pub unsafe fn disable_interrupts() -> bool {
    let prev: u64;
    unsafe {
        core::arch::asm!("csrrc {}, sstatus, {}", out(reg) prev, in(reg) SSTATUS_SIE, options(nostack));
    }
    prev & SSTATUS_SIE != 0
}

/// Set `sstatus.SIE`.
///
/// # Safety
/// Must run in S-mode with a trap vector installed.
#[cfg(all(feature = "asm", target_arch = "riscv64"))]
#[inline]
pub unsafe fn enable_interrupts() {
    unsafe {
        core::arch::asm!("csrs sstatus, {}", in(reg) SSTATUS_SIE, options(nostack));
    }
}

#[cfg(all(feature = "asm", target_arch = "riscv64"))]
impl LoadRegisterUnsafe for Sstatus {
    unsafe fn load_unsafe() -> Self {
        let v: u64;
        unsafe {
            core::arch::asm!("csrr {}, sstatus", out(reg) v, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(v)
    }
}

#[cfg(all(feature = "asm", target_arch = "riscv64"))]
impl StoreRegisterUnsafe for Sstatus {
    unsafe fn store_unsafe(self) {
        let v = self.into_bits();
        unsafe {
            core::arch::asm!("csrw sstatus, {}", in(reg) v, options(nostack));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions() {
        assert_eq!(Sstatus::new().with_sie(true).into_bits(), SSTATUS_SIE);
        assert_eq!(Sstatus::new().with_sum(true).into_bits(), 1 << 18);
        assert_eq!(Sstatus::new().with_spp(true).into_bits(), 1 << 8);
    }
}
