#[cfg(all(feature = "asm", target_arch = "riscv64"))]
use crate::LoadRegisterUnsafe;
use bitfield_struct::bitfield;

/// `scause`: Supervisor Cause Register.
#[bitfield(u64)]
pub struct Scause {
    /// Bits 0–62: exception or interrupt code.
    #[bits(63)]
    pub code: u64,

    /// Bit 63: set if the trap was caused by an interrupt.
    pub interrupt: bool,
}

/// Exception codes of the three page-fault causes.
pub const INSTRUCTION_PAGE_FAULT: u64 = 12;
pub const LOAD_PAGE_FAULT: u64 = 13;
pub const STORE_PAGE_FAULT: u64 = 15;

impl Scause {
    /// `true` for instruction, load and store/AMO page faults.
    #[must_use]
    pub const fn is_page_fault(&self) -> bool {
        !self.interrupt()
            && matches!(
                self.code(),
                INSTRUCTION_PAGE_FAULT | LOAD_PAGE_FAULT | STORE_PAGE_FAULT
            )
    }
}

#[cfg(all(feature = "asm", target_arch = "riscv64"))]
impl LoadRegisterUnsafe for Scause {
    unsafe fn load_unsafe() -> Self {
        let v: u64;
        unsafe {
            core::arch::asm!("csrr {}, scause", out(reg) v, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(v)
    }
}

/// Faulting address of the current trap.
///
/// # Safety
/// Must run in S-mode inside a trap handler.
#[cfg(all(feature = "asm", target_arch = "riscv64"))]
#[must_use]
pub unsafe fn stval() -> u64 {
    let v: u64;
    unsafe {
        core::arch::asm!("csrr {}, stval", out(reg) v, options(nomem, nostack, preserves_flags));
    }
    v
}
