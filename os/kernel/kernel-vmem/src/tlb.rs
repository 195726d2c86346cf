//! # TLB maintenance
//!
//! `sfence.vma` orders earlier page table stores before later translations
//! and drops cached translations. The kernel runs on one hart, so no remote
//! shootdown is needed. On other targets these are no-ops.

use kernel_memory_addresses::VirtualAddress;

/// Invalidate every cached translation.
#[inline]
pub fn flush_all() {
    #[cfg(target_arch = "riscv64")]
    unsafe {
        core::arch::asm!("sfence.vma", options(nostack));
    }
}

/// Invalidate cached translations for the page containing `va`.
#[inline]
pub fn flush_page(va: VirtualAddress) {
    #[cfg(target_arch = "riscv64")]
    unsafe {
        core::arch::asm!("sfence.vma {}, zero", in(reg) va.as_u64(), options(nostack));
    }
    #[cfg(not(target_arch = "riscv64"))]
    let _ = va;
}
