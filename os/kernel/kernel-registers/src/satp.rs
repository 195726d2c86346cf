#[cfg(all(feature = "asm", target_arch = "riscv64"))]
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// Translation mode field of `satp`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum SatpMode {
    Bare = 0,
    Sv39 = 8,
    Sv48 = 9,
}

impl SatpMode {
    const fn into_bits(self) -> u8 {
        self as u8
    }

    const fn from_bits(value: u8) -> Self {
        match value {
            8 => Self::Sv39,
            9 => Self::Sv48,
            _ => Self::Bare,
        }
    }
}

/// `satp`: Supervisor Address Translation and Protection.
#[bitfield(u64)]
pub struct Satp {
    /// Bits 0–43: physical page number of the root page table.
    #[bits(44)]
    root_ppn: u64,

    /// Bits 44–59: address space identifier.
    #[bits(16)]
    pub asid: u16,

    /// Bits 60–63: translation mode.
    #[bits(4)]
    pub mode: SatpMode,
}

impl Satp {
    /// SV39 translation rooted at `root`.
    ///
    /// `root` must be 4 KiB-aligned.
    #[must_use]
    pub fn sv39(root: PhysicalAddress, asid: u16) -> Self {
        debug_assert_eq!(root.as_u64() & 0xFFF, 0, "root table must be 4K-aligned");
        Self::new()
            .with_root_ppn(root.as_u64() >> 12)
            .with_asid(asid)
            .with_mode(SatpMode::Sv39)
    }

    /// Physical address of the root page table.
    #[must_use]
    pub fn root(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.root_ppn() << 12)
    }
}

#[cfg(all(feature = "asm", target_arch = "riscv64"))]
impl LoadRegisterUnsafe for Satp {
    unsafe fn load_unsafe() -> Self {
        let satp: u64;
        unsafe {
            core::arch::asm!("csrr {}, satp", out(reg) satp, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(satp)
    }
}

#[cfg(all(feature = "asm", target_arch = "riscv64"))]
impl StoreRegisterUnsafe for Satp {
    unsafe fn store_unsafe(self) {
        let satp = self.into_bits();
        unsafe {
            core::arch::asm!("csrw satp, {}", in(reg) satp, options(nostack, preserves_flags));
        }
    }
}
