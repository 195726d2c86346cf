//! # Kernel-window PhysMapper
//!
//! Once paging is on, all of RAM is reachable through the kernel window at
//! `pa + LINEAR_OFFSET`. [`LinearPhysMapper`] turns a physical address into a
//! pointer through that window.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::LinearPhysMapper;
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let va = LinearPhysMapper::window_address(PhysicalAddress::new(0x8000_1000));
//! assert_eq!(va, 0xC000_1000);
//! ```

use crate::info::{LINEAR_OFFSET, MEM_END, MEM_START};
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] for the kernel window.
///
/// # Safety
/// - The kernel window must be mapped in the active address space.
/// - Only RAM in `[MEM_START, MEM_END)` is reachable.
#[derive(Debug, Copy, Clone, Default)]
pub struct LinearPhysMapper;

impl LinearPhysMapper {
    /// Kernel-window address of `pa`.
    #[inline]
    #[must_use]
    pub const fn window_address(pa: PhysicalAddress) -> u64 {
        pa.as_u64() + LINEAR_OFFSET
    }
}

impl PhysMapper for LinearPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        debug_assert!(
            (MEM_START..MEM_END).contains(&pa.as_u64()),
            "{pa} is outside the kernel window"
        );
        let va = Self::window_address(pa) as *mut T;
        // SAFETY: the caller guarantees the window maps `pa` and that no
        // conflicting reference exists.
        unsafe { &mut *va }
    }
}
