//! # Board Configuration and Boot Memory Interface
//!
//! Layout constants for the QEMU `virt` RISC-V board and the description of
//! physical memory handed to the memory subsystem at boot.
//!
//! ## Virtual Memory Architecture
//!
//! Every address space is split at [`KERNEL_ADDRESS`](memory::KERNEL_ADDRESS).
//! Below it lives the process image; above it the kernel sees all of RAM
//! through a fixed linear window.
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │          (unmapped)             │
//! START_CODE  ├─────────────────────────────────┤ 0x0001_0000
//!             │   code / rodata / data / heap   │
//!             │               ...               │
//!             │          stack (grows ↓)        │
//! START_STACK ├─────────────────────────────────┤ 0xBFFF_FFF0
//! KERNEL_ADDR ├─────────────────────────────────┤ 0xC000_0000
//!             │   Linear window over RAM        │
//!             │   VA = PA + LINEAR_OFFSET       │
//!             └─────────────────────────────────┘ 0xC800_0000
//! ```
//!
//! ## Physical Memory Layout
//!
//! ```text
//! MEM_START   ┌─────────────────────────────────┐ 0x8000_0000
//!             │   OpenSBI firmware              │
//! SBI_END     ├─────────────────────────────────┤ 0x8020_0000
//!             │   Kernel image, boot metadata   │
//! LOW_MEM     ├─────────────────────────────────┤ 0x8200_0000
//!             │   Frames managed by the buddy   │
//!             │   allocator                     │
//! MEM_END     └─────────────────────────────────┘ 0x8800_0000
//! ```
//!
//! Boot code reports memory as a list of [`MemoryRegion`](boot::MemoryRegion)s
//! wrapped in a [`BootMemoryMap`](boot::BootMemoryMap):
//!
//! ```rust
//! use kernel_info::boot::{BootMemoryMap, MemoryRegion, MemoryRegionKind};
//! use kernel_info::memory::{LOW_MEM, MEM_END, MEM_START, SBI_END};
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let regions = [
//!     MemoryRegion::from_range(MEM_START, MEM_END, MemoryRegionKind::Ram),
//!     MemoryRegion::from_range(MEM_START, LOW_MEM, MemoryRegionKind::Reserved),
//! ];
//! let map = BootMemoryMap::new(&regions, PhysicalAddress::new(SBI_END + 0x10_0000));
//! assert_eq!(map.of_kind(MemoryRegionKind::Ram).count(), 1);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;

#[cfg(test)]
mod tests {
    use super::boot::{MemoryRegion, MemoryRegionKind};
    use super::memory::*;
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn linear_window_round_trips() {
        assert_eq!(virt(MEM_START), KERNEL_ADDRESS);
        assert_eq!(phys(virt(0x8765_4321)), 0x8765_4321);
        assert_eq!(virt(MEM_END), 0xC800_0000);
    }

    #[test]
    fn swap_geometry() {
        assert_eq!(SWAP_PAGES, 512);
    }

    #[test]
    fn region_bounds() {
        let r = MemoryRegion::from_range(MEM_START, LOW_MEM, MemoryRegionKind::Reserved);
        assert_eq!(r.length, 0x200_0000);
        assert_eq!(r.end(), PhysicalAddress::new(LOW_MEM));
        assert!(r.contains(PhysicalAddress::new(MEM_START)));
        assert!(r.contains(PhysicalAddress::new(LOW_MEM - 1)));
        assert!(!r.contains(PhysicalAddress::new(LOW_MEM)));
    }
}
