//! # Physical and Virtual Address Types for SV39
//!
//! Strongly typed wrappers for raw memory addresses, page bases and page
//! frame numbers used by the RISC-V paging and frame allocation code.
//!
//! ## Overview
//!
//! | Concept | Generic | Description |
//! |----------|----------|-------------|
//! | [`MemoryAddress`] | – | A raw 64-bit address, either physical or virtual. |
//! | [`MemoryPage<S>`] | [`S: PageSize`](PageSize) | A page-aligned base address of a page of size `S`. |
//! | [`MemoryAddressOffset<S>`] | [`S: PageSize`](PageSize) | An offset within a page of size `S`. |
//!
//! These are wrapped to distinguish between the two address spaces:
//!
//! | Wrapper | Meaning |
//! |----------|----------|
//! | [`VirtualAddress`] / [`VirtualPage<S>`] | Addresses translated by the SV39 page tables. |
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | RAM or MMIO addresses as seen by the bus. |
//!
//! ## Page Sizes
//!
//! SV39 leaves may terminate at any of the three table levels:
//!
//! - [`Size4K`]: 4 KiB page, mapped by a leaf-table entry
//! - [`Size2M`]: 2 MiB megapage, mapped by a middle-table entry
//! - [`Size1G`]: 1 GiB gigapage, mapped by a root-table entry
//!
//! ## SV39 Virtual Address Split
//!
//! ```text
//! | 63‒39 (sign) | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |   = bit 38   | VPN2  | VPN1  | VPN0  | offset |
//! ```
//!
//! [`VirtualAddress::vpn`] extracts the 9-bit table index for a level shift and
//! [`VirtualAddress::is_sv39_canonical`] checks the sign extension.
//!
//! ## Frame Numbers
//!
//! The frame allocator indexes its descriptor arena by physical page number
//! (`PPN = PA >> 12`). [`PhysicalPage::<Size4K>::ppn`] and
//! [`PhysicalPage::from_ppn`] convert between the two views.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x8765_4321);
//! let (page, off) = pa.split::<Size4K>();
//! assert_eq!(page.ppn(), 0x87654);
//! assert_eq!(off.as_u64(), 0x321);
//! assert_eq!(PhysicalPage::<Size4K>::from_ppn(0x87654).join(off), pa);
//!
//! let va = VirtualAddress::new(0x0000_0000_4020_3000);
//! assert_eq!(va.vpn(Size1G::SHIFT), 1);
//! assert_eq!(va.vpn(Size2M::SHIFT), 1);
//! assert_eq!(va.vpn(Size4K::SHIFT), 3);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod memory_address;
mod memory_page;
mod page_size;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use memory_address::MemoryAddress;
pub use memory_page::{MemoryAddressOffset, MemoryPage};
pub use page_size::{PageSize, Size1G, Size2M, Size4K};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

/// Number of entries in one SV39 page table.
pub const ENTRIES_PER_TABLE: usize = 512;

/// Width of one virtual page number slice.
pub const VPN_BITS: u32 = 9;

/// Number of significant virtual address bits under SV39.
pub const SV39_VA_BITS: u32 = 39;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_join_round_trip_for_all_sizes() {
        let pa = PhysicalAddress::new(0x8123_4567);
        let (p4, o4) = pa.split::<Size4K>();
        let (p2, o2) = pa.split::<Size2M>();
        let (p1, o1) = pa.split::<Size1G>();
        assert_eq!(p4.join(o4), pa);
        assert_eq!(p2.join(o2), pa);
        assert_eq!(p1.join(o1), pa);
        assert_eq!(p2.base().as_u64(), 0x8120_0000);
        assert_eq!(p1.base().as_u64(), 0x8000_0000);
    }

    #[test]
    fn vpn_slices_match_sv39_layout() {
        let va = VirtualAddress::new((5 << 30) | (17 << 21) | (300 << 12) | 0xABC);
        assert_eq!(va.vpn(Size1G::SHIFT), 5);
        assert_eq!(va.vpn(Size2M::SHIFT), 17);
        assert_eq!(va.vpn(Size4K::SHIFT), 300);
        assert_eq!(va.offset::<Size4K>().as_u64(), 0xABC);
    }

    #[test]
    fn canonical_check_requires_sign_extension() {
        assert!(VirtualAddress::new(0x0000_003F_FFFF_F000).is_sv39_canonical());
        assert!(VirtualAddress::new(0xFFFF_FFC0_0000_0000).is_sv39_canonical());
        assert!(!VirtualAddress::new(0x0000_0040_0000_0000).is_sv39_canonical());
        assert!(!VirtualAddress::new(0x8000_0000_0000_0000).is_sv39_canonical());
    }

    #[test]
    fn ppn_conversions() {
        let page = PhysicalPage::<Size4K>::from_ppn(0x87FFF);
        assert_eq!(page.base().as_u64(), 0x87FF_F000);
        assert_eq!(page.ppn(), 0x87FFF);
        assert_eq!(PhysicalAddress::new(0x87FF_F123).frame_number(), 0x87FFF);
    }

    #[test]
    fn page_step_helpers() {
        let page = VirtualPage::<Size4K>::containing_address(VirtualAddress::new(0x20_0FFF));
        assert_eq!(page.base().as_u64(), 0x20_0000);
        assert_eq!(page.next().base().as_u64(), 0x20_1000);
        assert!(VirtualAddress::new(0x20_0000).is_aligned::<Size2M>());
        assert!(!VirtualAddress::new(0x20_1000).is_aligned::<Size2M>());
    }
}
