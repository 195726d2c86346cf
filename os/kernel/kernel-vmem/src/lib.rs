//! # Virtual Memory Support
//!
//! SV39 paging for a RISC-V kernel.
//!
//! ## What you get
//! - An [`AddressSpace`] handle rooted at one root table, with mapping,
//!   translation, copy-on-write range cloning and range teardown.
//! - A [`PageTableEntry`] bitfield and [`PteFlags`] permission sets.
//! - A 4 KiB-aligned [`PageTable`] and the [`Level`] that drives the walk.
//! - A small allocator/mapper interface ([`FrameAlloc`], [`PhysMapper`]).
//!
//! ## SV39 Virtual Address → Physical Address Walk
//!
//! A 39-bit virtual address is divided into four fields:
//!
//! ```text
//! | 38‒30 | 29‒21  | 20‒12 | 11‒0   |
//! |  Root | Middle |  Leaf | Offset |
//! ```
//!
//! Each table holds 512 (2⁹) entries of 8 bytes. Bits 63‒39 must equal bit
//! 38, so the usable range is split into a low and a high half.
//!
//! ```text
//!  satp.PPN → Root ──► Middle ──► Leaf ──► 4 KiB page
//!              │         │
//!              │         └──► R|W|X set: 2 MiB megapage
//!              └────────────► R|W|X set: 1 GiB gigapage
//! ```
//!
//! ### Leaf vs. non-leaf entries
//!
//! - An entry with `V` set and `R`, `W`, `X` all clear points to the next table.
//! - An entry with `V` set and any of `R`, `W`, `X` is a leaf at whatever level
//!   it appears. The kernel window is a gigapage in the root table; process
//!   memory uses 4 KiB leaves only.
//!
//! ### Example
//!
//! ```rust
//! use kernel_memory_addresses::VirtualAddress;
//! use kernel_vmem::Level;
//!
//! let va = VirtualAddress::new(0x0040_2345);
//! assert_eq!(Level::Root.index(va), 0);
//! assert_eq!(Level::Middle.index(va), 2);
//! assert_eq!(Level::Leaf.index(va), 2);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
mod entry;
mod table;
pub mod tlb;

pub use crate::address_space::{AddressSpace, RootPage, Walk, is_kernel_range, is_user_range};
pub use crate::entry::{PageTableEntry, PteFlags};
pub use crate::table::{Level, PageTable};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Contents of one 4 KiB frame.
pub type FrameBytes = [u8; 4096];

/// Error returned when a mapping operation cannot obtain a table frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("out of memory allocating a {level:?} table")]
    OutOfMemory { level: Level },
}

/// Source of **physical** 4 KiB frames, with reference counting.
///
/// Page table nodes and mapped pages both come from here. A frame returned by
/// [`alloc_frame`](Self::alloc_frame) is zero-filled and carries one
/// reference. Each valid user leaf entry accounts for one reference on the
/// frame it maps.
pub trait FrameAlloc {
    /// Allocate one zeroed frame, or `None` when memory is exhausted.
    fn alloc_frame(&mut self) -> Option<PhysicalPage<Size4K>>;

    /// Drop one reference; the frame returns to the pool at zero.
    fn free_frame(&mut self, frame: PhysicalPage<Size4K>);

    /// Add one reference to an allocated frame.
    fn share_frame(&mut self, frame: PhysicalPage<Size4K>);

    /// Current number of references.
    fn ref_count(&self, frame: PhysicalPage<Size4K>) -> u32;
}

/// Converts physical addresses to usable references in the current address
/// space.
///
/// - **Kernel**: adds the linear-window offset.
/// - **Host tests**: indexes into a simulated RAM buffer.
///
/// # Safety
/// - `pa` must be mapped writable in the current address space for `&mut T`.
/// - Lifetime `'a` is not checked; the mapping must remain valid for `'a`.
/// - `T` must match the bytes at `pa`, and no other reference to them may be
///   used while the result is alive.
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// Fill `frame` with zeros.
    ///
    /// # Safety
    /// `frame` must not be in use by anything that expects its old contents.
    unsafe fn zero_frame(&self, frame: PhysicalPage<Size4K>) {
        unsafe { self.phys_to_mut::<FrameBytes>(frame.base()) }.fill(0);
    }

    /// Copy the contents of `from` into `to`.
    ///
    /// # Safety
    /// `to` must be exclusively owned by the caller; `from != to`.
    unsafe fn copy_frame(&self, from: PhysicalPage<Size4K>, to: PhysicalPage<Size4K>) {
        debug_assert_ne!(from, to);
        let src = unsafe { self.phys_to_mut::<FrameBytes>(from.base()) };
        let dst = unsafe { self.phys_to_mut::<FrameBytes>(to.base()) };
        dst.copy_from_slice(src);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::{KERNEL_ADDRESS, MEM_START};
    use core::ops::ControlFlow;
    use kernel_memory_addresses::VirtualAddress;
    use std::collections::HashMap;

    /// A 4 KiB-aligned raw frame.
    #[repr(align(4096))]
    #[derive(Clone)]
    struct Aligned4K([u8; 4096]);

    /// Simulated RAM starting at `MEM_START`.
    struct TestPhys {
        frames: Vec<Aligned4K>,
    }

    impl TestPhys {
        fn with_frames(n: usize) -> Self {
            Self {
                frames: vec![Aligned4K([0; 4096]); n],
            }
        }
    }

    impl PhysMapper for TestPhys {
        unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
            let off = pa.as_u64() - MEM_START;
            let idx = usize::try_from(off >> 12).unwrap();
            let ptr = self.frames[idx].0.as_ptr().cast_mut();
            unsafe { &mut *ptr.add((off & 0xFFF) as usize).cast::<T>() }
        }
    }

    /// Bump allocator with reference counts; freed frames are never reused.
    struct CountingAlloc<'p> {
        phys: &'p TestPhys,
        next: u64,
        end: u64,
        refs: HashMap<u64, u32>,
    }

    impl<'p> CountingAlloc<'p> {
        fn new(phys: &'p TestPhys) -> Self {
            Self {
                phys,
                next: MEM_START,
                end: MEM_START + ((phys.frames.len() as u64) << 12),
                refs: HashMap::new(),
            }
        }

        fn live(&self) -> usize {
            self.refs.len()
        }
    }

    impl FrameAlloc for CountingAlloc<'_> {
        fn alloc_frame(&mut self) -> Option<PhysicalPage<Size4K>> {
            if self.next >= self.end {
                return None;
            }
            let frame = PhysicalPage::from_addr(PhysicalAddress::new(self.next));
            self.next += 4096;
            unsafe { self.phys.zero_frame(frame) };
            self.refs.insert(frame.ppn(), 1);
            Some(frame)
        }

        fn free_frame(&mut self, frame: PhysicalPage<Size4K>) {
            let count = self.refs.get_mut(&frame.ppn()).expect("double free");
            *count -= 1;
            if *count == 0 {
                self.refs.remove(&frame.ppn());
            }
        }

        fn share_frame(&mut self, frame: PhysicalPage<Size4K>) {
            *self.refs.get_mut(&frame.ppn()).expect("share of free frame") += 1;
        }

        fn ref_count(&self, frame: PhysicalPage<Size4K>) -> u32 {
            self.refs.get(&frame.ppn()).copied().unwrap_or(0)
        }
    }

    fn va(v: u64) -> VirtualAddress {
        VirtualAddress::new(v)
    }

    #[test]
    fn map_creates_tables_and_leaf() {
        let phys = TestPhys::with_frames(16);
        let mut alloc = CountingAlloc::new(&phys);
        let mut space = AddressSpace::new_kernel(&phys, &mut alloc).unwrap();
        let frame = alloc.alloc_frame().unwrap();

        space
            .map(&mut alloc, va(0x40_2000), frame, PteFlags::USER_RW)
            .unwrap();

        // root + middle + leaf table + page
        assert_eq!(alloc.live(), 4);
        let e = *space.lookup(va(0x40_2000)).unwrap();
        assert!(e.is_leaf());
        assert_eq!(e.frame(), frame);
        assert_eq!(e.flags(), PteFlags::USER_RW | PteFlags::VALID);
        assert_eq!(
            space.translate(va(0x40_2abc)),
            Some(PhysicalAddress::new(frame.base().as_u64() + 0xabc))
        );
        assert_eq!(space.translate(va(0x40_3000)), None);
    }

    #[test]
    fn kernel_window_translates_linearly() {
        let phys = TestPhys::with_frames(4);
        let mut alloc = CountingAlloc::new(&phys);
        let kernel = AddressSpace::new_kernel(&phys, &mut alloc).unwrap();
        let user = AddressSpace::new_user(&kernel, &mut alloc).unwrap();

        for space in [&kernel, &user] {
            assert_eq!(
                space.translate(va(KERNEL_ADDRESS + 0x1234_5678)),
                Some(PhysicalAddress::new(MEM_START + 0x1234_5678))
            );
        }
        assert_eq!(user.translate(va(0x1_0000)), None);
    }

    #[test]
    #[should_panic(expected = "already holds")]
    fn remapping_is_a_bug() {
        let phys = TestPhys::with_frames(8);
        let mut alloc = CountingAlloc::new(&phys);
        let mut space = AddressSpace::new_kernel(&phys, &mut alloc).unwrap();
        let frame = alloc.alloc_frame().unwrap();
        space.map(&mut alloc, va(0x1_0000), frame, PteFlags::USER_R).unwrap();
        space.map(&mut alloc, va(0x1_0000), frame, PteFlags::USER_R).unwrap();
    }

    #[test]
    fn map_reports_exhaustion_with_level() {
        let phys = TestPhys::with_frames(2);
        let mut alloc = CountingAlloc::new(&phys);
        let mut space = AddressSpace::new_kernel(&phys, &mut alloc).unwrap();
        let frame = alloc.alloc_frame().unwrap();
        assert_eq!(
            space.map(&mut alloc, va(0x1_0000), frame, PteFlags::USER_R),
            Err(MapError::OutOfMemory {
                level: Level::Middle
            })
        );
    }

    #[test]
    fn unmap_range_releases_frames_and_tables() {
        let phys = TestPhys::with_frames(32);
        let mut alloc = CountingAlloc::new(&phys);
        let kernel = AddressSpace::new_kernel(&phys, &mut alloc).unwrap();
        let mut space = AddressSpace::new_user(&kernel, &mut alloc).unwrap();
        let base = alloc.live();

        for i in 0..4 {
            let f = alloc.alloc_frame().unwrap();
            space
                .map(&mut alloc, va(0x20_0000 + i * 0x1000), f, PteFlags::USER_RW)
                .unwrap();
        }
        assert_eq!(alloc.live(), base + 4 + 2);

        space.unmap_range(&mut alloc, va(0x20_0000), 0x1000);
        assert_eq!(alloc.live(), base);
        assert!(space.lookup(va(0x20_0000)).is_none());

        space.release(&mut alloc);
        assert_eq!(alloc.live(), base - 1);
    }

    #[test]
    #[should_panic(expected = "crosses the user/kernel boundary")]
    fn unmap_across_the_boundary_panics() {
        let phys = TestPhys::with_frames(4);
        let mut alloc = CountingAlloc::new(&phys);
        let mut space = AddressSpace::new_kernel(&phys, &mut alloc).unwrap();
        space.unmap_range(&mut alloc, va(KERNEL_ADDRESS - 0x20_0000), 0x40_0000);
    }

    #[test]
    fn clone_range_shares_read_only() {
        let phys = TestPhys::with_frames(32);
        let mut alloc = CountingAlloc::new(&phys);
        let kernel = AddressSpace::new_kernel(&phys, &mut alloc).unwrap();
        let mut parent = AddressSpace::new_user(&kernel, &mut alloc).unwrap();
        let mut child = AddressSpace::new_user(&kernel, &mut alloc).unwrap();

        let f = alloc.alloc_frame().unwrap();
        parent
            .map(&mut alloc, va(0x40_5000), f, PteFlags::USER_RWX)
            .unwrap();
        parent
            .clone_range(&mut alloc, va(0x40_0000), &mut child, va(0x40_0000), 0x20_0000)
            .unwrap();

        assert_eq!(alloc.ref_count(f), 2);
        for space in [&mut parent, &mut child] {
            let e = *space.lookup(va(0x40_5000)).unwrap();
            assert_eq!(e.frame(), f);
            assert_eq!(e.flags(), PteFlags::USER_RX | PteFlags::VALID);
        }

        child.free_range(&mut alloc, va(0x40_0000), 0x20_0000);
        assert_eq!(alloc.ref_count(f), 1);
        assert!(child.lookup(va(0x40_5000)).is_none());
        assert!(parent.lookup(va(0x40_5000)).unwrap().valid());
    }

    #[test]
    #[should_panic(expected = "already exists")]
    fn clone_into_populated_range_is_a_bug() {
        let phys = TestPhys::with_frames(32);
        let mut alloc = CountingAlloc::new(&phys);
        let kernel = AddressSpace::new_kernel(&phys, &mut alloc).unwrap();
        let mut parent = AddressSpace::new_user(&kernel, &mut alloc).unwrap();
        let mut child = AddressSpace::new_user(&kernel, &mut alloc).unwrap();
        let f = alloc.alloc_frame().unwrap();
        parent.map(&mut alloc, va(0x40_5000), f, PteFlags::USER_RW).unwrap();
        let g = alloc.alloc_frame().unwrap();
        child.map(&mut alloc, va(0x40_1000), g, PteFlags::USER_RW).unwrap();

        let _ = parent.clone_range(&mut alloc, va(0x40_0000), &mut child, va(0x40_0000), 0x20_0000);
    }

    #[test]
    fn kernel_unmap_keeps_mapped_frames() {
        let phys = TestPhys::with_frames(16);
        let mut alloc = CountingAlloc::new(&phys);
        let mut space = AddressSpace::new_kernel(&phys, &mut alloc).unwrap();
        let f = alloc.alloc_frame().unwrap();
        let base = alloc.live();
        let addr = 0x1_0000_3000;

        space.map(&mut alloc, va(addr), f, PteFlags::KERNEL_RW).unwrap();
        assert_eq!(alloc.live(), base + 2);

        space.unmap_range(&mut alloc, va(0x1_0000_0000), 0x20_0000);
        assert_eq!(alloc.live(), base);
        assert_eq!(alloc.ref_count(f), 1);
        assert!(space.lookup(va(addr)).is_none());
        assert!(space.translate(va(KERNEL_ADDRESS)).is_some());
    }

    #[test]
    fn scan_leaves_skips_missing_tables() {
        let phys = TestPhys::with_frames(32);
        let mut alloc = CountingAlloc::new(&phys);
        let mut space = AddressSpace::new_kernel(&phys, &mut alloc).unwrap();
        for addr in [0x1_0000, 0x7FE0_0000, 0x8000_1000] {
            let f = alloc.alloc_frame().unwrap();
            space.map(&mut alloc, va(addr), f, PteFlags::USER_R).unwrap();
        }

        let mut seen = Vec::new();
        let stop = space.scan_leaves(va(0), va(KERNEL_ADDRESS), |addr, _| {
            seen.push(addr.as_u64());
            ControlFlow::Continue(())
        });
        assert_eq!(stop, None);
        assert_eq!(seen, [0x1_0000, 0x7FE0_0000, 0x8000_1000]);

        let stop = space.scan_leaves(va(0x2_0000), va(KERNEL_ADDRESS), |_, _| ControlFlow::Break(()));
        assert_eq!(stop, Some(va(0x7FE0_0000)));
    }
}
