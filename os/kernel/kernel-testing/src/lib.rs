//! # Simulated Physical Memory
//!
//! [`TestRam`] is a zeroed, 4 KiB-aligned host allocation that stands in for
//! a range of physical RAM. It implements [`PhysMapper`], so page tables,
//! frame descriptors and page contents all live in it exactly as they would
//! in the real machine's RAM.
//!
//! ```rust
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_testing::TestRam;
//!
//! let ram = TestRam::new(0x8000_0000, 16 * 4096);
//! ram.write(PhysicalAddress::new(0x8000_1000), b"hello");
//! assert_eq!(ram.read(PhysicalAddress::new(0x8000_1000), 5), b"hello");
//! ```

#![allow(unsafe_code)]

use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use std::ptr::NonNull;

use kernel_info::boot::{BootMemoryMap, MemoryRegion, MemoryRegionKind};
use kernel_info::memory::{LOW_MEM, MEM_END, MEM_START, SBI_END};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use kernel_vmem::PhysMapper;

/// The QEMU `virt` board as seen by `mem_init`: 128 MiB of RAM with the
/// first 32 MiB reserved for firmware and the kernel image.
pub const BOARD_REGIONS: [MemoryRegion; 2] = [
    MemoryRegion::from_range(MEM_START, MEM_END, MemoryRegionKind::Ram),
    MemoryRegion::from_range(MEM_START, LOW_MEM, MemoryRegionKind::Reserved),
];

/// End of a 1 MiB kernel image loaded right behind OpenSBI.
pub const BOARD_KERNEL_END: u64 = SBI_END + 0x10_0000;

/// Memory map for [`BOARD_REGIONS`].
#[must_use]
pub const fn board_map() -> BootMemoryMap<'static> {
    BootMemoryMap::new(&BOARD_REGIONS, PhysicalAddress::new(BOARD_KERNEL_END))
}

/// Host memory addressed by physical address.
pub struct TestRam {
    ptr: NonNull<u8>,
    base: u64,
    size: u64,
}

impl TestRam {
    /// Simulate `size` bytes of RAM starting at physical address `base`.
    ///
    /// # Panics
    /// If `base` or `size` is not 4 KiB aligned.
    #[must_use]
    pub fn new(base: u64, size: u64) -> Self {
        assert!(base.is_multiple_of(4096) && size.is_multiple_of(4096));
        let layout = Self::layout(size);
        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout)
        };
        Self { ptr, base, size }
    }

    /// RAM of the QEMU `virt` board, `[MEM_START, MEM_END)`.
    #[must_use]
    pub fn board() -> Self {
        Self::new(MEM_START, MEM_END - MEM_START)
    }

    fn layout(size: u64) -> Layout {
        let size = usize::try_from(size.max(4096)).expect("RAM size fits usize");
        Layout::from_size_align(size, 4096).expect("valid layout")
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base)
    }

    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base + self.size)
    }

    #[must_use]
    pub const fn contains(&self, pa: PhysicalAddress, len: u64) -> bool {
        pa.as_u64() >= self.base && pa.as_u64() + len <= self.base + self.size
    }

    fn ptr(&self, pa: PhysicalAddress, len: u64) -> *mut u8 {
        assert!(
            self.contains(pa, len),
            "{pa}+{len:#x} is outside simulated RAM {}..{}",
            self.base(),
            self.end()
        );
        let off = usize::try_from(pa.as_u64() - self.base).expect("offset fits usize");
        // SAFETY: bounds checked above.
        unsafe { self.ptr.as_ptr().add(off) }
    }

    /// Set every byte of RAM to `byte`.
    pub fn fill(&self, byte: u8) {
        let len = usize::try_from(self.size).expect("RAM size fits usize");
        // SAFETY: the allocation is `len` bytes long.
        unsafe { self.ptr.as_ptr().write_bytes(byte, len) };
    }

    /// Copy `len` bytes starting at `pa`.
    #[must_use]
    pub fn read(&self, pa: PhysicalAddress, len: usize) -> Vec<u8> {
        let src = self.ptr(pa, len as u64);
        // SAFETY: `ptr` checked the range.
        unsafe { std::slice::from_raw_parts(src, len) }.to_vec()
    }

    /// Store `data` at `pa`.
    pub fn write(&self, pa: PhysicalAddress, data: &[u8]) {
        let dst = self.ptr(pa, data.len() as u64);
        // SAFETY: `ptr` checked the range; `data` is host memory.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };
    }

    /// Contents of the frame at `pa`.
    #[must_use]
    pub fn read_frame(&self, frame: PhysicalPage<Size4K>) -> Vec<u8> {
        self.read(frame.base(), 4096)
    }

    #[must_use]
    pub fn frame_is_zero(&self, pa: PhysicalAddress) -> bool {
        self.read(pa, 4096).iter().all(|&b| b == 0)
    }
}

impl Drop for TestRam {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout.
        unsafe { dealloc(self.ptr.as_ptr(), Self::layout(self.size)) };
    }
}

impl PhysMapper for TestRam {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let ptr = self.ptr(pa, size_of::<T>() as u64).cast::<T>();
        debug_assert!(ptr.is_aligned(), "{pa} is misaligned for the requested type");
        // SAFETY: in bounds; aliasing is the caller's responsibility.
        unsafe { &mut *ptr }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_zeroed_and_round_trips() {
        let ram = TestRam::new(0x8000_0000, 4 * 4096);
        assert!(ram.frame_is_zero(PhysicalAddress::new(0x8000_3000)));
        ram.write(PhysicalAddress::new(0x8000_3FFC), &[1, 2, 3, 4]);
        assert_eq!(ram.read(PhysicalAddress::new(0x8000_3FFC), 4), [1, 2, 3, 4]);
    }

    #[test]
    fn mapper_views_share_storage() {
        let ram = TestRam::new(0x8000_0000, 2 * 4096);
        let word: &mut u64 = unsafe { ram.phys_to_mut(PhysicalAddress::new(0x8000_1008)) };
        *word = 0x1122_3344_5566_7788;
        assert_eq!(
            ram.read(PhysicalAddress::new(0x8000_1008), 8),
            0x1122_3344_5566_7788u64.to_ne_bytes()
        );
    }

    #[test]
    #[should_panic(expected = "outside simulated RAM")]
    fn out_of_range_access_panics() {
        let ram = TestRam::new(0x8000_0000, 4096);
        let _ = ram.read(PhysicalAddress::new(0x8000_1000), 1);
    }
}
