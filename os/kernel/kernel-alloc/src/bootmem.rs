//! # Boot Memory Allocator
//!
//! A first-fit bitmap allocator that exists only while the buddy allocator
//! is being built. It hands out the frame descriptor array and the kernel
//! root table, then [`BootMem::retire`] releases every frame still free to
//! the buddy allocator and gives back the frames holding the bitmap itself.
//!
//! ```text
//!   new()          all frames used
//!   free_range()   RAM regions become available
//!   mark_used()    firmware / MMIO / kernel image
//!   reserve()      the bitmap's own frames
//!   lend()         spare tail of the kernel's reserved region
//!   alloc() ...    permanent boot metadata
//!   retire()       free runs → buddy, bitmap frames → caller
//! ```
//!
//! A *lent* range is reserved memory that may serve boot allocations but is
//! never handed to the buddy allocator: whatever the boot phase does not
//! use of it stays reserved.

use crate::Bitmap;
use crate::frame::to_usize;
use core::ops::Range;
use kernel_memory_addresses::{PageSize, PhysicalPage, Size4K};
use kernel_vmem::PhysMapper;

/// Bitmap allocator over the frame numbers `base_pfn .. base_pfn + len`.
pub struct BootMem<'a, M: PhysMapper> {
    bitmap: Bitmap<'a>,
    base_pfn: u64,
    storage: Range<u64>,
    lent: Range<u64>,
    mapper: &'a M,
}

impl<'a, M: PhysMapper> BootMem<'a, M> {
    /// Frames needed to hold a bitmap for `frames` frames.
    #[must_use]
    pub const fn storage_frames(frames: usize) -> u64 {
        ((Bitmap::words_for(frames) * 8) as u64).div_ceil(Size4K::SIZE)
    }

    /// Place a bitmap for `frames` frames starting at `storage`.
    ///
    /// Every frame starts out used. The storage frames are not reserved
    /// automatically; call [`reserve`](Self::reserve) once RAM is freed.
    ///
    /// # Safety
    /// The [`storage_frames`](Self::storage_frames) frames at `storage` must
    /// be RAM reachable through `mapper` and unused by anything else for
    /// `'a`.
    #[must_use]
    pub unsafe fn new(
        mapper: &'a M,
        base_pfn: u64,
        frames: usize,
        storage: PhysicalPage<Size4K>,
    ) -> Self {
        let words = Bitmap::words_for(frames);
        // SAFETY: the caller hands us exclusive use of the storage frames.
        let words = unsafe {
            core::slice::from_raw_parts_mut(
                core::ptr::from_mut(mapper.phys_to_mut::<u64>(storage.base())),
                words,
            )
        };
        let start = storage.ppn();
        Self {
            bitmap: Bitmap::new_used(words, frames),
            base_pfn,
            storage: start..start + Self::storage_frames(frames),
            lent: 0..0,
            mapper,
        }
    }

    /// Frame numbers covered by the bitmap.
    #[must_use]
    pub const fn span(&self) -> Range<u64> {
        self.base_pfn..self.base_pfn + self.bitmap.len() as u64
    }

    /// Frames currently free.
    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.bitmap.clear_runs().map(|(s, e)| e - s).sum()
    }

    /// Indices of `[start, end)` clipped to the span.
    fn clip(&self, start: u64, end: u64) -> Range<usize> {
        let span = self.span();
        let s = start.clamp(span.start, span.end) - self.base_pfn;
        let e = end.clamp(span.start, span.end) - self.base_pfn;
        to_usize(s)..to_usize(e.max(s))
    }

    /// Mark `[start, end)` available.
    ///
    /// # Panics
    /// If any of the frames is already free.
    pub fn free_range(&mut self, start: u64, end: u64) {
        for i in self.clip(start, end) {
            assert!(
                self.bitmap.is_set(i),
                "bootmem: double free of frame {:#x}",
                self.base_pfn + i as u64
            );
            self.bitmap.clear(i);
        }
    }

    /// Mark `[start, end)` used, whatever its current state.
    pub fn mark_used(&mut self, start: u64, end: u64) {
        for i in self.clip(start, end) {
            self.bitmap.set(i);
        }
    }

    /// Take `[start, end)` out of the pool.
    ///
    /// # Panics
    /// If any of the frames is already in use.
    pub fn reserve(&mut self, start: u64, end: u64) {
        for i in self.clip(start, end) {
            assert!(
                !self.bitmap.is_set(i),
                "bootmem: reserving frame {:#x} which is already in use",
                self.base_pfn + i as u64
            );
            self.bitmap.set(i);
        }
    }

    /// Make the reserved range `[start, end)` available for boot allocations
    /// without ever releasing it to the buddy allocator.
    ///
    /// # Panics
    /// If a range was lent already.
    pub fn lend(&mut self, start: u64, end: u64) {
        assert!(self.lent.is_empty(), "bootmem: only one range can be lent");
        let range = self.clip(start, end);
        for i in range.clone() {
            self.bitmap.clear(i);
        }
        self.lent = self.base_pfn + range.start as u64..self.base_pfn + range.end as u64;
    }

    /// Allocate `count` zero-filled frames whose first frame number is a
    /// multiple of `align` (a power of two).
    pub fn alloc(&mut self, count: u64, align: u64) -> Option<PhysicalPage<Size4K>> {
        // Alignment is by absolute frame number, not bitmap index.
        debug_assert!(align.is_power_of_two());
        let skew = to_usize(self.base_pfn.next_multiple_of(align) - self.base_pfn);
        let count = to_usize(count);
        let align = to_usize(align);

        let idx = if skew == 0 {
            self.bitmap.find_clear_run(count, align)?
        } else {
            // Search the aligned sub-grid by hand when the base is skewed.
            let mut i = skew;
            loop {
                if i + count > self.bitmap.len() {
                    return None;
                }
                if (i..i + count).all(|j| !self.bitmap.is_set(j)) {
                    break i;
                }
                i += align;
            }
        };

        for i in idx..idx + count {
            self.bitmap.set(i);
        }
        let first = self.base_pfn + idx as u64;
        for pfn in first..first + count as u64 {
            // SAFETY: the frame was free RAM and is now owned by the caller.
            unsafe { self.mapper.zero_frame(PhysicalPage::from_ppn(pfn)) };
        }
        log::trace!("bootmem: {count} frame(s) at {:#x}", first << 12);
        Some(PhysicalPage::from_ppn(first))
    }

    /// Return `count` frames starting at `frame`.
    ///
    /// # Panics
    /// On double free.
    pub fn free(&mut self, frame: PhysicalPage<Size4K>, count: u64) {
        self.free_range(frame.ppn(), frame.ppn() + count);
    }

    /// Hand every free frame outside the lent range to `release` as maximal
    /// `[start, end)` runs of frame numbers, and dissolve the allocator.
    ///
    /// Returns the frames that held the bitmap; they are unused from here on.
    pub fn retire(self, mut release: impl FnMut(u64, u64)) -> Range<u64> {
        let lent = self.lent.clone();
        for (s, e) in self.bitmap.clear_runs() {
            let start = self.base_pfn + s as u64;
            let end = self.base_pfn + e as u64;
            // Up to two pieces remain after cutting out the lent range.
            let below = start..end.min(lent.start);
            let above = start.max(lent.end)..end;
            if !below.is_empty() {
                release(below.start, below.end);
            }
            if !above.is_empty() {
                release(above.start, above.end);
            }
        }
        log::debug!(
            "bootmem retired; bitmap frames {:#x}..{:#x} reclaimed",
            self.storage.start << 12,
            self.storage.end << 12
        );
        self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_testing::TestRam;

    const BASE: u64 = 0x8000_0000 >> 12;

    fn boot(ram: &TestRam, frames: usize) -> BootMem<'_, TestRam> {
        let storage = PhysicalPage::from_ppn(BASE);
        let mut bm = unsafe { BootMem::new(ram, BASE, frames, storage) };
        bm.free_range(BASE, BASE + frames as u64);
        bm.reserve(BASE, BASE + BootMem::<TestRam>::storage_frames(frames));
        bm
    }

    #[test]
    fn bitmap_frames_are_reserved() {
        let ram = TestRam::new(0x8000_0000, 64 * 4096);
        let bm = boot(&ram, 64);
        assert_eq!(BootMem::<TestRam>::storage_frames(64), 1);
        assert_eq!(bm.free_frames(), 63);
    }

    #[test]
    fn alloc_is_first_fit_aligned_and_zeroed() {
        let ram = TestRam::new(0x8000_0000, 64 * 4096);
        ram.fill(0xAA);
        let mut bm = boot(&ram, 64);

        let a = bm.alloc(1, 1).unwrap();
        assert_eq!(a.ppn(), BASE + 1);
        let b = bm.alloc(4, 4).unwrap();
        assert_eq!(b.ppn(), BASE + 4);
        let c = bm.alloc(1, 1).unwrap();
        assert_eq!(c.ppn(), BASE + 2);

        assert!(ram.frame_is_zero(b.base()));
        assert!(ram.frame_is_zero(PhysicalPage::<Size4K>::from_ppn(BASE + 7).base()));
        assert!(!ram.frame_is_zero(PhysicalPage::<Size4K>::from_ppn(BASE + 8).base()));
    }

    #[test]
    fn bitmap_storage_rounds_up_to_frames() {
        assert_eq!(BootMem::<TestRam>::storage_frames(0x8000), 1);
        assert_eq!(BootMem::<TestRam>::storage_frames(0x8001), 2);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let ram = TestRam::new(0x8000_0000, 16 * 4096);
        let mut bm = boot(&ram, 16);
        let f = bm.alloc(1, 1).unwrap();
        bm.free(f, 1);
        bm.free(f, 1);
    }

    #[test]
    #[should_panic(expected = "already in use")]
    fn reserving_used_frame_panics() {
        let ram = TestRam::new(0x8000_0000, 16 * 4096);
        let mut bm = boot(&ram, 16);
        bm.reserve(BASE + 3, BASE + 5);
        bm.reserve(BASE + 4, BASE + 6);
    }

    #[test]
    fn retire_skips_lent_frames() {
        let ram = TestRam::new(0x8000_0000, 32 * 4096);
        let mut bm = boot(&ram, 32);
        bm.mark_used(BASE, BASE + 16);
        bm.lend(BASE + 8, BASE + 16);
        let meta = bm.alloc(2, 1).unwrap();
        assert_eq!(meta.ppn(), BASE + 8);

        let mut runs = Vec::new();
        let storage = bm.retire(|s, e| runs.push((s - BASE, e - BASE)));
        assert_eq!(runs, vec![(16, 32)]);
        assert_eq!(storage, BASE..BASE + 1);
    }
}
