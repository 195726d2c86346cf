//! # Process Memory Management
//!
//! The part of the memory subsystem that deals with processes: their address
//! spaces, page faults and swapping. Everything is owned by one
//! [`MemorySubsystem`] value:
//!
//! ```text
//!                   MemorySubsystem
//!        ┌───────────────┼─────────────────┐
//!  FrameAllocator   kernel root      SwapManager
//!  (kernel-alloc)   (kernel-vmem)    slots + BackingStore
//!        ▲               ▲                 ▲
//!        └──── AddressSpace per process ───┘
//!                  (ProcessMemory)
//! ```
//!
//! The kernel uses it through the [`global`] singleton; tests build their own
//! instance over simulated RAM.
//!
//! ## Frame references
//!
//! The reference count of a frame equals the number of valid user leaf
//! entries pointing at it, across all address spaces. Mapping consumes the
//! reference the allocation returned, cloning adds one per shared page, and
//! unmapping, swapping out and copy on write each drop one.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod config;
mod error;
mod fault;
pub mod global;
mod process;
pub mod swap;

pub use crate::config::{MemoryConfig, SwapPolicy};
pub use crate::error::MemoryError;
pub use crate::fault::{FaultKind, Privilege};
pub use crate::process::{ProcessMemory, UserLayout};

use crate::info::{KERNEL_ADDRESS, START_CODE};
use crate::swap::{BackingStore, SwapManager, SwapSlot};
use core::ops::ControlFlow;
use kernel_alloc::{AllocError, FrameAllocator, MemInit};
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::{AddressSpace, Level, PhysMapper, PteFlags, RootPage, is_user_range};
use log::{debug, info};

pub(crate) use kernel_info::memory as info;

/// User half of every address space.
const USER_BASE: VirtualAddress = VirtualAddress::new(0);
const USER_SIZE: u64 = KERNEL_ADDRESS;

/// Frame allocator, kernel address space and swap, as one unit.
pub struct MemorySubsystem<'a, M: PhysMapper, S: BackingStore> {
    frames: FrameAllocator<'a, M>,
    kernel: RootPage,
    mapper: &'a M,
    swap: SwapManager<S>,
}

impl<'a, M: PhysMapper, S: BackingStore> MemorySubsystem<'a, M, S> {
    /// Finish initialization on top of [`kernel_alloc::mem_init`]: build the
    /// kernel address space in the reserved root frame and attach the swap
    /// store.
    #[must_use]
    pub fn new(init: MemInit<'a, M>, mapper: &'a M, store: S, config: MemoryConfig) -> Self {
        // SAFETY: `mem_init` hands out the root frame zeroed and unshared.
        let kernel = unsafe { AddressSpace::init_kernel(mapper, init.kernel_root) };
        let swap = SwapManager::new(store, config.swap_policy);
        info!(
            "mm: {} free frames, {} swap slots, {:?}",
            init.frames.free_frames(),
            swap.slots().capacity(),
            config.swap_policy
        );
        Self {
            frames: init.frames,
            kernel: kernel.root_page(),
            mapper,
            swap,
        }
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> &FrameAllocator<'a, M> {
        &self.frames
    }

    #[inline]
    pub const fn frames_mut(&mut self) -> &mut FrameAllocator<'a, M> {
        &mut self.frames
    }

    #[inline]
    #[must_use]
    pub const fn swap(&self) -> &SwapManager<S> {
        &self.swap
    }

    #[inline]
    #[must_use]
    pub const fn kernel_root(&self) -> RootPage {
        self.kernel
    }

    /// Handle on the address space rooted at `root`.
    ///
    /// The handle does not borrow `self`; callers must not keep it across a
    /// teardown of the same space.
    #[inline]
    #[must_use]
    pub const fn space(&self, root: RootPage) -> AddressSpace<'a, M> {
        AddressSpace::from_root(self.mapper, root)
    }

    /// # Errors
    /// [`AllocError::OutOfMemory`] if no frame is free.
    #[inline]
    pub fn alloc_page(&mut self) -> Result<PhysicalPage<Size4K>, AllocError> {
        self.frames.alloc_page()
    }

    /// # Errors
    /// [`AllocError::OutOfMemory`] if no block of `order` is free.
    #[inline]
    pub fn alloc_pages(&mut self, order: usize) -> Result<PhysicalPage<Size4K>, AllocError> {
        self.frames.alloc_pages(order)
    }

    #[inline]
    pub fn free_page(&mut self, frame: PhysicalPage<Size4K>) {
        self.frames.free_page(frame);
    }

    #[inline]
    pub fn free_pages(&mut self, frame: PhysicalPage<Size4K>, order: usize) {
        self.frames.free_pages(frame, order);
    }

    /// Map `frame` at `va` in the space rooted at `root`; the entry takes
    /// over the caller's reference.
    ///
    /// # Errors
    /// [`MemoryError::OutOfMemory`] if a table frame cannot be allocated.
    ///
    /// # Panics
    /// If `va` is already mapped.
    pub fn map_page(
        &mut self,
        root: RootPage,
        va: VirtualAddress,
        frame: PhysicalPage<Size4K>,
        flags: PteFlags,
    ) -> Result<(), MemoryError> {
        self.space(root).map(&mut self.frames, va, frame, flags)?;
        Ok(())
    }

    /// Unmap `[va, va + length)`, releasing frames and swap slots.
    ///
    /// # Panics
    /// See [`AddressSpace::unmap_range_with`].
    pub fn unmap_range(&mut self, root: RootPage, va: VirtualAddress, length: u64) {
        let mut space = self.space(root);
        space.unmap_range_with(&mut self.frames, va, length, |_, e| self.swap.discard(e));
    }

    /// Share `[from_va, from_va + length)` of one space copy-on-write into
    /// another.
    ///
    /// # Errors
    /// [`MemoryError::OutOfMemory`] if a table frame cannot be allocated.
    pub fn clone_range(
        &mut self,
        from: RootPage,
        from_va: VirtualAddress,
        to: RootPage,
        to_va: VirtualAddress,
        length: u64,
    ) -> Result<(), MemoryError> {
        let mut dst = self.space(to);
        self.space(from)
            .clone_range(&mut self.frames, from_va, &mut dst, to_va, length)?;
        Ok(())
    }

    /// Drop a range produced by [`clone_range`](Self::clone_range),
    /// including the swap slots of pages evicted since.
    ///
    /// # Panics
    /// If the range is not in the user half; see also
    /// [`AddressSpace::unmap_range_with`].
    pub fn free_range(&mut self, root: RootPage, va: VirtualAddress, length: u64) {
        let end = VirtualAddress::new(va.as_u64() + length);
        assert!(
            is_user_range(va, end),
            "free_range: [{va:?}, {end:?}) is not a user range"
        );
        self.unmap_range(root, va, length);
    }

    /// Switch translation to the space rooted at `root`.
    ///
    /// # Safety
    /// The kernel window of that space must map the running code and stack.
    #[cfg(target_arch = "riscv64")]
    pub unsafe fn activate(&self, root: RootPage) {
        unsafe { self.space(root).activate() };
    }

    /// A fresh user address space for a program laid out as `layout`.
    ///
    /// # Errors
    /// [`MemoryError::OutOfMemory`] if the root frame cannot be allocated.
    pub fn new_process(&mut self, layout: UserLayout) -> Result<ProcessMemory, MemoryError> {
        let kernel = self.space(self.kernel);
        let space = AddressSpace::new_user(&kernel, &mut self.frames)?;
        Ok(ProcessMemory::new(space.root_page(), layout))
    }

    /// Duplicate `parent` copy-on-write.
    ///
    /// Swapped-out pages of the parent are brought back first so that both
    /// processes share them as ordinary frames.
    ///
    /// # Errors
    /// [`MemoryError::OutOfMemory`]; the parent keeps whatever was swapped in
    /// and no child is left behind.
    pub fn fork(&mut self, parent: &ProcessMemory) -> Result<ProcessMemory, MemoryError> {
        self.swap_in_all(parent)?;
        let child = self.new_process(parent.layout)?;
        if let Err(e) = self.clone_range(parent.root, USER_BASE, child.root, USER_BASE, USER_SIZE) {
            self.destroy(child);
            return Err(e);
        }
        debug!("fork: {} -> {}", parent.root, child.root);
        Ok(ProcessMemory {
            clock_hand: parent.clock_hand,
            ..child
        })
    }

    fn swap_in_all(&mut self, process: &ProcessMemory) -> Result<(), MemoryError> {
        let mut space = self.space(process.root);
        let mut cursor = VirtualAddress::new(START_CODE);
        let end = VirtualAddress::new(KERNEL_ADDRESS);
        while let Some(va) = space.scan_leaves(cursor, end, |_, e| {
            if e.is_swapped() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }) {
            self.swap.swap_in(&mut space, &mut self.frames, va)?;
            cursor = VirtualAddress::new(va.as_u64() + Level::Leaf.span());
        }
        Ok(())
    }

    /// Release every page, swap slot and table of `process`.
    #[allow(clippy::needless_pass_by_value)]
    pub fn destroy(&mut self, process: ProcessMemory) {
        self.unmap_range(process.root, USER_BASE, USER_SIZE);
        self.space(process.root).release(&mut self.frames);
        debug!("destroyed address space {}", process.root);
    }

    /// Run the configured clock policy over `process`.
    pub fn select_victim(&mut self, process: &mut ProcessMemory) -> Option<VirtualAddress> {
        let mut space = self.space(process.root);
        self.swap
            .select_victim(&mut space, &self.frames, &mut process.clock_hand)
    }

    /// Move the page at `va` of `process` to swap.
    ///
    /// # Errors
    /// See [`SwapManager::swap_out`].
    pub fn swap_out(
        &mut self,
        process: &ProcessMemory,
        va: VirtualAddress,
    ) -> Result<SwapSlot, MemoryError> {
        let mut space = self.space(process.root);
        self.swap.swap_out(&mut space, &mut self.frames, va)
    }

    /// Bring the page at `va` of `process` back from swap.
    ///
    /// # Errors
    /// See [`SwapManager::swap_in`].
    pub fn swap_in(
        &mut self,
        process: &ProcessMemory,
        va: VirtualAddress,
    ) -> Result<PhysicalPage<Size4K>, MemoryError> {
        let mut space = self.space(process.root);
        self.swap.swap_in(&mut space, &mut self.frames, va)
    }

    /// Evict one page of `process` to make room.
    ///
    /// # Errors
    /// See [`SwapManager::swap_out`].
    ///
    /// # Panics
    /// If the process has no page that can be evicted.
    pub fn reclaim_one(
        &mut self,
        process: &mut ProcessMemory,
    ) -> Result<VirtualAddress, MemoryError> {
        let Some(va) = self.select_victim(process) else {
            panic!("reclaim: no page of {} can be swapped out", process.root);
        };
        self.swap_out(process, va)?;
        Ok(va)
    }
}
