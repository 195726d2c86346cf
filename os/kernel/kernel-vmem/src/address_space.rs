//! # Address Space (SV39, root-table rooted)
//!
//! A handle to one translation tree, identified by the physical frame of its
//! root table. Tables are reached through a [`PhysMapper`], and every table
//! node is a frame obtained from a [`FrameAlloc`].
//!
//! ## Highlights
//!
//! - [`AddressSpace::new_kernel`] / [`AddressSpace::new_user`] build a root
//!   that maps the kernel window.
//! - [`AddressSpace::map`] installs one 4 KiB leaf, creating missing
//!   intermediate tables.
//! - [`AddressSpace::lookup`] returns the leaf-level entry for an address.
//! - [`AddressSpace::translate`] resolves an address through leaves of any size.
//! - [`AddressSpace::unmap_range`], [`AddressSpace::clone_range`] and
//!   [`AddressSpace::free_range`] work on 2 MiB-aligned ranges.
//! - [`AddressSpace::activate`] loads `satp`.
//!
//! ## Ownership
//!
//! Frames referenced by user leaves are counted: every valid user leaf holds
//! one reference on its frame. Table frames hold exactly one reference, owned
//! by the entry pointing at them. Kernel-window entries are shared by all
//! spaces and never freed through a user space.

mod clone;
mod dump;
mod kernel;
mod unmap;
mod walk;

pub use crate::address_space::kernel::{is_kernel_range, is_user_range};
pub use crate::address_space::walk::Walk;
use crate::{FrameAlloc, Level, MapError, PageTable, PageTableEntry, PhysMapper, PteFlags, tlb};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_registers::satp::Satp;

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage<Size4K>,
    mapper: &'m M,
}

/// The root table frame of an [`AddressSpace`].
pub type RootPage = PhysicalPage<Size4K>;

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Wrap an existing root table.
    #[inline]
    #[must_use]
    pub const fn from_root(mapper: &'m M, root: RootPage) -> Self {
        Self { root, mapper }
    }

    #[inline]
    #[must_use]
    pub const fn root_page(&self) -> RootPage {
        self.root
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    /// `satp` value selecting this space in SV39 mode.
    #[inline]
    #[must_use]
    pub fn satp(&self) -> Satp {
        Satp::sv39(self.root.base(), 0)
    }

    /// Switch the hart to this address space.
    ///
    /// # Safety
    /// The kernel window must be mapped in this space and the currently
    /// executing code and stack must stay reachable through it.
    #[cfg(target_arch = "riscv64")]
    #[inline]
    pub unsafe fn activate(&self) {
        use kernel_registers::StoreRegisterUnsafe;
        unsafe { self.satp().store_unsafe() };
        tlb::flush_all();
    }

    /// Typed view of the table stored in `page`.
    ///
    /// # Safety
    /// `page` must hold a page table of this space and no other live
    /// reference to it may be used for writing while the result is alive.
    #[inline]
    pub(crate) unsafe fn table<'t>(&self, page: PhysicalPage<Size4K>) -> &'t mut PageTable {
        unsafe { self.mapper.phys_to_mut::<PageTable>(page.base()) }
    }

    /// Allocate a zeroed frame for a table at `level`.
    pub(crate) fn alloc_table<A: FrameAlloc>(
        alloc: &mut A,
        level: Level,
    ) -> Result<PhysicalPage<Size4K>, MapError> {
        alloc.alloc_frame().ok_or(MapError::OutOfMemory { level })
    }

    /// Walk the existing tables towards `va`.
    pub fn walk(&mut self, va: VirtualAddress) -> Walk<'_> {
        // SAFETY: `&mut self` serializes access to this tree.
        unsafe { self.walk_existing(va) }
    }

    /// Leaf-level entry for `va`, if all intermediate tables exist.
    ///
    /// The returned entry may be zero or hold a swap reference. Addresses
    /// covered by a larger leaf (the kernel window) yield `None`.
    pub fn lookup(&mut self, va: VirtualAddress) -> Option<&mut PageTableEntry> {
        // SAFETY: `&mut self` serializes access to this tree.
        match unsafe { self.walk_existing(va) } {
            Walk::Leaf(e) => Some(e),
            Walk::Huge(..) | Walk::Missing(_) => None,
        }
    }

    /// Leaf-level entry for `va`, creating intermediate tables as needed.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if a table frame cannot be allocated.
    ///
    /// # Panics
    /// If `va` lies inside a larger leaf.
    pub fn entry_or_create<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<&mut PageTableEntry, MapError> {
        // SAFETY: `&mut self` serializes access to this tree.
        match unsafe { self.walk_create(alloc, va) }? {
            Walk::Leaf(e) => Ok(e),
            Walk::Huge(level, _) => panic!("{va:?} is inside a {level:?}-level leaf"),
            Walk::Missing(_) => unreachable!("walk_create fills missing tables"),
        }
    }

    /// Map the 4 KiB page at `va` to `frame` with `flags` (`V` is implied).
    ///
    /// The reference on `frame` is taken over by the new entry; no count is
    /// changed here.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if an intermediate table cannot be allocated.
    ///
    /// # Panics
    /// If `va` is unaligned or already mapped (or holds a swap reference).
    pub fn map<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        frame: PhysicalPage<Size4K>,
        flags: PteFlags,
    ) -> Result<(), MapError> {
        assert!(va.is_aligned::<Size4K>(), "map: {va:?} is not page aligned");
        let entry = self.entry_or_create(alloc, va)?;
        assert!(
            entry.is_zero(),
            "map: {va:?} already holds {:#x}",
            entry.into_bits()
        );
        *entry = PageTableEntry::leaf(frame, flags);
        log::trace!("map {va:?} -> {frame} {flags:?}");
        tlb::flush_page(va);
        Ok(())
    }

    /// Resolve `va` to a physical address, honouring leaves at any level.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        // SAFETY: read-only use of the returned entry.
        match unsafe { self.walk_existing(va) } {
            Walk::Leaf(e) if e.valid() => {
                Some(PhysicalAddress::new(e.address().as_u64() | (va.as_u64() & 0xFFF)))
            }
            Walk::Huge(level, e) => {
                let mask = level.span() - 1;
                Some(PhysicalAddress::new(e.address().as_u64() | (va.as_u64() & mask)))
            }
            Walk::Leaf(_) | Walk::Missing(_) => None,
        }
    }
}
