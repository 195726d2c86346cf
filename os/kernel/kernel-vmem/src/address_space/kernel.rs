use crate::info::{KERNEL_ADDRESS, MEM_START};
use crate::{
    AddressSpace, FrameAlloc, Level, MapError, PageTableEntry, PhysMapper, PteFlags, RootPage,
};
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};

/// Exclusive end of the upper half of the SV39 range that is used.
const KERNEL_END: u64 = 1 << 38;

/// `[start, end)` lies entirely below the kernel window.
#[inline]
#[must_use]
pub const fn is_user_range(start: VirtualAddress, end: VirtualAddress) -> bool {
    start.as_u64() <= end.as_u64() && end.as_u64() <= KERNEL_ADDRESS
}

/// `[start, end)` lies entirely inside the kernel part of the address space.
#[inline]
#[must_use]
pub const fn is_kernel_range(start: VirtualAddress, end: VirtualAddress) -> bool {
    start.as_u64() >= KERNEL_ADDRESS
        && start.as_u64() <= end.as_u64()
        && end.as_u64() <= KERNEL_END
}

/// Root index of the first kernel entry.
const KERNEL_ROOT_INDEX: usize = Level::Root.index(VirtualAddress::new(KERNEL_ADDRESS));

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Build the kernel address space: a fresh root whose kernel-window entry
    /// maps RAM at `KERNEL_ADDRESS` as one global gigapage.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if the root frame cannot be allocated.
    pub fn new_kernel<A: FrameAlloc>(mapper: &'m M, alloc: &mut A) -> Result<Self, MapError> {
        let root = Self::alloc_table(alloc, Level::Root)?;
        // SAFETY: the root was just allocated and is not shared yet.
        Ok(unsafe { Self::init_kernel(mapper, root) })
    }

    /// Turn the zeroed table in `root` into the kernel address space.
    ///
    /// # Safety
    /// `root` must be a zeroed frame reachable through `mapper` and used by
    /// nothing else.
    #[must_use]
    pub unsafe fn init_kernel(mapper: &'m M, root: RootPage) -> Self {
        let space = Self::from_root(mapper, root);
        let window = PageTableEntry::leaf(
            PhysicalPage::from_ppn(MEM_START >> 12),
            PteFlags::KERNEL_RWX | PteFlags::GLOBAL | PteFlags::ACCESSED | PteFlags::DIRTY,
        );
        unsafe { space.table(root) }.set(KERNEL_ROOT_INDEX, window);
        log::debug!("kernel address space at {root}");
        space
    }

    /// Build a user address space sharing every kernel root entry of `kernel`.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if the root frame cannot be allocated.
    pub fn new_user<A: FrameAlloc>(
        kernel: &AddressSpace<'m, M>,
        alloc: &mut A,
    ) -> Result<Self, MapError> {
        let root = Self::alloc_table(alloc, Level::Root)?;
        let space = Self::from_root(kernel.mapper, root);
        // SAFETY: distinct frames; the new root is not shared yet.
        let (src, dst) = unsafe { (kernel.table(kernel.root), space.table(root)) };
        for (i, e) in src.iter().skip(KERNEL_ROOT_INDEX) {
            dst.set(i, e);
        }
        log::debug!("user address space at {root}");
        Ok(space)
    }

    /// Return the root frame to `alloc`.
    ///
    /// # Panics
    /// If any user mapping is still present.
    pub fn release<A: FrameAlloc>(self, alloc: &mut A) {
        // SAFETY: `self` is consumed; nothing else uses this tree.
        let root = unsafe { self.table(self.root) };
        assert!(
            root.iter().take(KERNEL_ROOT_INDEX).all(|(_, e)| e.is_zero()),
            "release: {} still has user mappings",
            self.root
        );
        alloc.free_frame(self.root);
    }
}
