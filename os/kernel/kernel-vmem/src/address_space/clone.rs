use crate::address_space::{is_kernel_range, is_user_range};
use crate::{AddressSpace, FrameAlloc, Level, MapError, PageTableEntry, PhysMapper, PteFlags, tlb};
use kernel_memory_addresses::{Size2M, VirtualAddress};

impl<M: PhysMapper> AddressSpace<'_, M> {
    /// Share `[from_va, from_va + length)` of `self` into `to` at `to_va`.
    ///
    /// The length is rounded up to whole 2 MiB blocks. Each leaf table of the
    /// destination is freshly allocated; only valid leaves are copied. In the
    /// user half every copy takes a reference on the frame and clears `W` in
    /// both entries, so the next store from either side faults and gets its
    /// own copy. Kernel-half entries are copied as they are.
    ///
    /// On error the blocks copied so far stay in `to`; tearing `to` down with
    /// [`free_range`](Self::free_range) undoes them.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if a destination table cannot be allocated.
    ///
    /// # Panics
    /// If an address is not 2 MiB aligned, the two ranges are not in the same
    /// half, or a destination leaf table or entry already exists.
    pub fn clone_range<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        from_va: VirtualAddress,
        to: &mut AddressSpace<'_, M>,
        to_va: VirtualAddress,
        length: u64,
    ) -> Result<(), MapError> {
        assert!(
            from_va.is_aligned::<Size2M>() && to_va.is_aligned::<Size2M>(),
            "clone_range: {from_va:?} / {to_va:?} not 2 MiB aligned"
        );
        assert_ne!(self.root, to.root, "clone_range: source and destination are the same space");
        let length = VirtualAddress::new(length).align_up::<Size2M>().as_u64();
        let from_end = VirtualAddress::new(from_va.as_u64() + length);
        let to_end = VirtualAddress::new(to_va.as_u64() + length);
        let user = is_user_range(from_va, from_end);
        assert!(
            (user && is_user_range(to_va, to_end))
                || (is_kernel_range(from_va, from_end) && is_kernel_range(to_va, to_end)),
            "clone_range: [{from_va:?}, {from_end:?}) and [{to_va:?}, {to_end:?}) are not in the same half"
        );

        let mut shared = 0usize;
        let mut offset = 0;
        while offset < length {
            let src_va = VirtualAddress::new(from_va.as_u64() + offset);
            let dst_va = VirtualAddress::new(to_va.as_u64() + offset);
            offset += Level::Middle.span();

            // SAFETY: `&mut self` serializes access to the source tree.
            let Some(src_leaf) = (unsafe { self.leaf_table(src_va) }) else {
                continue;
            };

            // SAFETY: `to` is borrowed mutably and is a different tree.
            let dst_slot = unsafe { to.walk_create_middle(alloc, dst_va) }?;
            assert!(
                dst_slot.is_zero(),
                "clone_range: leaf table {} already exists at {dst_va:?}",
                dst_slot.frame()
            );
            let dst_frame = Self::alloc_table(alloc, Level::Leaf)?;
            *dst_slot = PageTableEntry::table(dst_frame);
            let dst_leaf = unsafe { to.table(dst_frame) };

            for i in 0..kernel_memory_addresses::ENTRIES_PER_TABLE {
                let src = src_leaf.entry_mut(i);
                if !src.valid() {
                    continue;
                }
                assert!(
                    dst_leaf.get(i).is_zero(),
                    "clone_range: destination entry {i} of {dst_va:?} is mapped"
                );
                if user {
                    alloc.share_frame(src.frame());
                    src.remove(PteFlags::WRITE);
                }
                dst_leaf.set(i, *src);
                shared += 1;
            }
        }

        tlb::flush_all();
        log::debug!(
            "cloned {shared} pages [{from_va:?}, {from_end:?}) of {} to {to_va:?} of {}",
            self.root,
            to.root
        );
        Ok(())
    }

    /// Inverse of [`clone_range`](Self::clone_range) on a user range: every
    /// mapped frame loses one reference and the leaf tables are freed.
    ///
    /// # Panics
    /// As [`unmap_range`](Self::unmap_range); additionally if the range is
    /// not in the user half.
    pub fn free_range<A: FrameAlloc>(&mut self, alloc: &mut A, va: VirtualAddress, length: u64) {
        let end = VirtualAddress::new(va.as_u64() + length);
        assert!(
            is_user_range(va, end),
            "free_range: [{va:?}, {end:?}) is not a user range"
        );
        self.unmap_range(alloc, va, length);
    }

    /// The leaf table covering `va`, if the chain to it exists.
    ///
    /// # Safety
    /// See [`AddressSpace::table`].
    unsafe fn leaf_table<'t>(&self, va: VirtualAddress) -> Option<&'t mut crate::PageTable> {
        let root = unsafe { self.table(self.root) };
        let re = root.get(Level::Root.index(va));
        if !re.is_table() {
            return None;
        }
        let middle = unsafe { self.table(re.frame()) };
        let me = middle.get(Level::Middle.index(va));
        me.is_table().then(|| unsafe { self.table(me.frame()) })
    }

    /// The middle-level entry for `va`, creating the middle table if needed.
    ///
    /// # Safety
    /// See [`AddressSpace::table`].
    unsafe fn walk_create_middle<'t, A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<&'t mut PageTableEntry, MapError> {
        let root = unsafe { self.table(self.root) };
        let re = root.entry_mut(Level::Root.index(va));
        if re.is_zero() {
            *re = PageTableEntry::table(Self::alloc_table(alloc, Level::Middle)?);
        }
        assert!(re.is_table(), "clone_range: {va:?} is inside a gigapage");
        let middle = unsafe { self.table(re.frame()) };
        Ok(middle.entry_mut(Level::Middle.index(va)))
    }
}
