use crate::address_space::walk::next_boundary;
use crate::address_space::{is_kernel_range, is_user_range};
use crate::{AddressSpace, FrameAlloc, Level, PageTableEntry, PhysMapper, tlb};
use kernel_memory_addresses::{Size2M, VirtualAddress};

impl<M: PhysMapper> AddressSpace<'_, M> {
    /// Tear down `[va, va + length)`, rounded up to whole 2 MiB blocks.
    ///
    /// In the user half every mapped frame loses the reference held by its
    /// entry, and every leaf table in the range is freed. In the kernel half
    /// only the table nodes are reclaimed; mapped frames are left alone.
    /// Middle tables left empty are freed as well.
    ///
    /// Swap references are reported to `on_swapped` before their entry is
    /// cleared.
    ///
    /// # Panics
    /// If `va` is not 2 MiB aligned or the range spans both halves.
    pub fn unmap_range_with<A, F>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        length: u64,
        mut on_swapped: F,
    ) where
        A: FrameAlloc,
        F: FnMut(VirtualAddress, PageTableEntry),
    {
        assert!(
            va.is_aligned::<Size2M>(),
            "unmap_range: {va:?} is not 2 MiB aligned"
        );
        let end = VirtualAddress::new(va.as_u64() + length).align_up::<Size2M>();
        let user = is_user_range(va, end);
        assert!(
            user || is_kernel_range(va, end),
            "unmap_range: [{va:?}, {end:?}) crosses the user/kernel boundary"
        );

        let mut cursor = va.as_u64();
        while cursor < end.as_u64() {
            let addr = VirtualAddress::new(cursor);
            let root_index = Level::Root.index(addr);
            let block_end = next_boundary(cursor, Level::Root).min(end.as_u64());

            // SAFETY: `&mut self` serializes access to this tree.
            let root = unsafe { self.table(self.root) };
            let re = root.get(root_index);
            if !re.is_table() {
                cursor = block_end;
                continue;
            }

            let middle = unsafe { self.table(re.frame()) };
            while cursor < block_end {
                let addr = VirtualAddress::new(cursor);
                let i = Level::Middle.index(addr);
                let me = middle.get(i);
                cursor += Level::Middle.span();
                if me.is_zero() {
                    continue;
                }
                assert!(me.is_table(), "unmap_range: unexpected megapage at {addr:?}");

                if user {
                    let leaf = unsafe { self.table(me.frame()) };
                    for (j, e) in leaf.iter() {
                        let page = VirtualAddress::new(addr.as_u64() + ((j as u64) << 12));
                        if e.valid() {
                            alloc.free_frame(e.frame());
                        } else if e.is_swapped() {
                            on_swapped(page, e);
                        }
                    }
                }
                alloc.free_frame(me.frame());
                middle.set(i, PageTableEntry::zero());
            }

            if middle.is_empty() {
                alloc.free_frame(re.frame());
                root.set(root_index, PageTableEntry::zero());
            }
        }
        tlb::flush_all();
        log::debug!("unmapped [{va:?}, {end:?}) in {}", self.root);
    }

    /// [`unmap_range_with`](Self::unmap_range_with) for spaces without swap
    /// references; any that are found are leaked with a warning.
    pub fn unmap_range<A: FrameAlloc>(&mut self, alloc: &mut A, va: VirtualAddress, length: u64) {
        self.unmap_range_with(alloc, va, length, |page, e| {
            log::warn!("unmap_range: dropping swap reference {:#x} at {page:?}", e.ppn());
        });
    }
}
