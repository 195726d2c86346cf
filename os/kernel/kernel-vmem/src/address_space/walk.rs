use crate::{AddressSpace, FrameAlloc, Level, MapError, PageTable, PageTableEntry, PhysMapper};
use core::convert::Infallible;
use core::ops::ControlFlow;
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};

/// Where a root-to-leaf walk stopped.
pub enum Walk<'t> {
    /// The leaf-level entry; it may be zero or carry a swap reference.
    Leaf(&'t mut PageTableEntry),
    /// A leaf above the leaf level maps the address.
    Huge(Level, &'t mut PageTableEntry),
    /// The table at this level does not exist.
    Missing(Level),
}

impl<M: PhysMapper> AddressSpace<'_, M> {
    /// Walk from the root towards the leaf level for `va`.
    ///
    /// Whenever a non-leaf entry is empty, `fill` is asked for a frame holding
    /// a zeroed table for the next level; `Ok(None)` ends the walk with
    /// [`Walk::Missing`].
    ///
    /// # Safety
    /// The returned entry aliases table memory; see [`AddressSpace::table`].
    unsafe fn walk_with<'t, E, F>(&self, va: VirtualAddress, mut fill: F) -> Result<Walk<'t>, E>
    where
        F: FnMut(Level) -> Result<Option<PhysicalPage<Size4K>>, E>,
    {
        let mut table: &'t mut PageTable = unsafe { self.table(self.root) };
        let mut level = Level::Root;
        loop {
            let entry = table.entry_mut(level.index(va));
            let Some(next) = level.next() else {
                return Ok(Walk::Leaf(entry));
            };
            if entry.is_leaf() {
                return Ok(Walk::Huge(level, entry));
            }
            if !entry.valid() {
                assert!(
                    entry.is_zero(),
                    "{va:?}: invalid {level:?} entry carries {:#x}",
                    entry.into_bits()
                );
                match fill(next)? {
                    Some(frame) => *entry = PageTableEntry::table(frame),
                    None => return Ok(Walk::Missing(next)),
                }
            }
            table = unsafe { self.table(entry.frame()) };
            level = next;
        }
    }

    /// Walk without creating tables.
    ///
    /// # Safety
    /// See [`AddressSpace::table`].
    pub(crate) unsafe fn walk_existing<'t>(&self, va: VirtualAddress) -> Walk<'t> {
        let Ok(walk) = unsafe { self.walk_with::<Infallible, _>(va, |_| Ok(None)) };
        walk
    }

    /// Walk, allocating every missing intermediate table.
    ///
    /// # Safety
    /// See [`AddressSpace::table`].
    pub(crate) unsafe fn walk_create<'t, A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<Walk<'t>, MapError> {
        unsafe {
            self.walk_with(va, |level| {
                let frame = Self::alloc_table(alloc, level)?;
                log::trace!("{va:?}: new {level:?} table at {frame}");
                Ok(Some(frame))
            })
        }
    }

    /// Visit every non-zero leaf-level entry in `[start, end)` in address order.
    ///
    /// Absent tables are skipped as a whole and larger leaves are not
    /// visited. Returns the address at which `f` broke off, if it did.
    pub fn scan_leaves<F>(
        &mut self,
        start: VirtualAddress,
        end: VirtualAddress,
        mut f: F,
    ) -> Option<VirtualAddress>
    where
        F: FnMut(VirtualAddress, &mut PageTableEntry) -> ControlFlow<()>,
    {
        let end = end.as_u64();
        let mut va = start.as_u64() & !(Level::Leaf.span() - 1);
        while va < end {
            let addr = VirtualAddress::new(va);
            // SAFETY: `&mut self` serializes access to this tree.
            let root = unsafe { self.table(self.root) };
            let re = root.get(Level::Root.index(addr));
            if !re.is_table() {
                va = next_boundary(va, Level::Root);
                continue;
            }
            let middle = unsafe { self.table(re.frame()) };
            let me = middle.get(Level::Middle.index(addr));
            if !me.is_table() {
                va = next_boundary(va, Level::Middle);
                continue;
            }
            let leaf = unsafe { self.table(me.frame()) };
            let entry = leaf.entry_mut(Level::Leaf.index(addr));
            if !entry.is_zero() && f(addr, entry).is_break() {
                return Some(addr);
            }
            va += Level::Leaf.span();
        }
        None
    }
}

/// First address of the next `level`-sized block after `va`.
#[inline]
pub(crate) const fn next_boundary(va: u64, level: Level) -> u64 {
    (va | (level.span() - 1)) + 1
}
