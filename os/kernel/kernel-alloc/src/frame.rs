//! # Frame Descriptors
//!
//! Every RAM frame has one [`FrameDescriptor`], stored in an arena indexed
//! by frame number ([`FrameTable`]). The arena is allocated once at boot and
//! lives as long as the kernel.

use bitfield_struct::bitfield;
use kernel_memory_addresses::{PageSize, PhysicalPage, Size4K};
use kernel_vmem::PhysMapper;

/// Link value meaning "no neighbour".
pub(crate) const NIL: u32 = u32::MAX;

/// Per-frame state bits.
#[bitfield(u32)]
#[derive(Eq, PartialEq)]
pub struct FrameFlags {
    /// Firmware, MMIO or boot metadata; never allocated or freed.
    pub reserved: bool,
    /// First frame of a block sitting on a free list.
    pub free_head: bool,
    /// Block order: the free block for a free head, the allocation for a
    /// frame handed out by the allocator.
    #[bits(4)]
    pub order: u8,
    #[bits(26)]
    __: u32,
}

/// Bookkeeping for one physical frame.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct FrameDescriptor {
    /// Number of owners; 0 means free (or reserved).
    pub(crate) refcount: u32,
    pub(crate) flags: FrameFlags,
    /// Free-list neighbours, as table indices.
    pub(crate) next: u32,
    pub(crate) prev: u32,
}

impl FrameDescriptor {
    pub(crate) const RESERVED: Self = Self {
        refcount: 0,
        flags: FrameFlags::new().with_reserved(true),
        next: NIL,
        prev: NIL,
    };

    #[inline]
    #[must_use]
    pub const fn refcount(&self) -> u32 {
        self.refcount
    }

    #[inline]
    #[must_use]
    pub const fn flags(&self) -> FrameFlags {
        self.flags
    }
}

/// The descriptor arena for frames `base_pfn .. base_pfn + len`.
pub struct FrameTable<'a> {
    base_pfn: u64,
    slots: &'a mut [FrameDescriptor],
}

impl<'a> FrameTable<'a> {
    /// Frames needed for the descriptors of `frames` frames.
    #[must_use]
    pub const fn frames_for(frames: usize) -> u64 {
        ((frames * size_of::<FrameDescriptor>()) as u64).div_ceil(Size4K::SIZE)
    }

    /// Wrap existing storage; every descriptor is set to reserved.
    pub fn new(base_pfn: u64, slots: &'a mut [FrameDescriptor]) -> Self {
        slots.fill(FrameDescriptor::RESERVED);
        Self { base_pfn, slots }
    }

    /// Build the table in the [`frames_for`](Self::frames_for) frames at
    /// `arena`.
    ///
    /// # Safety
    /// The arena frames must be RAM reachable through `mapper` and used by
    /// nothing else for `'a`.
    #[must_use]
    pub unsafe fn new_in<M: PhysMapper>(
        mapper: &M,
        arena: PhysicalPage<Size4K>,
        base_pfn: u64,
        frames: usize,
    ) -> Self {
        // SAFETY: exclusive use of the arena is guaranteed by the caller.
        let slots = unsafe {
            core::slice::from_raw_parts_mut(
                core::ptr::from_mut(mapper.phys_to_mut::<FrameDescriptor>(arena.base())),
                frames,
            )
        };
        Self::new(base_pfn, slots)
    }

    #[inline]
    #[must_use]
    pub const fn base_pfn(&self) -> u64 {
        self.base_pfn
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, pfn: u64) -> bool {
        pfn >= self.base_pfn && pfn - self.base_pfn < self.slots.len() as u64
    }

    #[inline]
    pub(crate) const fn index(&self, pfn: u64) -> u32 {
        assert!(self.contains(pfn), "frame outside managed RAM");
        #[allow(clippy::cast_possible_truncation)]
        let i = (pfn - self.base_pfn) as u32;
        i
    }

    #[inline]
    pub(crate) const fn pfn(&self, index: u32) -> u64 {
        self.base_pfn + index as u64
    }

    /// Descriptor of frame number `pfn`.
    ///
    /// # Panics
    /// If `pfn` is not managed by this table.
    #[inline]
    #[must_use]
    pub fn get(&self, pfn: u64) -> &FrameDescriptor {
        &self.slots[self.index(pfn) as usize]
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, pfn: u64) -> &mut FrameDescriptor {
        let i = self.index(pfn) as usize;
        &mut self.slots[i]
    }

    #[inline]
    pub(crate) fn at_mut(&mut self, index: u32) -> &mut FrameDescriptor {
        &mut self.slots[index as usize]
    }
}

/// Frame number to slice index; the kernel only targets 64-bit harts.
#[inline]
#[allow(clippy::cast_possible_truncation)]
pub(crate) const fn to_usize(v: u64) -> usize {
    v as usize
}
