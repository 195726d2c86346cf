use crate::info::SWAP_PAGES;
use kernel_vmem::PageTableEntry;

/// Index of one page-sized slot in the backing store.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SwapSlot(u32);

impl SwapSlot {
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Value kept in the `PPN` field of a swapped-out entry.
    ///
    /// Slot `n` is stored as `n + 1` so that a zero entry never names a slot.
    #[inline]
    #[must_use]
    pub const fn to_ppn(self) -> u64 {
        self.0 as u64 + 1
    }

    #[inline]
    #[must_use]
    pub const fn from_ppn(ppn: u64) -> Option<Self> {
        if ppn == 0 || ppn > u32::MAX as u64 {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        let index = (ppn - 1) as u32;
        Some(Self(index))
    }

    /// The slot named by an invalid, non-zero leaf entry.
    #[inline]
    #[must_use]
    pub const fn from_entry(entry: PageTableEntry) -> Option<Self> {
        if entry.is_swapped() {
            Self::from_ppn(entry.ppn())
        } else {
            None
        }
    }
}

const WORDS: usize = SWAP_PAGES.div_ceil(64);

/// Occupancy bitmap of the swap store.
pub struct SwapSlots {
    map: [u64; WORDS],
    capacity: usize,
    used: usize,
}

impl SwapSlots {
    /// A map for `capacity` slots, all free.
    ///
    /// # Panics
    /// If `capacity` exceeds `SWAP_PAGES`.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        assert!(capacity <= SWAP_PAGES, "swap capacity exceeds SWAP_PAGES");
        Self {
            map: [0; WORDS],
            capacity,
            used: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }

    #[inline]
    #[must_use]
    pub const fn is_used(&self, slot: SwapSlot) -> bool {
        let i = slot.index();
        i < self.capacity && self.map[i / 64] & (1 << (i % 64)) != 0
    }

    /// Claim the lowest free slot.
    pub fn alloc(&mut self) -> Option<SwapSlot> {
        let i = (0..self.capacity).find(|&i| self.map[i / 64] & (1 << (i % 64)) == 0)?;
        self.map[i / 64] |= 1 << (i % 64);
        self.used += 1;
        #[allow(clippy::cast_possible_truncation)]
        let index = i as u32;
        Some(SwapSlot(index))
    }

    /// Release `slot`.
    ///
    /// # Panics
    /// If the slot is not in use.
    pub fn free(&mut self, slot: SwapSlot) {
        assert!(self.is_used(slot), "swap slot {} freed twice", slot.index());
        let i = slot.index();
        self.map[i / 64] &= !(1 << (i % 64));
        self.used -= 1;
    }
}
