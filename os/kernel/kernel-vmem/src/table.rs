//! # Page Table Nodes and Levels

use crate::PageTableEntry;
use kernel_memory_addresses::{ENTRIES_PER_TABLE, VirtualAddress};

/// One page table node: 512 entries, exactly one 4 KiB frame.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

/// Position of a table in the three-level SV39 tree.
///
/// The level decides which nine bits of the virtual address index the table
/// and how much address space one of its entries spans.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Level {
    /// VA\[38:30], 1 GiB per entry.
    Root,
    /// VA\[29:21], 2 MiB per entry.
    Middle,
    /// VA\[20:12], 4 KiB per entry.
    Leaf,
}

impl Level {
    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::Root => 30,
            Self::Middle => 21,
            Self::Leaf => 12,
        }
    }

    /// Bytes mapped by one entry at this level.
    #[inline]
    #[must_use]
    pub const fn span(self) -> u64 {
        1 << self.shift()
    }

    #[inline]
    #[must_use]
    pub const fn index(self, va: VirtualAddress) -> usize {
        va.vpn(self.shift()) as usize
    }

    /// The level below, or `None` at the leaf level.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Root => Some(Self::Middle),
            Self::Middle => Some(Self::Leaf),
            Self::Leaf => None,
        }
    }
}

impl PageTable {
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [PageTableEntry::zero(); ENTRIES_PER_TABLE],
        }
    }

    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageTableEntry::zero());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: usize) -> PageTableEntry {
        self.entries[i]
    }

    #[inline]
    pub const fn set(&mut self, i: usize, e: PageTableEntry) {
        self.entries[i] = e;
    }

    #[inline]
    pub const fn entry_mut(&mut self, i: usize) -> &mut PageTableEntry {
        &mut self.entries[i]
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (usize, PageTableEntry)> + '_ {
        self.entries.iter().copied().enumerate()
    }

    /// `true` if every entry is zero.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.is_zero())
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}
