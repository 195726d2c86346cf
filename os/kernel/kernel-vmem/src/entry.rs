//! # SV39 Page Table Entry
//!
//! One 64-bit entry layout is shared by all three levels:
//!
//! | Bits   | Name  | Meaning |
//! |--------|-------|---------|
//! | 0      | `V`   | Entry is valid |
//! | 1      | `R`   | Readable |
//! | 2      | `W`   | Writable |
//! | 3      | `X`   | Executable |
//! | 4      | `U`   | Accessible from U-mode |
//! | 5      | `G`   | Global mapping (kept across ASID switches) |
//! | 6      | `A`   | Accessed |
//! | 7      | `D`   | Dirty |
//! | 8–9    | `RSW` | Reserved for software |
//! | 10–53  | `PPN` | Physical page number |
//! | 54–63  | -     | Reserved, must be zero |
//!
//! A valid entry with `R`, `W` and `X` all clear points to the next-level
//! table. A valid entry with any of them set is a leaf, at any level.
//!
//! An invalid entry is ignored by hardware, so the kernel is free to keep
//! other data in it; the swap manager stores a slot reference in the `PPN`
//! field of invalid leaf entries.

use bitfield_struct::bitfield;
use bitflags::bitflags;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

bitflags! {
    /// Permission and status bits of an entry (bits 0–7).
    ///
    /// The composite sets (`USER_RX`, `KERNEL_RWX`, ...) deliberately leave out
    /// [`VALID`](Self::VALID); [`PageTableEntry::leaf`] adds it.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct PteFlags: u64 {
        const VALID    = 1 << 0;
        const READ     = 1 << 1;
        const WRITE    = 1 << 2;
        const EXECUTE  = 1 << 3;
        const USER     = 1 << 4;
        const GLOBAL   = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY    = 1 << 7;

        const KERNEL_R   = Self::READ.bits();
        const KERNEL_RW  = Self::READ.bits() | Self::WRITE.bits();
        const KERNEL_RX  = Self::READ.bits() | Self::EXECUTE.bits();
        const KERNEL_RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();

        const USER_R   = Self::USER.bits() | Self::KERNEL_R.bits();
        const USER_RW  = Self::USER.bits() | Self::KERNEL_RW.bits();
        const USER_RX  = Self::USER.bits() | Self::KERNEL_RX.bits();
        const USER_RWX = Self::USER.bits() | Self::KERNEL_RWX.bits();
    }
}

impl PteFlags {
    /// Any of `R`, `W`, `X`.
    pub const LEAF: Self = Self::KERNEL_RWX;
}

/// Raw SV39 page table entry.
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct PageTableEntry {
    /// `V`, bit 0.
    pub valid: bool,
    /// `R`, bit 1.
    pub readable: bool,
    /// `W`, bit 2.
    pub writable: bool,
    /// `X`, bit 3.
    pub executable: bool,
    /// `U`, bit 4.
    ///
    /// Supervisor accesses to `U` pages fault unless `sstatus.SUM` is set.
    pub user: bool,
    /// `G`, bit 5.
    pub global: bool,
    /// `A`, bit 6.
    ///
    /// The kernel does not rely on hardware A/D updates: an access to an
    /// entry with `A` clear (or a store with `D` clear) may fault, and the
    /// fault handler sets the bit.
    pub accessed: bool,
    /// `D`, bit 7.
    pub dirty: bool,
    /// `RSW`, bits 8–9.
    #[bits(2)]
    pub rsw: u8,
    /// `PPN`, bits 10–53.
    #[bits(44)]
    pub ppn: u64,
    #[bits(10)]
    __: u16,
}

const FLAG_BITS: u64 = 0xFF;

impl PageTableEntry {
    /// The all-zero entry: nothing mapped, nothing stored.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new()
    }

    /// A leaf mapping `frame` with `flags` (plus `V`).
    #[inline]
    #[must_use]
    pub const fn leaf(frame: PhysicalPage<Size4K>, flags: PteFlags) -> Self {
        Self::from_bits(flags.union(PteFlags::VALID).bits()).with_ppn(frame.ppn())
    }

    /// A non-leaf entry pointing at the table in `frame`.
    #[inline]
    #[must_use]
    pub const fn table(frame: PhysicalPage<Size4K>) -> Self {
        Self::new().with_valid(true).with_ppn(frame.ppn())
    }

    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.into_bits() == 0
    }

    /// Valid and at least one of `R`/`W`/`X`.
    #[inline]
    #[must_use]
    pub const fn is_leaf(self) -> bool {
        self.valid() && self.flags().intersects(PteFlags::LEAF)
    }

    /// Valid pointer to a next-level table.
    #[inline]
    #[must_use]
    pub const fn is_table(self) -> bool {
        self.valid() && !self.flags().intersects(PteFlags::LEAF)
    }

    /// Invalid but not empty: the entry carries software data.
    #[inline]
    #[must_use]
    pub const fn is_swapped(self) -> bool {
        !self.valid() && !self.is_zero()
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.into_bits() & FLAG_BITS)
    }

    /// Replace bits 0–7, keeping `RSW` and `PPN`.
    #[inline]
    #[must_use]
    pub const fn with_flags(self, flags: PteFlags) -> Self {
        Self::from_bits((self.into_bits() & !FLAG_BITS) | flags.bits())
    }

    #[inline]
    pub const fn insert(&mut self, flags: PteFlags) {
        *self = self.with_flags(self.flags().union(flags));
    }

    #[inline]
    pub const fn remove(&mut self, flags: PteFlags) {
        *self = self.with_flags(self.flags().difference(flags));
    }

    /// The 4 KiB frame named by `PPN`.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_ppn(self.ppn())
    }

    #[inline]
    #[must_use]
    pub const fn address(self) -> PhysicalAddress {
        self.frame().base()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions_match_sv39() {
        assert_eq!(PageTableEntry::new().with_valid(true).into_bits(), 1);
        assert_eq!(PageTableEntry::new().with_dirty(true).into_bits(), 1 << 7);
        assert_eq!(PageTableEntry::new().with_rsw(0b11).into_bits(), 0b11 << 8);
        assert_eq!(PageTableEntry::new().with_ppn(1).into_bits(), 1 << 10);
    }

    #[test]
    fn leaf_encoding() {
        let frame = PhysicalPage::<Size4K>::from_ppn(0x87FFF);
        let e = PageTableEntry::leaf(frame, PteFlags::USER_RWX);
        assert_eq!(e.into_bits(), (0x87FFF << 10) | 0b1_1111);
        assert!(e.is_leaf());
        assert!(!e.is_table());
        assert_eq!(e.frame(), frame);
        assert_eq!(e.address(), PhysicalAddress::new(0x87FF_F000));
        assert_eq!(e.flags(), PteFlags::USER_RWX | PteFlags::VALID);
    }

    #[test]
    fn table_entry_has_no_permissions() {
        let e = PageTableEntry::table(PhysicalPage::from_ppn(0x80010));
        assert!(e.is_table());
        assert!(!e.is_leaf());
        assert_eq!(e.flags(), PteFlags::VALID);
    }

    #[test]
    fn flag_updates_keep_ppn() {
        let mut e = PageTableEntry::leaf(PhysicalPage::from_ppn(0x80123), PteFlags::USER_RW);
        e.remove(PteFlags::WRITE);
        e.insert(PteFlags::ACCESSED | PteFlags::DIRTY);
        assert_eq!(e.ppn(), 0x80123);
        assert!(!e.writable());
        assert!(e.accessed() && e.dirty());
    }

    #[test]
    fn swapped_entries_are_invalid_but_nonzero() {
        assert!(!PageTableEntry::zero().is_swapped());
        assert!(PageTableEntry::new().with_ppn(1).is_swapped());
        assert!(!PageTableEntry::leaf(PhysicalPage::from_ppn(1), PteFlags::USER_R).is_swapped());
    }
}
