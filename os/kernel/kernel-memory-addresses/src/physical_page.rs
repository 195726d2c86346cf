use crate::{MemoryAddressOffset, MemoryPage, PageSize, PhysicalAddress, Size4K};
use core::fmt;

/// Physical memory page base for size `S`.
///
/// For `S = Size4K` this is a page frame: the unit handed out by the frame
/// allocator and stored in SV39 leaf entries as a physical page number.
///
/// ### Invariants
/// - The low `S::SHIFT` bits of the base are always zero (page aligned).
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let frame = PhysicalPage::<Size4K>::from_ppn(0x82000);
/// assert_eq!(frame.base().as_u64(), 0x8200_0000);
/// assert_eq!(frame.next().ppn(), 0x82001);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage<S: PageSize>(MemoryPage<S>);

impl<S: PageSize> PhysicalPage<S> {
    #[inline]
    #[must_use]
    pub const fn from_addr(p: PhysicalAddress) -> Self {
        Self(MemoryPage::from_addr(p.0))
    }

    #[inline]
    #[must_use]
    pub const fn from_page(p: MemoryPage<S>) -> Self {
        Self(p)
    }

    /// Page containing `pa`. Same as [`from_addr`](Self::from_addr); reads better at call sites.
    #[inline]
    #[must_use]
    pub const fn containing_address(pa: PhysicalAddress) -> Self {
        Self::from_addr(pa)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(self.0.base())
    }

    #[inline]
    #[must_use]
    pub const fn join(self, off: MemoryAddressOffset<S>) -> PhysicalAddress {
        PhysicalAddress(self.0.join(off))
    }

    /// The page directly after this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(MemoryPage::from_number(self.0.number() + 1))
    }
}

impl PhysicalPage<Size4K> {
    /// Frame with physical page number `ppn`.
    #[inline]
    #[must_use]
    pub const fn from_ppn(ppn: u64) -> Self {
        Self(MemoryPage::from_number(ppn))
    }

    /// Physical page number (`base >> 12`), as stored in SV39 entries and `satp`.
    #[inline]
    #[must_use]
    pub const fn ppn(self) -> u64 {
        self.0.number()
    }
}

impl<S: PageSize> fmt::Display for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl<S: PageSize> fmt::Debug for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage<{}>({:#018X})", S::NAME, self.0.base().as_u64())
    }
}
