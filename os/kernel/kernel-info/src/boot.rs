//! # Boot Memory Description
//!
//! The firmware (device tree `/memory` nodes and reserved-memory entries) is
//! condensed into a short list of [`MemoryRegion`]s before the memory
//! subsystem starts.

use kernel_memory_addresses::PhysicalAddress;

/// What a physical range is used for.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MemoryRegionKind {
    /// General purpose RAM.
    Ram,
    /// Device registers; never handed to the frame allocator.
    Mmio,
    /// RAM owned by firmware or the kernel image.
    Reserved,
}

/// One `(address, length, kind)` entry of the boot memory map.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryRegion {
    pub start: PhysicalAddress,
    pub length: u64,
    pub kind: MemoryRegionKind,
}

impl MemoryRegion {
    #[must_use]
    pub const fn new(start: u64, length: u64, kind: MemoryRegionKind) -> Self {
        Self {
            start: PhysicalAddress::new(start),
            length,
            kind,
        }
    }

    /// Region spanning `[start, end)`.
    #[must_use]
    pub const fn from_range(start: u64, end: u64, kind: MemoryRegionKind) -> Self {
        Self::new(start, end - start, kind)
    }

    /// Exclusive end address.
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.start.as_u64() + self.length)
    }

    #[must_use]
    pub const fn contains(&self, pa: PhysicalAddress) -> bool {
        pa.as_u64() >= self.start.as_u64() && pa.as_u64() < self.end().as_u64()
    }
}

/// Everything `mem_init` needs to know about the machine.
#[derive(Debug, Copy, Clone)]
pub struct BootMemoryMap<'a> {
    /// Firmware-described regions; `Reserved` entries may overlap `Ram`.
    pub regions: &'a [MemoryRegion],
    /// First byte after the loaded kernel image.
    ///
    /// If this lies inside a `Reserved` region, the rest of that region is
    /// used for boot-time metadata that lives for the lifetime of the kernel.
    pub kernel_end: PhysicalAddress,
}

impl<'a> BootMemoryMap<'a> {
    #[must_use]
    pub const fn new(regions: &'a [MemoryRegion], kernel_end: PhysicalAddress) -> Self {
        Self {
            regions,
            kernel_end,
        }
    }

    /// Iterate over regions of one kind.
    pub fn of_kind(&self, kind: MemoryRegionKind) -> impl Iterator<Item = &'a MemoryRegion> {
        self.regions.iter().filter(move |r| r.kind == kind)
    }
}
