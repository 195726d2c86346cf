//! # Memory Bootstrap
//!
//! [`mem_init`] turns the boot memory map into a running [`FrameAllocator`]:
//!
//! 1. Find the RAM span and a home for the boot bitmap.
//! 2. Build [`BootMem`]: free RAM, mark firmware/MMIO used, reserve the bitmap,
//!    lend the spare tail of the kernel's reserved region.
//! 3. Allocate the frame descriptor arena and the kernel root table.
//! 4. Retire bootmem into the buddy zones, then reclaim the bitmap frames.

use crate::buddy::{Zone, ZoneKind};
use crate::frame::to_usize;
use crate::info::DMA_ZONE_SIZE;
use crate::{BootMem, FrameAllocator, FrameTable};
use kernel_info::boot::{BootMemoryMap, MemoryRegion, MemoryRegionKind};
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size4K};
use kernel_vmem::{PhysMapper, RootPage};
use log::info;

/// Error returned when the machine description cannot be turned into an
/// allocator.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum InitError {
    #[error("the boot memory map describes no RAM")]
    NoRam,
    #[error("no unreserved RAM for the {frames}-frame boot bitmap")]
    NoBitmapHome { frames: u64 },
    #[error("boot memory cannot hold the {what} ({frames} frames)")]
    MetadataTooLarge { what: &'static str, frames: u64 },
}

/// Result of [`mem_init`].
pub struct MemInit<'a, M: PhysMapper> {
    pub frames: FrameAllocator<'a, M>,
    /// Zeroed frame for the kernel's root page table.
    pub kernel_root: RootPage,
}

const fn pfn_down(pa: PhysicalAddress) -> u64 {
    pa.as_u64() >> 12
}

const fn pfn_up(pa: PhysicalAddress) -> u64 {
    pa.as_u64().div_ceil(Size4K::SIZE)
}

/// Lowest and highest RAM frame numbers (`[start, end)`).
fn ram_span(map: &BootMemoryMap<'_>) -> Option<(u64, u64)> {
    let (start, end) = map
        .of_kind(MemoryRegionKind::Ram)
        .map(|r| (pfn_up(r.start), pfn_down(r.end())))
        .filter(|(s, e)| s < e)
        .fold((u64::MAX, 0), |(lo, hi), (s, e)| (lo.min(s), hi.max(e)));
    (start < end).then_some((start, end))
}

fn overlaps_unusable<'m>(
    map: &BootMemoryMap<'m>,
    start: u64,
    end: u64,
) -> Option<&'m MemoryRegion> {
    map.regions.iter().find(|r| {
        r.kind != MemoryRegionKind::Ram && pfn_down(r.start) < end && pfn_up(r.end()) > start
    })
}

/// First run of `frames` frames inside one RAM region that no reserved or
/// MMIO region touches.
fn find_bitmap_home(map: &BootMemoryMap<'_>, frames: u64) -> Option<PhysicalPage<Size4K>> {
    for ram in map.of_kind(MemoryRegionKind::Ram) {
        let end = pfn_down(ram.end());
        let mut start = pfn_up(ram.start);
        while start + frames <= end {
            match overlaps_unusable(map, start, start + frames) {
                None => return Some(PhysicalPage::from_ppn(start)),
                Some(r) => start = start.max(pfn_up(r.end())),
            }
        }
    }
    None
}

/// Spare frames of the reserved RAM region that holds the kernel image.
fn boot_arena(map: &BootMemoryMap<'_>) -> Option<(u64, u64)> {
    let region = map
        .of_kind(MemoryRegionKind::Reserved)
        .find(|r| r.contains(map.kernel_end))?;
    let in_ram = map
        .of_kind(MemoryRegionKind::Ram)
        .any(|ram| ram.contains(region.start) && region.end() <= ram.end());
    let (start, end) = (pfn_up(map.kernel_end), pfn_down(region.end()));
    (in_ram && start < end).then_some((start, end))
}

/// DMA takes the first `DMA_ZONE_SIZE` bytes of RAM, or a quarter of it on
/// small machines; Normal gets the rest.
fn zone_layout(start: u64, end: u64) -> [Zone; 2] {
    let span = end - start;
    let dma_limit = DMA_ZONE_SIZE / Size4K::SIZE;
    let dma = if span <= dma_limit { span / 4 } else { dma_limit };
    [
        Zone::new(ZoneKind::Dma, start, start + dma),
        Zone::new(ZoneKind::Normal, start + dma, end),
    ]
}

/// Build the frame allocator from the firmware memory map.
///
/// # Errors
/// See [`InitError`].
///
/// # Safety
/// - Every `Ram` region that no `Reserved`/`Mmio` region covers must be
///   unused and reachable through `mapper` for `'a`.
/// - The spare tail of the reserved region containing `kernel_end` must be
///   unused as well.
/// - Must run once.
pub unsafe fn mem_init<'a, M: PhysMapper>(
    map: &BootMemoryMap<'_>,
    mapper: &'a M,
) -> Result<MemInit<'a, M>, InitError> {
    let (ram_start, ram_end) = ram_span(map).ok_or(InitError::NoRam)?;
    let frames = to_usize(ram_end - ram_start);

    let bitmap_frames = BootMem::<M>::storage_frames(frames);
    let home = find_bitmap_home(map, bitmap_frames).ok_or(InitError::NoBitmapHome {
        frames: bitmap_frames,
    })?;

    // SAFETY: `home` is unreserved RAM per the caller's contract.
    let mut boot = unsafe { BootMem::new(mapper, ram_start, frames, home) };
    for r in map.of_kind(MemoryRegionKind::Ram) {
        boot.free_range(pfn_up(r.start), pfn_down(r.end()));
    }
    for r in map.regions.iter().filter(|r| r.kind != MemoryRegionKind::Ram) {
        boot.mark_used(pfn_down(r.start), pfn_up(r.end()));
    }
    boot.reserve(home.ppn(), home.ppn() + bitmap_frames);
    if let Some((start, end)) = boot_arena(map) {
        boot.lend(start, end);
    }

    let table_frames = FrameTable::frames_for(frames);
    let arena = boot
        .alloc(table_frames, 1)
        .ok_or(InitError::MetadataTooLarge {
            what: "frame descriptors",
            frames: table_frames,
        })?;
    let kernel_root = boot.alloc(1, 1).ok_or(InitError::MetadataTooLarge {
        what: "kernel root table",
        frames: 1,
    })?;

    // SAFETY: the arena was just allocated from boot memory.
    let table = unsafe { FrameTable::new_in(mapper, arena, ram_start, frames) };
    let mut allocator = FrameAllocator::new(table, zone_layout(ram_start, ram_end), mapper);

    let storage = boot.retire(|start, end| allocator.add_free_range(start, end));
    allocator.add_free_range(storage.start, storage.end);

    let stats = allocator.stats();
    info!(
        "RAM {:#x}..{:#x}: {} frames, {} free",
        ram_start << 12,
        ram_end << 12,
        frames,
        stats.free_frames()
    );
    for z in &stats.zones {
        info!(
            "zone {:?} {}..{}: {} free",
            z.kind, z.start, z.end, z.free_pages
        );
    }

    Ok(MemInit {
        frames: allocator,
        kernel_root,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAM: MemoryRegion = MemoryRegion::from_range(0x8000_0000, 0x8800_0000, MemoryRegionKind::Ram);
    const FIRMWARE: MemoryRegion =
        MemoryRegion::from_range(0x8000_0000, 0x8200_0000, MemoryRegionKind::Reserved);

    #[test]
    fn span_and_bitmap_home() {
        let regions = [RAM, FIRMWARE];
        let map = BootMemoryMap::new(&regions, PhysicalAddress::new(0x8030_0000));
        assert_eq!(ram_span(&map), Some((0x80000, 0x88000)));
        assert_eq!(
            find_bitmap_home(&map, 1),
            Some(PhysicalPage::from_ppn(0x82000))
        );
        assert_eq!(boot_arena(&map), Some((0x80300, 0x82000)));
    }

    #[test]
    fn empty_map_has_no_ram() {
        let regions = [FIRMWARE];
        let map = BootMemoryMap::new(&regions, PhysicalAddress::new(0x8030_0000));
        assert_eq!(ram_span(&map), None);
    }

    #[test]
    fn kernel_outside_reserved_memory_gets_no_arena() {
        let regions = [RAM, FIRMWARE];
        let map = BootMemoryMap::new(&regions, PhysicalAddress::new(0x8400_0000));
        assert_eq!(boot_arena(&map), None);
    }

    #[test]
    fn zone_sizes() {
        let [dma, normal] = zone_layout(0x80000, 0x88000);
        assert_eq!((dma.start_pfn(), dma.end_pfn()), (0x80000, 0x81000));
        assert_eq!((normal.start_pfn(), normal.end_pfn()), (0x81000, 0x88000));

        // 8 MiB of RAM: DMA gets a quarter
        let [dma, normal] = zone_layout(0x80000, 0x80800);
        assert_eq!(dma.end_pfn(), 0x80200);
        assert_eq!(normal.start_pfn(), 0x80200);
    }
}
