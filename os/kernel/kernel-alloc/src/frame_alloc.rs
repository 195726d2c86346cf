//! # Physical Frame Allocator
//!
//! Zoned binary buddy allocator over the frame descriptor arena. Blocks are
//! zero-filled on allocation and carry one reference; [`free_pages`] drops a
//! reference and releases the block when the last one is gone.
//!
//! [`free_pages`]: FrameAllocator::free_pages

use crate::buddy::{ORDERS, Zone, ZoneKind, order_bits};
use crate::frame::FrameTable;
use crate::info::MAX_ORDER;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use kernel_vmem::{FrameAlloc, PhysMapper};
use log::{trace, warn};

/// Allocation flags: which zones a request may be served from.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum Gfp {
    /// Any memory; prefers the Normal zone and falls back to DMA.
    #[default]
    Normal,
    /// DMA zone only.
    Dma,
}

impl Gfp {
    /// Zones to try, in order.
    #[must_use]
    pub const fn zonelist(self) -> &'static [ZoneKind] {
        match self {
            Self::Normal => &[ZoneKind::Normal, ZoneKind::Dma],
            Self::Dma => &[ZoneKind::Dma],
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AllocError {
    #[error("out of memory: no free order-{order} block for a {zones:?} request")]
    OutOfMemory { order: usize, zones: Gfp },
}

/// Free-list summary of one zone.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ZoneStats {
    pub kind: ZoneKind,
    pub start: PhysicalAddress,
    pub end: PhysicalAddress,
    pub free_pages: usize,
    /// Free blocks per order.
    pub nr_free: [usize; ORDERS],
}

/// Free-list summary of all zones.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AllocStats {
    pub zones: [ZoneStats; 2],
}

impl AllocStats {
    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.zones.iter().map(|z| z.free_pages).sum()
    }
}

/// The kernel's physical page allocator.
pub struct FrameAllocator<'a, M: PhysMapper> {
    table: FrameTable<'a>,
    zones: [Zone; 2],
    mapper: &'a M,
}

impl<'a, M: PhysMapper> FrameAllocator<'a, M> {
    /// Create an allocator with empty free lists.
    ///
    /// `zones` is indexed by [`ZoneKind`]; every descriptor starts reserved
    /// until released through [`add_free_range`](Self::add_free_range).
    #[must_use]
    pub const fn new(table: FrameTable<'a>, zones: [Zone; 2], mapper: &'a M) -> Self {
        Self {
            table,
            zones,
            mapper,
        }
    }

    #[inline]
    #[must_use]
    pub const fn zone(&self, kind: ZoneKind) -> &Zone {
        &self.zones[kind as usize]
    }

    #[inline]
    #[must_use]
    pub const fn table(&self) -> &FrameTable<'a> {
        &self.table
    }

    fn zone_of(&self, pfn: u64) -> ZoneKind {
        match self.zones.iter().find(|z| z.contains(pfn)) {
            Some(z) => z.kind(),
            None => panic!("frame {:#x} belongs to no zone", pfn << 12),
        }
    }

    /// Turn the reserved frames `[start, end)` into free memory, as maximal
    /// aligned blocks that never straddle a zone boundary.
    pub fn add_free_range(&mut self, start: u64, end: u64) {
        for zi in 0..self.zones.len() {
            let lo = start.max(self.zones[zi].start_pfn());
            let hi = end.min(self.zones[zi].end_pfn());
            let mut pfn = lo;
            while pfn < hi {
                let order = max_order_at(pfn, hi - pfn);
                for f in pfn..pfn + (1 << order) {
                    let d = self.table.get_mut(f);
                    assert!(
                        d.flags.reserved(),
                        "frame {:#x} handed to the buddy allocator twice",
                        f << 12
                    );
                    d.flags = d.flags.with_reserved(false);
                }
                self.zones[zi].give(&mut self.table, pfn, order);
                pfn += 1 << order;
            }
        }
    }

    /// Allocate `2^order` contiguous, zeroed frames from the zones `gfp`
    /// allows.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] if no zone has a large enough block.
    ///
    /// # Panics
    /// If `order` exceeds [`MAX_ORDER`].
    pub fn alloc_pages_in(
        &mut self,
        gfp: Gfp,
        order: usize,
    ) -> Result<PhysicalPage<Size4K>, AllocError> {
        assert!(order <= MAX_ORDER, "alloc_pages: order {order} too large");
        for (i, &kind) in gfp.zonelist().iter().enumerate() {
            let Some(pfn) = self.zones[kind as usize].take(&mut self.table, order) else {
                continue;
            };
            if i > 0 {
                warn!("order-{order} allocation fell back to the {kind:?} zone");
            }

            let d = self.table.get_mut(pfn);
            d.refcount = 1;
            d.flags = d.flags.with_order(order_bits(order));

            for f in pfn..pfn + (1 << order) {
                // SAFETY: the block just left the free lists and is ours.
                unsafe { self.mapper.zero_frame(PhysicalPage::from_ppn(f)) };
            }
            trace!("alloc order-{order} at {:#x}", pfn << 12);
            return Ok(PhysicalPage::from_ppn(pfn));
        }
        Err(AllocError::OutOfMemory { order, zones: gfp })
    }

    /// [`alloc_pages_in`](Self::alloc_pages_in) with [`Gfp::Normal`].
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] if RAM is exhausted.
    #[inline]
    pub fn alloc_pages(&mut self, order: usize) -> Result<PhysicalPage<Size4K>, AllocError> {
        self.alloc_pages_in(Gfp::Normal, order)
    }

    /// One zeroed frame.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] if RAM is exhausted.
    #[inline]
    pub fn alloc_page(&mut self) -> Result<PhysicalPage<Size4K>, AllocError> {
        self.alloc_pages(0)
    }

    /// Drop one reference to the block at `frame`; at zero the block goes
    /// back to its zone and merges with free buddies.
    ///
    /// # Panics
    /// If `frame` is not aligned to `order`, is reserved, is already free,
    /// or was allocated with a different order.
    pub fn free_pages(&mut self, frame: PhysicalPage<Size4K>, order: usize) {
        let pfn = frame.ppn();
        assert!(
            order <= MAX_ORDER && pfn.is_multiple_of(1 << order),
            "free_pages: {frame} is not an order-{order} block"
        );
        let d = self.table.get_mut(pfn);
        assert!(!d.flags.reserved(), "free_pages: {frame} is reserved");
        assert!(d.refcount > 0, "free_pages: double free of {frame}");

        d.refcount -= 1;
        if d.refcount > 0 {
            return;
        }
        assert_eq!(
            usize::from(d.flags.order()),
            order,
            "free_pages: {frame} was allocated with a different order"
        );
        let zone = self.zone_of(pfn);
        self.zones[zone as usize].give(&mut self.table, pfn, order);
        trace!("free order-{order} at {frame}");
    }

    #[inline]
    pub fn free_page(&mut self, frame: PhysicalPage<Size4K>) {
        self.free_pages(frame, 0);
    }

    /// Add an owner to an allocated frame.
    ///
    /// # Panics
    /// If the frame is not allocated.
    pub fn get_page(&mut self, frame: PhysicalPage<Size4K>) {
        let d = self.table.get_mut(frame.ppn());
        assert!(d.refcount > 0, "get_page: {frame} is not allocated");
        d.refcount += 1;
    }

    #[inline]
    #[must_use]
    pub fn page_count(&self, frame: PhysicalPage<Size4K>) -> u32 {
        self.table.get(frame.ppn()).refcount
    }

    /// Frames available across all zones.
    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.zones.iter().map(Zone::free_pages).sum()
    }

    #[must_use]
    pub fn stats(&self) -> AllocStats {
        AllocStats {
            zones: self.zones.each_ref().map(|z| ZoneStats {
                kind: z.kind(),
                start: PhysicalAddress::new(z.start_pfn() << 12),
                end: PhysicalAddress::new(z.end_pfn() << 12),
                free_pages: z.free_pages(),
                nr_free: core::array::from_fn(|o| z.area(o).nr_free()),
            }),
        }
    }

    /// Free block heads of `order` in `kind`, highest first.
    pub fn free_blocks(&self, kind: ZoneKind, order: usize) -> impl Iterator<Item = u64> + '_ {
        self.zones[kind as usize].blocks(&self.table, order)
    }
}

/// Largest order for a block starting at `pfn` that fits in `avail` frames.
const fn max_order_at(pfn: u64, avail: u64) -> usize {
    let align = if pfn == 0 { 64 } else { pfn.trailing_zeros() };
    let fit = 63 - avail.leading_zeros();
    let order = if align < fit { align } else { fit };
    if (order as usize) < MAX_ORDER {
        order as usize
    } else {
        MAX_ORDER
    }
}

impl<M: PhysMapper> FrameAlloc for FrameAllocator<'_, M> {
    fn alloc_frame(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.alloc_page().ok()
    }

    fn free_frame(&mut self, frame: PhysicalPage<Size4K>) {
        self.free_page(frame);
    }

    fn share_frame(&mut self, frame: PhysicalPage<Size4K>) {
        self.get_page(frame);
    }

    fn ref_count(&self, frame: PhysicalPage<Size4K>) -> u32 {
        self.page_count(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_orders_follow_alignment_and_length() {
        assert_eq!(max_order_at(0x82001, 100), 0);
        assert_eq!(max_order_at(0x82002, 100), 1);
        assert_eq!(max_order_at(0x82000, 3), 1);
        assert_eq!(max_order_at(0x82000, 0x6000), MAX_ORDER);
        assert_eq!(max_order_at(0, 1), 0);
    }

    #[test]
    fn normal_falls_back_to_dma_only() {
        assert_eq!(Gfp::Normal.zonelist(), &[ZoneKind::Normal, ZoneKind::Dma]);
        assert_eq!(Gfp::Dma.zonelist(), &[ZoneKind::Dma]);
    }
}
