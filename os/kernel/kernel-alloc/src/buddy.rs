//! # Buddy Zones
//!
//! A [`Zone`] manages a contiguous range of frame numbers with one
//! [`FreeArea`] per order. Blocks of order `n` span `2^n` frames and start at
//! a frame number that is a multiple of `2^n`; the buddy of a block is found
//! by flipping bit `n` of its frame number.
//!
//! Free lists are threaded through the frame descriptors and kept sorted by
//! descending frame number, so allocations are served from the top of each
//! zone first.

use crate::frame::{FrameTable, NIL};
use crate::info::MAX_ORDER;

/// Number of buddy orders, `0..=MAX_ORDER`.
pub const ORDERS: usize = MAX_ORDER + 1;

/// Memory zones, in the order they are laid out in RAM.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ZoneKind {
    /// Low memory for devices with limited addressing.
    Dma = 0,
    Normal = 1,
}

/// Free blocks of one order.
#[derive(Debug, Copy, Clone)]
pub struct FreeArea {
    head: u32,
    nr_free: usize,
}

impl FreeArea {
    const EMPTY: Self = Self {
        head: NIL,
        nr_free: 0,
    };

    /// Number of free blocks.
    #[inline]
    #[must_use]
    pub const fn nr_free(&self) -> usize {
        self.nr_free
    }
}

/// A buddy allocator over frames `start_pfn .. end_pfn`.
pub struct Zone {
    kind: ZoneKind,
    start_pfn: u64,
    end_pfn: u64,
    areas: [FreeArea; ORDERS],
    free_pages: usize,
}

impl Zone {
    #[must_use]
    pub const fn new(kind: ZoneKind, start_pfn: u64, end_pfn: u64) -> Self {
        Self {
            kind,
            start_pfn,
            end_pfn,
            areas: [FreeArea::EMPTY; ORDERS],
            free_pages: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ZoneKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub const fn start_pfn(&self) -> u64 {
        self.start_pfn
    }

    #[inline]
    #[must_use]
    pub const fn end_pfn(&self) -> u64 {
        self.end_pfn
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, pfn: u64) -> bool {
        pfn >= self.start_pfn && pfn < self.end_pfn
    }

    /// Frames currently on the free lists.
    #[inline]
    #[must_use]
    pub const fn free_pages(&self) -> usize {
        self.free_pages
    }

    #[inline]
    #[must_use]
    pub const fn area(&self, order: usize) -> &FreeArea {
        &self.areas[order]
    }

    /// Free block heads of one order, highest first.
    pub fn blocks<'t>(&self, table: &'t FrameTable<'_>, order: usize) -> impl Iterator<Item = u64> + 't {
        let mut cur = self.areas[order].head;
        core::iter::from_fn(move || {
            if cur == NIL {
                return None;
            }
            let pfn = table.pfn(cur);
            cur = table.get(pfn).next;
            Some(pfn)
        })
    }

    /// Put the block at `pfn` on the free list of `order`, keeping the list
    /// sorted by descending frame number.
    fn push(&mut self, table: &mut FrameTable<'_>, pfn: u64, order: usize) {
        let idx = table.index(pfn);

        // Find the first entry below us; we go in front of it.
        let mut prev = NIL;
        let mut next = self.areas[order].head;
        while next != NIL && next > idx {
            prev = next;
            next = table.at_mut(next).next;
        }

        let d = table.at_mut(idx);
        d.prev = prev;
        d.next = next;
        d.flags = d.flags.with_free_head(true).with_order(order_bits(order));
        if next != NIL {
            table.at_mut(next).prev = idx;
        }
        if prev == NIL {
            self.areas[order].head = idx;
        } else {
            table.at_mut(prev).next = idx;
        }

        self.areas[order].nr_free += 1;
        self.free_pages += 1 << order;
    }

    /// Take the block at `pfn` off the free list of `order`.
    fn unlink(&mut self, table: &mut FrameTable<'_>, pfn: u64, order: usize) {
        let idx = table.index(pfn);
        let d = table.at_mut(idx);
        debug_assert!(d.flags.free_head() && usize::from(d.flags.order()) == order);
        let (prev, next) = (d.prev, d.next);
        d.prev = NIL;
        d.next = NIL;
        d.flags = d.flags.with_free_head(false);

        if prev == NIL {
            self.areas[order].head = next;
        } else {
            table.at_mut(prev).next = next;
        }
        if next != NIL {
            table.at_mut(next).prev = prev;
        }

        self.areas[order].nr_free -= 1;
        self.free_pages -= 1 << order;
    }

    /// Remove a block of `order` frames from the zone.
    ///
    /// Larger blocks are split; the upper half is kept for the caller and
    /// the lower half goes back on the next smaller list.
    pub(crate) fn take(&mut self, table: &mut FrameTable<'_>, order: usize) -> Option<u64> {
        let found = (order..ORDERS).find(|&o| self.areas[o].head != NIL)?;
        let mut pfn = table.pfn(self.areas[found].head);
        self.unlink(table, pfn, found);

        let mut cur = found;
        while cur > order {
            cur -= 1;
            self.push(table, pfn, cur);
            pfn += 1 << cur;
        }
        Some(pfn)
    }

    /// Return a block to the zone, merging it with free buddies.
    ///
    /// # Panics
    /// If the block is reserved, already free, or still referenced.
    pub(crate) fn give(&mut self, table: &mut FrameTable<'_>, mut pfn: u64, mut order: usize) {
        let d = table.get(pfn);
        assert!(
            d.refcount == 0,
            "releasing frame {:#x} with {} reference(s)",
            pfn << 12,
            d.refcount
        );
        assert!(
            !d.flags.free_head(),
            "releasing frame {:#x} which is already free",
            pfn << 12
        );
        assert!(
            self.contains(pfn) && self.contains(pfn + (1 << order) - 1),
            "block {:#x}/{order} is not inside the {:?} zone",
            pfn << 12,
            self.kind
        );

        while order < MAX_ORDER {
            let buddy = pfn ^ (1 << order);
            if !self.contains(buddy) || !self.contains(buddy + (1 << order) - 1) {
                break;
            }
            let b = table.get(buddy).flags;
            if !b.free_head() || usize::from(b.order()) != order {
                break;
            }
            self.unlink(table, buddy, order);
            pfn = pfn.min(buddy);
            order += 1;
        }
        self.push(table, pfn, order);
    }
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) const fn order_bits(order: usize) -> u8 {
    order as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrameDescriptor;

    const BASE: u64 = 0x80000;

    fn free_all(zone: &mut Zone, table: &mut FrameTable<'_>) {
        for pfn in zone.start_pfn()..zone.end_pfn() {
            let d = table.get_mut(pfn);
            d.flags = d.flags.with_reserved(false);
            zone.give(table, pfn, 0);
        }
    }

    #[test]
    fn frames_coalesce_into_max_blocks() {
        let mut slots = vec![FrameDescriptor::RESERVED; 4096];
        let mut table = FrameTable::new(BASE, &mut slots);
        let mut zone = Zone::new(ZoneKind::Normal, BASE, BASE + 4096);
        free_all(&mut zone, &mut table);

        assert_eq!(zone.free_pages(), 4096);
        assert_eq!(zone.area(MAX_ORDER).nr_free(), 2);
        assert!((0..MAX_ORDER).all(|o| zone.area(o).nr_free() == 0));
        let heads: Vec<_> = zone.blocks(&table, MAX_ORDER).collect();
        assert_eq!(heads, vec![BASE + 2048, BASE]);
    }

    #[test]
    fn take_splits_from_the_top() {
        let mut slots = vec![FrameDescriptor::RESERVED; 2048];
        let mut table = FrameTable::new(BASE, &mut slots);
        let mut zone = Zone::new(ZoneKind::Normal, BASE, BASE + 2048);
        free_all(&mut zone, &mut table);

        assert_eq!(zone.take(&mut table, 0), Some(BASE + 2047));
        assert_eq!(zone.take(&mut table, 0), Some(BASE + 2046));
        assert_eq!(zone.take(&mut table, 0), Some(BASE + 2045));
        assert_eq!(zone.take(&mut table, 2), Some(BASE + 2040));
        assert_eq!(zone.free_pages(), 2048 - 7);
        // one block left on each order 0..=10 except the ones consumed
        assert_eq!(zone.area(0).nr_free(), 1);
        assert_eq!(zone.area(1).nr_free(), 0);
        assert_eq!(zone.area(10).nr_free(), 1);
    }

    #[test]
    fn buddies_do_not_merge_across_zone_edges() {
        let mut slots = vec![FrameDescriptor::RESERVED; 8];
        let mut table = FrameTable::new(BASE, &mut slots);
        let mut zone = Zone::new(ZoneKind::Dma, BASE + 1, BASE + 3);
        free_all(&mut zone, &mut table);
        // 0x80001 and 0x80002 are not buddies of each other
        assert_eq!(zone.area(0).nr_free(), 2);
        assert_eq!(zone.blocks(&table, 0).collect::<Vec<_>>(), vec![BASE + 2, BASE + 1]);
    }

    #[test]
    #[should_panic(expected = "already free")]
    fn double_release_panics() {
        let mut slots = vec![FrameDescriptor::RESERVED; 4];
        let mut table = FrameTable::new(BASE, &mut slots);
        let mut zone = Zone::new(ZoneKind::Normal, BASE, BASE + 4);
        free_all(&mut zone, &mut table);
        zone.give(&mut table, BASE, 2);
    }
}
