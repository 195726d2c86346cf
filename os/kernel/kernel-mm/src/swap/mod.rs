//! # Swap Manager
//!
//! Moves private user pages between RAM and a [`BackingStore`].
//!
//! A swapped-out page keeps its leaf entry with `V` cleared; all other flag
//! bits are preserved and the `PPN` field names the slot
//! ([`SwapSlot::to_ppn`]). Swapping back in allocates a fresh frame, restores
//! the content, points the entry at the frame and sets `V` again.

mod clock;
mod slots;
mod store;

pub use crate::swap::clock::select_victim;
pub use crate::swap::slots::{SwapSlot, SwapSlots};
pub use crate::swap::store::{BackingStore, RamSwapStore, StoreError};

use crate::config::SwapPolicy;
use crate::error::MemoryError;
use crate::info::SWAP_PAGES;
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::{AddressSpace, FrameAlloc, FrameBytes, PageTableEntry, PhysMapper, tlb};
use log::debug;

/// Slot bookkeeping plus the store behind it.
pub struct SwapManager<S: BackingStore> {
    slots: SwapSlots,
    store: S,
    policy: SwapPolicy,
}

const fn page_of(va: VirtualAddress) -> VirtualAddress {
    VirtualAddress::new(va.as_u64() & !0xFFF)
}

impl<S: BackingStore> SwapManager<S> {
    /// Use `store`, capped at `SWAP_PAGES` slots.
    #[must_use]
    pub fn new(store: S, policy: SwapPolicy) -> Self {
        let capacity = store.capacity().min(SWAP_PAGES);
        Self {
            slots: SwapSlots::new(capacity),
            store,
            policy,
        }
    }

    #[inline]
    #[must_use]
    pub const fn slots(&self) -> &SwapSlots {
        &self.slots
    }

    #[inline]
    #[must_use]
    pub const fn policy(&self) -> SwapPolicy {
        self.policy
    }

    /// Run the configured policy over `space`.
    pub fn select_victim<M: PhysMapper, A: FrameAlloc>(
        &self,
        space: &mut AddressSpace<'_, M>,
        frames: &A,
        hand: &mut VirtualAddress,
    ) -> Option<VirtualAddress> {
        select_victim(space, frames, hand, self.policy)
    }

    /// Write the page at `va` to a free slot and give its frame back.
    ///
    /// # Errors
    /// [`MemoryError::SwapExhausted`] if no slot is free; store failures are
    /// passed through. The mapping is unchanged on error.
    ///
    /// # Panics
    /// If `va` is not a resident user page or its frame is shared.
    pub fn swap_out<M: PhysMapper, A: FrameAlloc>(
        &mut self,
        space: &mut AddressSpace<'_, M>,
        frames: &mut A,
        va: VirtualAddress,
    ) -> Result<SwapSlot, MemoryError> {
        let va = page_of(va);
        let mapper = space.mapper();
        let Some(entry) = space.lookup(va).filter(|e| e.valid() && e.user()) else {
            panic!("swap_out: {va} is not a resident user page");
        };
        let frame = entry.frame();
        assert_eq!(
            frames.ref_count(frame),
            1,
            "swap_out: {va} maps shared frame {frame}"
        );

        let slot = self.slots.alloc().ok_or(MemoryError::SwapExhausted)?;
        // SAFETY: the frame is mapped by this entry only and stays allocated
        // until the copy is done.
        let bytes = unsafe { mapper.phys_to_mut::<FrameBytes>(frame.base()) };
        if let Err(e) = self.store.write(slot, bytes) {
            self.slots.free(slot);
            return Err(e.into());
        }

        *entry = entry.with_valid(false).with_ppn(slot.to_ppn());
        tlb::flush_page(va);
        frames.free_frame(frame);
        debug!("swapped out {va} ({frame}) to slot {}", slot.index());
        Ok(slot)
    }

    /// Bring the page at `va` back from its slot.
    ///
    /// # Errors
    /// [`MemoryError::OutOfMemory`] if no frame is available; store failures
    /// are passed through. The entry still names its slot on error.
    ///
    /// # Panics
    /// If `va` is not swapped out.
    pub fn swap_in<M: PhysMapper, A: FrameAlloc>(
        &mut self,
        space: &mut AddressSpace<'_, M>,
        frames: &mut A,
        va: VirtualAddress,
    ) -> Result<PhysicalPage<Size4K>, MemoryError> {
        let va = page_of(va);
        let mapper = space.mapper();
        let Some(entry) = space.lookup(va) else {
            panic!("swap_in: {va} has no page table");
        };
        let Some(slot) = SwapSlot::from_entry(*entry) else {
            panic!("swap_in: {va} is not swapped out ({:#x})", entry.into_bits());
        };
        assert!(
            self.slots.is_used(slot),
            "swap_in: {va} names free slot {}",
            slot.index()
        );

        let frame = frames.alloc_frame().ok_or(MemoryError::OutOfMemory)?;
        // SAFETY: the frame was just allocated.
        let bytes = unsafe { mapper.phys_to_mut::<FrameBytes>(frame.base()) };
        if let Err(e) = self.store.read(slot, bytes) {
            frames.free_frame(frame);
            return Err(e.into());
        }

        *entry = entry.with_ppn(frame.ppn()).with_valid(true);
        self.slots.free(slot);
        tlb::flush_page(va);
        debug!("swapped in {va} from slot {} to {frame}", slot.index());
        Ok(frame)
    }

    /// Drop the slot held by a swapped-out entry that is being unmapped.
    ///
    /// # Panics
    /// If the entry does not name a slot in use.
    pub fn discard(&mut self, entry: PageTableEntry) {
        let Some(slot) = SwapSlot::from_entry(entry) else {
            panic!("discard: {:#x} is not a swap entry", entry.into_bits());
        };
        self.slots.free(slot);
    }
}
