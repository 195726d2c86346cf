use crate::swap::SwapSlot;
use kernel_memory_addresses::{PhysicalPage, Size4K};
use kernel_vmem::{FrameBytes, PhysMapper};

/// Failure reported by a [`BackingStore`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("slot {slot} is beyond the {capacity}-slot store")]
    OutOfRange { slot: usize, capacity: usize },
}

/// Synchronous page-granular storage addressed by slot.
pub trait BackingStore {
    /// Number of slots.
    fn capacity(&self) -> usize;

    /// Copy slot `slot` into `page`.
    ///
    /// # Errors
    /// Store specific.
    fn read(&mut self, slot: SwapSlot, page: &mut FrameBytes) -> Result<(), StoreError>;

    /// Copy `page` into slot `slot`.
    ///
    /// # Errors
    /// Store specific.
    fn write(&mut self, slot: SwapSlot, page: &FrameBytes) -> Result<(), StoreError>;
}

/// Swap "file" kept in RAM.
pub struct RamSwapStore<'a> {
    slots: &'a mut [FrameBytes],
}

impl<'a> RamSwapStore<'a> {
    #[must_use]
    pub const fn new(slots: &'a mut [FrameBytes]) -> Self {
        Self { slots }
    }

    /// Use `count` contiguous frames starting at `first` as the store.
    ///
    /// # Safety
    /// The frames must be allocated to the caller and stay reachable through
    /// `mapper` for `'a`.
    #[must_use]
    pub unsafe fn from_frames<M: PhysMapper>(
        mapper: &M,
        first: PhysicalPage<Size4K>,
        count: usize,
    ) -> Self {
        // SAFETY: the caller owns the frames.
        let slots = unsafe {
            core::slice::from_raw_parts_mut(
                core::ptr::from_mut(mapper.phys_to_mut::<FrameBytes>(first.base())),
                count,
            )
        };
        Self { slots }
    }

    fn slot(&mut self, slot: SwapSlot) -> Result<&mut FrameBytes, StoreError> {
        let capacity = self.slots.len();
        self.slots
            .get_mut(slot.index())
            .ok_or(StoreError::OutOfRange {
                slot: slot.index(),
                capacity,
            })
    }
}

impl BackingStore for RamSwapStore<'_> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn read(&mut self, slot: SwapSlot, page: &mut FrameBytes) -> Result<(), StoreError> {
        page.copy_from_slice(self.slot(slot)?);
        Ok(())
    }

    fn write(&mut self, slot: SwapSlot, page: &FrameBytes) -> Result<(), StoreError> {
        self.slot(slot)?.copy_from_slice(page);
        Ok(())
    }
}
