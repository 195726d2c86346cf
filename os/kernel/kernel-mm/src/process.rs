//! # Process Memory
//!
//! User address space layout (growing downwards in this picture):
//!
//! ```text
//! START_STACK  0xBFFF_FFF0 ┌────────────────────┐
//!                          │ stack   ↓          │  demand-zero
//!                          │                    │
//!                          │ heap    ↑          │  demand-zero
//! end_data                 ├────────────────────┤
//!                          │ data / bss         │  copy-on-write
//! start_data               ├────────────────────┤
//!                          │ code, rodata       │  never writable
//! start_code   0x0001_0000 └────────────────────┘
//! ```

use crate::info::{KERNEL_ADDRESS, START_CODE, START_STACK};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::RootPage;

/// Segment boundaries of a user program.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UserLayout {
    pub start_code: VirtualAddress,
    pub start_data: VirtualAddress,
    pub end_data: VirtualAddress,
}

impl UserLayout {
    /// # Panics
    /// If the segments are out of order or reach past `START_STACK`.
    #[must_use]
    pub const fn new(start_code: u64, start_data: u64, end_data: u64) -> Self {
        assert!(
            start_code <= start_data && start_data <= end_data && end_data <= START_STACK,
            "user segments out of order"
        );
        Self {
            start_code: VirtualAddress::new(start_code),
            start_data: VirtualAddress::new(start_data),
            end_data: VirtualAddress::new(end_data),
        }
    }

    /// A program whose data starts `code_len` bytes after `START_CODE`.
    #[must_use]
    pub const fn with_sizes(code_len: u64, data_len: u64) -> Self {
        Self::new(START_CODE, START_CODE + code_len, START_CODE + code_len + data_len)
    }

    /// Heap and stack: unmapped pages here are created on first touch.
    #[inline]
    #[must_use]
    pub const fn is_growth_region(&self, va: VirtualAddress) -> bool {
        va.as_u64() >= self.end_data.as_u64() && va.as_u64() <= START_STACK
    }

    /// Pages at or above `start_data` may be copied on write.
    #[inline]
    #[must_use]
    pub const fn is_copy_on_write(&self, va: VirtualAddress) -> bool {
        va.as_u64() >= self.start_data.as_u64() && va.as_u64() < KERNEL_ADDRESS
    }
}

/// The memory side of one process: its address space and clock hand.
///
/// Created and torn down through [`MemorySubsystem`](crate::MemorySubsystem);
/// dropping it without [`destroy`](crate::MemorySubsystem::destroy) leaks the
/// address space.
#[derive(Debug)]
#[must_use]
pub struct ProcessMemory {
    pub(crate) root: RootPage,
    pub(crate) layout: UserLayout,
    pub(crate) clock_hand: VirtualAddress,
}

impl ProcessMemory {
    pub(crate) const fn new(root: RootPage, layout: UserLayout) -> Self {
        Self {
            root,
            layout,
            clock_hand: VirtualAddress::new(START_CODE),
        }
    }

    #[inline]
    #[must_use]
    pub const fn root(&self) -> RootPage {
        self.root
    }

    #[inline]
    #[must_use]
    pub const fn layout(&self) -> &UserLayout {
        &self.layout
    }

    /// Move the heap end, e.g. for `brk`.
    ///
    /// # Panics
    /// If the new end lies below `start_data` or above `START_STACK`.
    pub fn set_end_data(&mut self, end: VirtualAddress) {
        self.layout = UserLayout::new(
            self.layout.start_code.as_u64(),
            self.layout.start_data.as_u64(),
            end.as_u64(),
        );
    }

    /// Where the next victim search starts.
    #[inline]
    #[must_use]
    pub const fn clock_hand(&self) -> VirtualAddress {
        self.clock_hand
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions() {
        let layout = UserLayout::with_sizes(0x1000, 0x2000);
        assert_eq!(layout.start_data, VirtualAddress::new(0x1_1000));
        assert!(!layout.is_growth_region(VirtualAddress::new(0x1_2FFF)));
        assert!(layout.is_growth_region(VirtualAddress::new(0x1_3000)));
        assert!(layout.is_growth_region(VirtualAddress::new(START_STACK)));
        assert!(!layout.is_growth_region(VirtualAddress::new(START_STACK + 1)));
        assert!(!layout.is_copy_on_write(VirtualAddress::new(0x1_0FFF)));
        assert!(layout.is_copy_on_write(VirtualAddress::new(0x1_1000)));
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn data_above_stack_is_rejected() {
        let _ = UserLayout::new(START_CODE, START_CODE, START_STACK + 0x1000);
    }
}
