//! # Memory Layout
//!
//! Physical and virtual layout of the QEMU `virt` board as used by the kernel.

/// Start of DRAM on the `virt` board.
pub const MEM_START: u64 = 0x8000_0000;

/// End of the RAM this kernel manages (128 MiB).
pub const MEM_END: u64 = 0x8800_0000;

/// Bytes of RAM covered by the kernel window.
pub const PAGING_MEMORY: u64 = MEM_END - MEM_START;

/// End of the firmware (OpenSBI) image; the kernel is loaded here.
pub const SBI_END: u64 = 0x8020_0000;

/// First byte of RAM not owned by firmware or the kernel image window.
///
/// `[MEM_START, LOW_MEM)` is reserved at boot; the spare tail of it behind
/// the loaded kernel image serves bootstrap allocations.
pub const LOW_MEM: u64 = 0x8200_0000;

/// Offset between a physical RAM address and its kernel-window alias.
pub const LINEAR_OFFSET: u64 = 0x4000_0000;

/// Start of the kernel window; everything below belongs to user space.
pub const KERNEL_ADDRESS: u64 = MEM_START + LINEAR_OFFSET;

/// Start of a process' code segment.
pub const START_CODE: u64 = 0x1_0000;

/// Initial user stack pointer (top of the stack growth region).
pub const START_STACK: u64 = 0xBFFF_FFF0;

/// Size of the DMA-capable low zone carved from the start of RAM.
pub const DMA_ZONE_SIZE: u64 = 16 * 1024 * 1024;

/// Largest buddy order (blocks of `2^MAX_ORDER` frames).
pub const MAX_ORDER: usize = 11;

/// Capacity of the in-memory swap store in bytes.
pub const SWAP_SIZE: u64 = 2 * 1024 * 1024;

/// Number of 4 KiB slots in the swap store.
#[allow(clippy::cast_possible_truncation)]
pub const SWAP_PAGES: usize = (SWAP_SIZE / 4096) as usize;

/// Translate a RAM address to its kernel-window alias.
#[inline]
#[must_use]
pub const fn virt(pa: u64) -> u64 {
    pa + LINEAR_OFFSET
}

/// Translate a kernel-window address back to RAM.
#[inline]
#[must_use]
pub const fn phys(va: u64) -> u64 {
    va - LINEAR_OFFSET
}

const _: () = {
    assert!(MEM_START < LOW_MEM && LOW_MEM < MEM_END);
    assert!(SBI_END < LOW_MEM);
    assert!(START_STACK < KERNEL_ADDRESS);
    assert!(START_CODE < START_STACK);
    // the kernel window must fit in one root-table entry
    assert!(KERNEL_ADDRESS.is_multiple_of(1 << 30));
    assert!(MEM_START.is_multiple_of(1 << 30));
    assert!(PAGING_MEMORY <= 1 << 30);
    assert!(DMA_ZONE_SIZE.is_multiple_of(4096 << MAX_ORDER));
    assert!(SWAP_SIZE.is_multiple_of(4096));
};
