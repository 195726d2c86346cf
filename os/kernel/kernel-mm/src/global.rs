//! # The Kernel's Memory Subsystem
//!
//! One [`MemorySubsystem`] over the kernel window, created by [`init`] during
//! boot and reached through [`with_memory`] afterwards. The kernel runs on a
//! single hart; the [`IrqLock`] masks interrupts for the duration of each
//! call and panics on re-entry, e.g. a page fault raised while the subsystem
//! is already in use.

use crate::info::SWAP_PAGES;
use crate::swap::RamSwapStore;
use crate::{FaultKind, MemoryConfig, MemoryError, MemorySubsystem, Privilege, ProcessMemory};
use kernel_alloc::phys_mapper::LinearPhysMapper;
use kernel_alloc::{AllocError, InitError, mem_init};
use kernel_info::boot::BootMemoryMap;
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};
use kernel_sync::{IrqLock, SyncOnceCell};
use kernel_vmem::{PteFlags, RootPage};

/// The subsystem as the kernel instantiates it.
pub type KernelMemory = MemorySubsystem<'static, LinearPhysMapper, RamSwapStore<'static>>;

static MAPPER: LinearPhysMapper = LinearPhysMapper;
static MEMORY: SyncOnceCell<IrqLock<KernelMemory>> = SyncOnceCell::new();

/// The RAM swap store is one buddy block.
const SWAP_ORDER: usize = SWAP_PAGES.trailing_zeros() as usize;

const _: () = assert!(SWAP_PAGES.is_power_of_two());

/// Failure to bring up the global subsystem.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Init(#[from] InitError),
    #[error("cannot allocate the swap store: {0}")]
    Swap(#[from] AllocError),
    #[error("the memory subsystem is already initialized")]
    AlreadyInitialized,
}

/// Build the frame allocator from `map`, the kernel address space and a
/// RAM-backed swap store, and publish them.
///
/// # Errors
/// See [`SetupError`].
///
/// # Safety
/// The requirements of [`mem_init`] apply, and the kernel window must
/// already map all of RAM.
pub unsafe fn init(map: &BootMemoryMap<'_>, config: MemoryConfig) -> Result<(), SetupError> {
    if MEMORY.get().is_some() {
        return Err(SetupError::AlreadyInitialized);
    }
    // SAFETY: forwarded to the caller.
    let mut boot = unsafe { mem_init(map, &MAPPER) }?;
    let first = boot.frames.alloc_pages(SWAP_ORDER)?;
    // SAFETY: the block was just allocated and is never freed.
    let store = unsafe { RamSwapStore::from_frames(&MAPPER, first, SWAP_PAGES) };
    let memory = MemorySubsystem::new(boot, &MAPPER, store, config);
    MEMORY
        .set(IrqLock::new(memory))
        .map(|_| ())
        .map_err(|_| SetupError::AlreadyInitialized)
}

/// Run `f` on the subsystem with interrupts masked.
///
/// # Panics
/// Before [`init`], or when called from inside `f`.
pub fn with_memory<R>(f: impl FnOnce(&mut KernelMemory) -> R) -> R {
    let Some(lock) = MEMORY.get() else {
        panic!("memory subsystem used before init");
    };
    lock.with_lock(f)
}

/// # Errors
/// [`AllocError::OutOfMemory`] if no frame is free.
pub fn alloc_page() -> Result<PhysicalPage<Size4K>, AllocError> {
    with_memory(KernelMemory::alloc_page)
}

/// # Errors
/// [`AllocError::OutOfMemory`] if no block of `order` is free.
pub fn alloc_pages(order: usize) -> Result<PhysicalPage<Size4K>, AllocError> {
    with_memory(|m| m.alloc_pages(order))
}

pub fn free_page(frame: PhysicalPage<Size4K>) {
    with_memory(|m| m.free_page(frame));
}

pub fn free_pages(frame: PhysicalPage<Size4K>, order: usize) {
    with_memory(|m| m.free_pages(frame, order));
}

/// # Errors
/// See [`MemorySubsystem::map_page`].
pub fn map_page(
    root: RootPage,
    va: VirtualAddress,
    frame: PhysicalPage<Size4K>,
    flags: PteFlags,
) -> Result<(), MemoryError> {
    with_memory(|m| m.map_page(root, va, frame, flags))
}

pub fn unmap_range(root: RootPage, va: VirtualAddress, length: u64) {
    with_memory(|m| m.unmap_range(root, va, length));
}

/// # Errors
/// See [`MemorySubsystem::clone_range`].
pub fn clone_range(
    from: RootPage,
    from_va: VirtualAddress,
    to: RootPage,
    to_va: VirtualAddress,
    length: u64,
) -> Result<(), MemoryError> {
    with_memory(|m| m.clone_range(from, from_va, to, to_va, length))
}

pub fn free_range(root: RootPage, va: VirtualAddress, length: u64) {
    with_memory(|m| m.free_range(root, va, length));
}

/// # Safety
/// See [`MemorySubsystem::activate`].
#[cfg(target_arch = "riscv64")]
pub unsafe fn activate(root: RootPage) {
    with_memory(|m| unsafe { m.activate(root) });
}

/// Trap handler entry for page faults of `process`.
///
/// # Errors
/// See [`MemorySubsystem::handle_page_fault`].
pub fn handle_page_fault(
    process: &mut ProcessMemory,
    vaddr: VirtualAddress,
    kind: FaultKind,
    privilege: Privilege,
) -> Result<(), MemoryError> {
    with_memory(|m| m.handle_page_fault(process, vaddr, kind, privilege))
}

/// Evict one page of `process`.
///
/// # Errors
/// See [`MemorySubsystem::reclaim_one`].
pub fn do_swap_out(process: &mut ProcessMemory) -> Result<VirtualAddress, MemoryError> {
    with_memory(|m| m.reclaim_one(process))
}
