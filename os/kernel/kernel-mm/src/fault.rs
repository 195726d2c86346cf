//! # Page Fault Handling
//!
//! The kernel manages the `A` and `D` bits in software, so a fault is raised
//! not only for missing or forbidden pages but also for the first access (or
//! first store) to a permitted page. The handler sorts a fault into one of
//! these cases:
//!
//! | Entry state                     | Action                                  |
//! |---------------------------------|-----------------------------------------|
//! | none, heap/stack region         | map a zeroed frame `USER_RW`            |
//! | none, elsewhere                 | [`MemoryError::AccessViolation`]        |
//! | user, swapped out               | swap in                                 |
//! | valid, access permitted         | set `A` (and `D` for stores)            |
//! | valid user, store, not writable | copy on write (from `start_data` up)    |
//! | kernel page from U-mode         | [`MemoryError::AccessViolation`]        |
//! | permitted and `A`/`D` already set | panic                                 |

use crate::error::MemoryError;
use crate::process::{ProcessMemory, UserLayout};
use crate::swap::BackingStore;
use crate::MemorySubsystem;
use kernel_memory_addresses::{Size4K, VirtualAddress};
use kernel_registers::scause::{
    INSTRUCTION_PAGE_FAULT, LOAD_PAGE_FAULT, STORE_PAGE_FAULT, Scause,
};
use kernel_vmem::{PageTableEntry, PhysMapper, PteFlags, Walk, tlb};
use log::debug;

/// The access that faulted.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum FaultKind {
    Fetch,
    Load,
    Store,
}

impl FaultKind {
    /// Page fault kind for a synchronous `scause`, if it is one.
    #[must_use]
    pub const fn from_scause(cause: Scause) -> Option<Self> {
        if cause.interrupt() {
            return None;
        }
        match cause.code() {
            INSTRUCTION_PAGE_FAULT => Some(Self::Fetch),
            LOAD_PAGE_FAULT => Some(Self::Load),
            STORE_PAGE_FAULT => Some(Self::Store),
            _ => None,
        }
    }

    /// Permission bit the access needs.
    #[must_use]
    pub const fn required(self) -> PteFlags {
        match self {
            Self::Fetch => PteFlags::EXECUTE,
            Self::Load => PteFlags::READ,
            Self::Store => PteFlags::WRITE,
        }
    }
}

/// Mode the faulting access was made from.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Privilege {
    User,
    Supervisor,
}

impl Privilege {
    /// From `sstatus.SPP` at trap entry.
    #[must_use]
    pub const fn from_spp(spp: bool) -> Self {
        if spp { Self::Supervisor } else { Self::User }
    }
}

enum Resolution {
    Done,
    DemandZero,
    SwapIn,
    CopyOnWrite,
    Violation,
}

/// A permitted access to a valid page: record it in `A`/`D`.
fn account_access(
    entry: &mut PageTableEntry,
    va: VirtualAddress,
    kind: FaultKind,
    privilege: Privilege,
) {
    let settled = match kind {
        FaultKind::Store => entry.accessed() && entry.dirty(),
        FaultKind::Load | FaultKind::Fetch => entry.accessed(),
    };
    if settled {
        if privilege == Privilege::Supervisor && entry.user() {
            panic!("unknown page fault at {va} ({kind:?}): user page touched with sstatus.SUM clear?");
        }
        panic!("unknown page fault at {va} ({kind:?}), entry {:#x}", entry.into_bits());
    }
    entry.insert(match kind {
        FaultKind::Store => PteFlags::ACCESSED | PteFlags::DIRTY,
        FaultKind::Load | FaultKind::Fetch => PteFlags::ACCESSED,
    });
    tlb::flush_page(va);
}

fn classify_valid(
    entry: &mut PageTableEntry,
    layout: &UserLayout,
    va: VirtualAddress,
    kind: FaultKind,
    privilege: Privilege,
) -> Resolution {
    if entry.flags().contains(kind.required()) {
        account_access(entry, va, kind, privilege);
        Resolution::Done
    } else if entry.user() && kind == FaultKind::Store && layout.is_copy_on_write(va) {
        Resolution::CopyOnWrite
    } else {
        Resolution::Violation
    }
}

fn classify(
    entry: &mut PageTableEntry,
    layout: &UserLayout,
    va: VirtualAddress,
    kind: FaultKind,
    privilege: Privilege,
) -> Resolution {
    if entry.user() {
        if entry.valid() {
            classify_valid(entry, layout, va, kind, privilege)
        } else {
            Resolution::SwapIn
        }
    } else {
        match privilege {
            Privilege::User => Resolution::Violation,
            Privilege::Supervisor if entry.valid() => {
                classify_valid(entry, layout, va, kind, privilege)
            }
            Privilege::Supervisor => panic!("unknown page fault at {va}: invalid kernel page"),
        }
    }
}

impl<M: PhysMapper, S: BackingStore> MemorySubsystem<'_, M, S> {
    /// Service a page fault of `process` at `vaddr`.
    ///
    /// On `Ok` the faulting instruction can be retried.
    ///
    /// # Errors
    /// - [`MemoryError::AccessViolation`] for accesses the process may not make.
    /// - [`MemoryError::OutOfMemory`] if a frame for demand-zero, copy on write
    ///   or swap-in is unavailable.
    ///
    /// # Panics
    /// On faults that cannot be explained by the page tables.
    pub fn handle_page_fault(
        &mut self,
        process: &mut ProcessMemory,
        vaddr: VirtualAddress,
        kind: FaultKind,
        privilege: Privilege,
    ) -> Result<(), MemoryError> {
        let mut space = self.space(process.root);
        let page = vaddr.page::<Size4K>().base();
        let layout = process.layout;

        let resolution = match space.walk(vaddr) {
            Walk::Leaf(e) if !e.is_zero() => classify(e, &layout, vaddr, kind, privilege),
            Walk::Huge(_, e) => classify(e, &layout, vaddr, kind, privilege),
            Walk::Leaf(_) | Walk::Missing(_) => {
                if layout.is_growth_region(vaddr) {
                    Resolution::DemandZero
                } else {
                    Resolution::Violation
                }
            }
        };

        match resolution {
            Resolution::Done => Ok(()),
            Resolution::Violation => {
                debug!("{privilege:?} {kind:?} fault at {vaddr}: access violation");
                Err(MemoryError::AccessViolation {
                    addr: vaddr,
                    kind,
                    privilege,
                })
            }
            Resolution::DemandZero => {
                let frame = self.frames.alloc_page()?;
                if let Err(e) = space.map(&mut self.frames, page, frame, PteFlags::USER_RW) {
                    self.frames.free_page(frame);
                    return Err(e.into());
                }
                debug!("demand-zero page {page} -> {frame}");
                Ok(())
            }
            Resolution::SwapIn => {
                self.swap.swap_in(&mut space, &mut self.frames, page)?;
                Ok(())
            }
            Resolution::CopyOnWrite => self.break_cow(process, page),
        }
    }

    /// Give `process` a private, writable copy of the page at `page`.
    fn break_cow(
        &mut self,
        process: &ProcessMemory,
        page: VirtualAddress,
    ) -> Result<(), MemoryError> {
        let mut space = self.space(process.root);
        let mapper = space.mapper();
        let Some(entry) = space.lookup(page).filter(|e| e.valid()) else {
            panic!("copy on write: {page} is not mapped");
        };
        let old = entry.frame();

        if self.frames.page_count(old) == 1 {
            entry.insert(PteFlags::WRITE | PteFlags::ACCESSED | PteFlags::DIRTY);
            debug!("copy on write: {page} is the last user of {old}, made writable");
        } else {
            let new = self.frames.alloc_page()?;
            // SAFETY: `new` is fresh and `old` stays referenced until the
            // copy is complete.
            unsafe { mapper.copy_frame(old, new) };
            *entry = PageTableEntry::leaf(
                new,
                entry.flags() | PteFlags::WRITE | PteFlags::ACCESSED | PteFlags::DIRTY,
            );
            self.frames.free_page(old);
            debug!("copy on write: {page} copied {old} -> {new}");
        }
        tlb::flush_page(page);
        Ok(())
    }

    /// Make the user page at `vaddr` writable before the kernel stores into
    /// it, running the same steps a user store fault would.
    ///
    /// # Errors
    /// As for [`handle_page_fault`](Self::handle_page_fault) with a user
    /// store.
    ///
    /// # Panics
    /// If the page is still not writable once every step has run.
    pub fn prepare_write(
        &mut self,
        process: &mut ProcessMemory,
        vaddr: VirtualAddress,
    ) -> Result<(), MemoryError> {
        // At most: demand-zero or swap in, copy on write, then account the
        // store.
        for _ in 0..3 {
            if self.is_write_ready(process, vaddr) {
                return Ok(());
            }
            self.handle_page_fault(process, vaddr, FaultKind::Store, Privilege::User)?;
        }
        assert!(
            self.is_write_ready(process, vaddr),
            "prepare_write: {vaddr} is still not writable"
        );
        Ok(())
    }

    fn is_write_ready(&self, process: &ProcessMemory, vaddr: VirtualAddress) -> bool {
        self.space(process.root)
            .lookup(vaddr)
            .is_some_and(|e| e.valid() && e.writable() && e.accessed() && e.dirty())
    }
}
