use crate::fault::{FaultKind, Privilege};
use crate::swap::StoreError;
use kernel_alloc::AllocError;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::MapError;

/// Runtime failures of memory operations.
///
/// Broken invariants (double frees, remapping a live page, unexplained
/// faults) are not represented here; they panic.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MemoryError {
    /// No frame could be allocated; the caller may reclaim and retry.
    #[error("out of memory")]
    OutOfMemory,
    /// The access is not allowed; reported to the faulting process.
    #[error("{privilege:?} {kind:?} at {addr} violates the page permissions")]
    AccessViolation {
        addr: VirtualAddress,
        kind: FaultKind,
        privilege: Privilege,
    },
    /// Every swap slot is taken.
    #[error("swap space exhausted")]
    SwapExhausted,
    #[error("swap store failed: {0}")]
    Store(#[from] StoreError),
}

impl From<AllocError> for MemoryError {
    fn from(value: AllocError) -> Self {
        match value {
            AllocError::OutOfMemory { .. } => Self::OutOfMemory,
        }
    }
}

impl From<MapError> for MemoryError {
    fn from(value: MapError) -> Self {
        match value {
            MapError::OutOfMemory { .. } => Self::OutOfMemory,
        }
    }
}
