//! # Kernel synchronization primitives
//!
//! The kernel runs on a single hart. Mutual exclusion against interrupt
//! handlers is obtained by masking `sstatus.SIE`; the lock types here add a
//! held flag on top so that accidental re-entry is caught instead of
//! silently corrupting state.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod irq_lock;
mod sync_once_cell;

pub use irq::IrqGuard;
pub use irq_lock::{IrqLock, IrqLockGuard};
pub use sync_once_cell::SyncOnceCell;
