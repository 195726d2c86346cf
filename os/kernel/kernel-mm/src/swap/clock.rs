//! # Clock Victim Selection
//!
//! The clock hand sweeps the user half of a process in address order,
//! starting where the previous victim was found and wrapping around at the
//! kernel window. Only private pages (frame reference count 1) are
//! candidates; shared copy-on-write frames stay resident.
//!
//! - **Clock**: a candidate with `A` set loses it and is passed over; the
//!   first candidate found without `A` is the victim. Two sweeps suffice.
//! - **Enhanced clock**: sweeps alternate between looking for a clean page
//!   (`!A && !D`) and a dirty one (`!A && D`), clearing `A` on the way. Two
//!   cycles of a clean and a dirty sweep suffice.

use crate::config::SwapPolicy;
use crate::info::{KERNEL_ADDRESS, START_CODE};
use core::ops::ControlFlow;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{AddressSpace, FrameAlloc, PageTableEntry, PhysMapper, PteFlags, tlb};

const USER_START: VirtualAddress = VirtualAddress::new(START_CODE);
const USER_END: VirtualAddress = VirtualAddress::new(KERNEL_ADDRESS);

fn is_candidate<A: FrameAlloc>(frames: &A, e: &PageTableEntry) -> bool {
    e.valid() && e.user() && e.is_leaf() && frames.ref_count(e.frame()) == 1
}

/// One revolution of the hand starting at `hand`.
///
/// `pick` sees every candidate and may clear its bits; returning `true`
/// selects it. The second value tells whether any candidate was seen.
fn sweep<M, A, F>(
    space: &mut AddressSpace<'_, M>,
    frames: &A,
    hand: VirtualAddress,
    mut pick: F,
) -> (Option<VirtualAddress>, bool)
where
    M: PhysMapper,
    A: FrameAlloc,
    F: FnMut(&mut PageTableEntry) -> bool,
{
    let mut seen = false;
    let hand = hand.as_u64().clamp(USER_START.as_u64(), USER_END.as_u64());
    let hand = VirtualAddress::new(hand);

    for (start, end) in [(hand, USER_END), (USER_START, hand)] {
        let found = space.scan_leaves(start, end, |va, e| {
            if !is_candidate(frames, e) {
                return ControlFlow::Continue(());
            }
            seen = true;
            let before = *e;
            let chosen = pick(e);
            if *e != before {
                tlb::flush_page(va);
            }
            if chosen {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        if found.is_some() {
            return (found, seen);
        }
    }
    (None, seen)
}

/// Second chance on `A`.
fn second_chance(e: &mut PageTableEntry) -> bool {
    if e.accessed() {
        e.remove(PteFlags::ACCESSED);
        false
    } else {
        true
    }
}

/// Choose a page of `space` to evict and move `hand` onto it.
///
/// Returns `None` if the process has no private resident page.
pub fn select_victim<M: PhysMapper, A: FrameAlloc>(
    space: &mut AddressSpace<'_, M>,
    frames: &A,
    hand: &mut VirtualAddress,
    policy: SwapPolicy,
) -> Option<VirtualAddress> {
    let passes: &[Option<bool>] = match policy {
        SwapPolicy::Clock => &[None, None],
        SwapPolicy::EnhancedClock => &[Some(false), Some(true), Some(false), Some(true)],
    };

    for &want_dirty in passes {
        let (victim, seen) = sweep(space, frames, *hand, |e| {
            second_chance(e) && want_dirty.is_none_or(|dirty| e.dirty() == dirty)
        });
        if let Some(va) = victim {
            log::trace!("clock: victim {va} ({policy:?})");
            *hand = va;
            return Some(va);
        }
        if !seen {
            break;
        }
    }
    log::warn!("clock: no evictable page");
    None
}
