//! # Physical Memory Allocation
//!
//! This crate owns every RAM frame of the machine. It starts with a simple
//! bitmap allocator while the kernel is still laying out its own metadata
//! and then hands all remaining memory to a zoned binary buddy allocator
//! that serves the rest of the kernel's lifetime.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 FrameAllocator                      │
//! │    • alloc_pages / free_pages by order              │
//! │    • per-frame reference counts                     │
//! │    • Gfp zone lists (Normal → DMA)                  │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                 Zones (DMA, Normal)                 │
//! │    • one FreeArea per order 0..=MAX_ORDER           │
//! │    • buddy split on allocation, merge on release    │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                 FrameTable                          │
//! │    • one FrameDescriptor per RAM frame              │
//! │    • allocated once by BootMem, never freed         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Bootstrap
//!
//! [`mem_init`] consumes the firmware memory map:
//!
//! ```text
//! 0x8000_0000 ┌──────────────────────────┐
//!             │ OpenSBI                  │ reserved
//! 0x8020_0000 ├──────────────────────────┤
//!             │ kernel image             │ reserved
//! kernel_end  ├──────────────────────────┤
//!             │ frame descriptors, root  │ lent to bootmem, stays reserved
//! 0x8200_0000 ├──────────────────────────┤
//!             │ boot bitmap              │ reclaimed after retirement
//!             ├──────────────────────────┤
//!             │ free RAM                 │ → buddy zones
//! 0x8800_0000 └──────────────────────────┘
//! ```
//!
//! ## Reference Counts
//!
//! A frame handed out by [`FrameAllocator::alloc_pages`] carries one
//! reference. Page tables add one per additional mapping
//! ([`FrameAllocator::get_page`]); [`FrameAllocator::free_pages`] drops one
//! and releases the block at zero. Releasing a block that is reserved,
//! already free, or misaligned is a kernel bug and panics.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_alloc::{mem_init, phys_mapper::LinearPhysMapper};
//! use kernel_info::boot::{BootMemoryMap, MemoryRegion, MemoryRegionKind};
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let regions = [
//!     MemoryRegion::from_range(0x8000_0000, 0x8800_0000, MemoryRegionKind::Ram),
//!     MemoryRegion::from_range(0x8000_0000, 0x8200_0000, MemoryRegionKind::Reserved),
//! ];
//! let map = BootMemoryMap::new(&regions, PhysicalAddress::new(0x8040_0000));
//! let mut mem = unsafe { mem_init(&map, &LinearPhysMapper) }.expect("mem_init");
//! let page = mem.frames.alloc_page().expect("RAM");
//! mem.frames.free_page(page);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod bitmap;
mod bootmem;
mod buddy;
mod frame;
mod frame_alloc;
mod init;
pub mod phys_mapper;

pub use crate::bitmap::Bitmap;
pub use crate::bootmem::BootMem;
pub use crate::buddy::{FreeArea, ORDERS, Zone, ZoneKind};
pub use crate::frame::{FrameDescriptor, FrameFlags, FrameTable};
pub use crate::frame_alloc::{AllocError, AllocStats, FrameAllocator, Gfp, ZoneStats};
pub use crate::init::{InitError, MemInit, mem_init};
pub(crate) use kernel_info::memory as info;
