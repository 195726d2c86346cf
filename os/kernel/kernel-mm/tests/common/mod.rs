#![allow(dead_code)]

use kernel_alloc::mem_init;
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};
use kernel_mm::swap::RamSwapStore;
use kernel_mm::{MemoryConfig, MemorySubsystem, ProcessMemory, SwapPolicy, UserLayout};
use kernel_qemu::QemuLogger;
use kernel_testing::{TestRam, board_map};
use kernel_vmem::{FrameBytes, PageTableEntry, PteFlags};
use log::LevelFilter;
use std::sync::Once;

pub type Mm<'a> = MemorySubsystem<'a, TestRam, RamSwapStore<'a>>;

/// Where the tests put their data pages; above `end_data` of [`layout`].
pub const DATA: u64 = 0x20_0000;

pub const fn va(addr: u64) -> VirtualAddress {
    VirtualAddress::new(addr)
}

pub const fn page(i: u64) -> VirtualAddress {
    va(DATA + i * 4096)
}

/// Code at `START_CODE`, one page of data, heap from `0x1_2000` up.
pub const fn layout() -> UserLayout {
    UserLayout::with_sizes(0x1000, 0x1000)
}

pub fn swap_area(slots: usize) -> Vec<FrameBytes> {
    vec![[0; 4096]; slots]
}

pub fn boot<'a>(ram: &'a TestRam, swap: &'a mut [FrameBytes], policy: SwapPolicy) -> Mm<'a> {
    static LOGGER: Once = Once::new();
    LOGGER.call_once(|| {
        let _ = QemuLogger::new(LevelFilter::Trace).init();
    });
    let init = unsafe { mem_init(&board_map(), ram) }.unwrap();
    let config = MemoryConfig::default().with_swap_policy(policy);
    MemorySubsystem::new(init, ram, RamSwapStore::new(swap), config)
}

/// Map a fresh frame at `va` and tag it with `tag` in its first bytes.
pub fn map_tagged(
    mm: &mut Mm<'_>,
    ram: &TestRam,
    process: &ProcessMemory,
    va: VirtualAddress,
    flags: PteFlags,
    tag: u64,
) -> PhysicalPage<Size4K> {
    let frame = mm.alloc_page().unwrap();
    ram.write(frame.base(), &tag.to_le_bytes());
    mm.map_page(process.root(), va, frame, flags).unwrap();
    frame
}

pub fn entry(mm: &Mm<'_>, process: &ProcessMemory, va: VirtualAddress) -> PageTableEntry {
    *mm.space(process.root()).lookup(va).unwrap()
}

pub fn set_bits(mm: &Mm<'_>, process: &ProcessMemory, va: VirtualAddress, flags: PteFlags) {
    mm.space(process.root()).lookup(va).unwrap().insert(flags);
}

/// First eight bytes of the page mapped at `va`.
pub fn tag_at(mm: &Mm<'_>, ram: &TestRam, process: &ProcessMemory, va: VirtualAddress) -> u64 {
    let pa = mm.space(process.root()).translate(va).unwrap();
    u64::from_le_bytes(ram.read(pa, 8).try_into().unwrap())
}
