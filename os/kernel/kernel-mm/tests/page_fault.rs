mod common;

use common::{boot, entry, layout, map_tagged, page, set_bits, swap_area, tag_at, va};
use kernel_info::memory::{KERNEL_ADDRESS, START_CODE, START_STACK};
use kernel_mm::{FaultKind, MemoryError, Privilege, SwapPolicy};
use kernel_testing::TestRam;
use kernel_vmem::PteFlags;

use FaultKind::{Fetch, Load, Store};
use Privilege::{Supervisor, User};

#[test]
fn store_after_fork_breaks_copy_on_write() {
    let ram = TestRam::board();
    let mut swap = swap_area(1);
    let mut mm = boot(&ram, &mut swap, SwapPolicy::default());
    let mut parent = mm.new_process(layout()).unwrap();
    let original = map_tagged(&mut mm, &ram, &parent, page(0), PteFlags::USER_RW, 0xC0FFEE);

    let mut child = mm.fork(&parent).unwrap();
    assert_eq!(mm.frames().page_count(original), 2);
    assert!(!entry(&mm, &parent, page(0)).writable());

    mm.handle_page_fault(&mut child, va(0x20_0010), Store, User)
        .unwrap();
    let copied = entry(&mm, &child, page(0));
    assert_ne!(copied.frame(), original);
    assert!(copied.writable() && copied.accessed() && copied.dirty());
    assert_eq!(tag_at(&mm, &ram, &child, page(0)), 0xC0FFEE);
    assert_eq!(mm.frames().page_count(original), 1);
    assert_eq!(mm.frames().page_count(copied.frame()), 1);

    // The parent is now the only user and keeps its frame.
    mm.handle_page_fault(&mut parent, page(0), Store, User)
        .unwrap();
    let kept = entry(&mm, &parent, page(0));
    assert_eq!(kept.frame(), original);
    assert!(kept.writable());

    mm.destroy(child);
    mm.destroy(parent);
}

#[test]
fn first_touch_of_heap_and_stack_maps_zeroed_pages() {
    let ram = TestRam::board();
    ram.fill(0x5A);
    let mut swap = swap_area(1);
    let mut mm = boot(&ram, &mut swap, SwapPolicy::default());
    let mut p = mm.new_process(layout()).unwrap();
    let before = mm.frames().free_frames();

    for addr in [0x1_2000, 0x5000_0123, START_STACK] {
        mm.handle_page_fault(&mut p, va(addr), Load, User).unwrap();
        let e = entry(&mm, &p, va(addr));
        assert!(e.valid() && e.user() && e.readable() && e.writable());
        assert!(ram.frame_is_zero(e.address()));
    }
    assert!(mm.frames().free_frames() < before);

    mm.destroy(p);
    assert_eq!(mm.frames().free_frames(), before + 1, "root frame returned");
}

#[test]
fn unmapped_addresses_below_the_heap_are_violations() {
    let ram = TestRam::board();
    let mut swap = swap_area(1);
    let mut mm = boot(&ram, &mut swap, SwapPolicy::default());
    let mut p = mm.new_process(layout()).unwrap();

    for addr in [0x0, START_CODE, 0x1_1800] {
        assert_eq!(
            mm.handle_page_fault(&mut p, va(addr), Load, User),
            Err(MemoryError::AccessViolation {
                addr: va(addr),
                kind: Load,
                privilege: User
            })
        );
    }
    mm.destroy(p);
}

#[test]
fn code_and_kernel_pages_reject_user_stores() {
    let ram = TestRam::board();
    let mut swap = swap_area(1);
    let mut mm = boot(&ram, &mut swap, SwapPolicy::default());
    let mut p = mm.new_process(layout()).unwrap();
    map_tagged(&mut mm, &ram, &p, va(START_CODE), PteFlags::USER_RX, 1);

    let code = mm.handle_page_fault(&mut p, va(START_CODE), Store, User);
    assert!(matches!(code, Err(MemoryError::AccessViolation { .. })));

    let kernel = mm.handle_page_fault(&mut p, va(KERNEL_ADDRESS + 0x40), Fetch, User);
    assert!(matches!(
        kernel,
        Err(MemoryError::AccessViolation { kind: Fetch, .. })
    ));
    mm.destroy(p);
}

#[test]
fn first_access_sets_accessed_and_dirty() {
    let ram = TestRam::board();
    let mut swap = swap_area(1);
    let mut mm = boot(&ram, &mut swap, SwapPolicy::default());
    let mut p = mm.new_process(layout()).unwrap();
    map_tagged(&mut mm, &ram, &p, page(0), PteFlags::USER_RW, 1);
    map_tagged(&mut mm, &ram, &p, va(START_CODE), PteFlags::USER_RX, 2);

    mm.handle_page_fault(&mut p, page(0), Load, User).unwrap();
    let e = entry(&mm, &p, page(0));
    assert!(e.accessed() && !e.dirty());

    mm.handle_page_fault(&mut p, page(0), Store, User).unwrap();
    assert!(entry(&mm, &p, page(0)).dirty());

    mm.handle_page_fault(&mut p, va(START_CODE), Fetch, User)
        .unwrap();
    assert!(entry(&mm, &p, va(START_CODE)).accessed());
    mm.destroy(p);
}

#[test]
#[should_panic(expected = "unknown page fault")]
fn fault_on_an_accessed_page_is_fatal() {
    let ram = TestRam::board();
    let mut swap = swap_area(1);
    let mut mm = boot(&ram, &mut swap, SwapPolicy::default());
    let mut p = mm.new_process(layout()).unwrap();
    map_tagged(&mut mm, &ram, &p, page(0), PteFlags::USER_RW, 1);
    set_bits(&mm, &p, page(0), PteFlags::ACCESSED);

    let _ = mm.handle_page_fault(&mut p, page(0), Load, User);
}

#[test]
#[should_panic(expected = "SUM")]
fn supervisor_fault_on_an_accessed_user_page_names_sum() {
    let ram = TestRam::board();
    let mut swap = swap_area(1);
    let mut mm = boot(&ram, &mut swap, SwapPolicy::default());
    let mut p = mm.new_process(layout()).unwrap();
    map_tagged(&mut mm, &ram, &p, page(0), PteFlags::USER_RW, 1);
    set_bits(&mm, &p, page(0), PteFlags::ACCESSED);

    let _ = mm.handle_page_fault(&mut p, page(0), Load, Supervisor);
}

#[test]
#[should_panic(expected = "unknown page fault")]
fn supervisor_fault_in_the_kernel_window_is_fatal() {
    let ram = TestRam::board();
    let mut swap = swap_area(1);
    let mut mm = boot(&ram, &mut swap, SwapPolicy::default());
    let mut p = mm.new_process(layout()).unwrap();

    let _ = mm.handle_page_fault(&mut p, va(KERNEL_ADDRESS), Store, Supervisor);
}

#[test]
fn prepare_write_gives_a_private_writable_page() {
    let ram = TestRam::board();
    let mut swap = swap_area(1);
    let mut mm = boot(&ram, &mut swap, SwapPolicy::default());
    let parent = mm.new_process(layout()).unwrap();
    let shared = map_tagged(&mut mm, &ram, &parent, page(0), PteFlags::USER_RW, 7);
    let mut child = mm.fork(&parent).unwrap();

    mm.prepare_write(&mut child, page(0)).unwrap();
    let e = entry(&mm, &child, page(0));
    assert!(e.writable() && e.accessed() && e.dirty());
    assert_ne!(e.frame(), shared);

    // Nothing left to do the second time.
    mm.prepare_write(&mut child, page(0)).unwrap();
    assert_eq!(entry(&mm, &child, page(0)), e);

    // Heap pages are created on demand.
    mm.prepare_write(&mut child, va(0x30_0000)).unwrap();
    assert!(entry(&mm, &child, va(0x30_0000)).dirty());

    mm.destroy(child);
    mm.destroy(parent);
}

#[test]
fn prepare_write_brings_back_a_swapped_page() {
    let ram = TestRam::board();
    let mut swap = swap_area(1);
    let mut mm = boot(&ram, &mut swap, SwapPolicy::default());
    let mut p = mm.new_process(layout()).unwrap();
    map_tagged(&mut mm, &ram, &p, page(2), PteFlags::USER_RW, 0xAB);
    mm.swap_out(&p, page(2)).unwrap();

    mm.prepare_write(&mut p, page(2)).unwrap();
    let e = entry(&mm, &p, page(2));
    assert!(e.valid() && e.writable() && e.accessed() && e.dirty());
    assert_eq!(tag_at(&mm, &ram, &p, page(2)), 0xAB);
    assert_eq!(mm.swap().slots().used(), 0);

    mm.destroy(p);
}

#[test]
fn prepare_write_refuses_code_pages() {
    let ram = TestRam::board();
    let mut swap = swap_area(1);
    let mut mm = boot(&ram, &mut swap, SwapPolicy::default());
    let mut p = mm.new_process(layout()).unwrap();
    map_tagged(&mut mm, &ram, &p, va(START_CODE), PteFlags::USER_RX, 1);

    assert!(matches!(
        mm.prepare_write(&mut p, va(START_CODE)),
        Err(MemoryError::AccessViolation { .. })
    ));

    mm.destroy(p);
}
