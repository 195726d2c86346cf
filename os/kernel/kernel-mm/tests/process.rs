mod common;

use common::{Mm, boot, entry, layout, map_tagged, page, swap_area, tag_at};
use core::ops::ControlFlow;
use kernel_info::memory::{KERNEL_ADDRESS, START_CODE};
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};
use kernel_mm::{FaultKind, Privilege, ProcessMemory, SwapPolicy};
use kernel_testing::TestRam;
use kernel_vmem::PteFlags;
use proptest::prelude::*;
use std::collections::HashMap;

/// Number of valid user leaves per frame, over all `processes`.
fn mapped_frames(mm: &Mm<'_>, processes: &[&ProcessMemory]) -> HashMap<PhysicalPage<Size4K>, u32> {
    let mut refs = HashMap::new();
    for p in processes {
        mm.space(p.root()).scan_leaves(
            VirtualAddress::new(START_CODE),
            VirtualAddress::new(KERNEL_ADDRESS),
            |_, e| {
                if e.valid() {
                    *refs.entry(e.frame()).or_default() += 1;
                }
                ControlFlow::Continue(())
            },
        );
    }
    refs
}

fn assert_refcounts(mm: &Mm<'_>, processes: &[&ProcessMemory]) {
    for (frame, refs) in mapped_frames(mm, processes) {
        assert_eq!(mm.frames().page_count(frame), refs, "frame {frame}");
    }
}

#[test]
fn fork_and_destroy_return_every_frame() {
    let ram = TestRam::board();
    let mut swap = swap_area(8);
    let mut mm = boot(&ram, &mut swap, SwapPolicy::default());
    let baseline = mm.frames().free_frames();

    let mut parent = mm.new_process(layout()).unwrap();
    for i in 0..16 {
        map_tagged(&mut mm, &ram, &parent, page(i), PteFlags::USER_RW, i);
    }
    mm.swap_out(&parent, page(15)).unwrap();
    assert_refcounts(&mm, &[&parent]);

    let mut child = mm.fork(&parent).unwrap();
    assert_refcounts(&mm, &[&parent, &child]);

    for i in [2, 5, 9] {
        mm.handle_page_fault(&mut child, page(i), FaultKind::Store, Privilege::User)
            .unwrap();
    }
    mm.handle_page_fault(&mut parent, page(5), FaultKind::Store, Privilege::User)
        .unwrap();
    assert_refcounts(&mm, &[&parent, &child]);
    assert_eq!(tag_at(&mm, &ram, &child, page(9)), 9);

    mm.destroy(child);
    assert_refcounts(&mm, &[&parent]);
    mm.swap_out(&parent, page(3)).unwrap();
    assert_refcounts(&mm, &[&parent]);

    mm.destroy(parent);
    assert_eq!(mm.frames().free_frames(), baseline);
    assert_eq!(mm.swap().slots().used(), 0);
}

#[test]
fn heap_end_moves_with_brk() {
    let ram = TestRam::board();
    let mut swap = swap_area(1);
    let mut mm = boot(&ram, &mut swap, SwapPolicy::default());
    let mut p = mm.new_process(layout()).unwrap();
    let below = VirtualAddress::new(0x1_3000);

    p.set_end_data(VirtualAddress::new(0x1_4000));
    assert!(
        mm.handle_page_fault(&mut p, below, FaultKind::Load, Privilege::User)
            .is_err()
    );
    p.set_end_data(VirtualAddress::new(0x1_3000));
    mm.handle_page_fault(&mut p, below, FaultKind::Load, Privilege::User)
        .unwrap();
    assert!(entry(&mm, &p, below).valid());

    mm.destroy(p);
}

#[derive(Debug, Clone)]
enum Op {
    ParentStore(u64),
    ChildStore(u64),
    SwapOutParent(u64),
    ParentLoad(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..8u64).prop_map(Op::ParentStore),
        (0..8u64).prop_map(Op::ChildStore),
        (0..8u64).prop_map(Op::SwapOutParent),
        (0..8u64).prop_map(Op::ParentLoad),
    ]
}

fn store(mm: &mut Mm<'_>, p: &mut ProcessMemory, i: u64) {
    mm.prepare_write(p, page(i)).unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn refcounts_match_the_page_tables(ops in proptest::collection::vec(op(), 1..24)) {
        let ram = TestRam::board();
        let mut swap = swap_area(8);
        let mut mm = boot(&ram, &mut swap, SwapPolicy::default());
        let baseline = mm.frames().free_frames();

        let mut parent = mm.new_process(layout()).unwrap();
        for i in 0..8 {
            map_tagged(&mut mm, &ram, &parent, page(i), PteFlags::USER_RW, i);
        }
        let mut child = mm.fork(&parent).unwrap();

        for op in ops {
            match op {
                Op::ParentStore(i) => store(&mut mm, &mut parent, i),
                Op::ChildStore(i) => store(&mut mm, &mut child, i),
                Op::ParentLoad(i) => {
                    if entry(&mm, &parent, page(i)).is_swapped() {
                        mm.swap_in(&parent, page(i)).unwrap();
                    }
                    prop_assert_eq!(tag_at(&mm, &ram, &parent, page(i)), i);
                }
                Op::SwapOutParent(i) => {
                    let e = entry(&mm, &parent, page(i));
                    if e.valid() && mm.frames().page_count(e.frame()) == 1 {
                        mm.swap_out(&parent, page(i)).unwrap();
                    }
                }
            }
            for (frame, refs) in mapped_frames(&mm, &[&parent, &child]) {
                prop_assert_eq!(mm.frames().page_count(frame), refs);
            }
        }

        mm.destroy(child);
        mm.destroy(parent);
        prop_assert_eq!(mm.frames().free_frames(), baseline);
        prop_assert_eq!(mm.swap().slots().used(), 0);
    }
}
