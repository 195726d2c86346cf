use kernel_sync::{IrqGuard, IrqLock, SyncOnceCell};
use std::panic;

#[test]
fn basic_lock_and_raii() {
    let l = IrqLock::new(0_u32);

    {
        let mut g = l.lock();
        *g = 41;
        assert!(l.is_locked());
    }
    assert!(!l.is_locked());

    {
        let mut g = l.lock();
        *g += 1;
        assert_eq!(*g, 42);
    }
}

#[test]
fn try_lock_fails_while_held() {
    let l = IrqLock::new(1u8);

    let g1 = l.try_lock();
    assert!(g1.is_some());
    assert!(l.try_lock().is_none());

    drop(g1);
    assert!(l.try_lock().is_some());
}

#[test]
#[should_panic(expected = "re-entered")]
fn nested_lock_panics() {
    let l = IrqLock::new(());
    let _outer = l.lock();
    let _inner = l.lock();
}

#[test]
fn lock_is_released_on_panic() {
    let l = IrqLock::new(0u32);

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        l.with_lock(|v| {
            *v = 123;
            panic!("boom");
        });
    }));
    assert!(res.is_err(), "expected panic");

    assert_eq!(l.with_lock(|v| *v), 123);
}

#[test]
fn get_mut_allows_direct_mutation() {
    let mut l = IrqLock::new(vec![1, 2, 3]);
    l.get_mut().push(4);
    assert_eq!(l.lock().as_slice(), &[1, 2, 3, 4]);
}

#[test]
fn irq_guard_is_inert_on_host() {
    let g = IrqGuard::new();
    assert!(!g.were_enabled());
}

#[test]
fn once_cell_initializes_once() {
    let cell = SyncOnceCell::new();
    assert!(cell.get().is_none());
    assert_eq!(*cell.get_or_init(|| 7), 7);
    assert_eq!(*cell.get_or_init(|| 8), 7);
    assert_eq!(cell.set(9), Err(9));
    assert_eq!(cell.get(), Some(&7));
}

#[test]
fn once_cell_set_then_get() {
    let cell = SyncOnceCell::new();
    assert_eq!(cell.set(String::from("a")).map(String::as_str), Ok("a"));
    assert_eq!(cell.get().map(String::as_str), Some("a"));
}

#[test]
#[should_panic(expected = "re-entered")]
fn once_cell_reentrant_init_panics() {
    let cell = SyncOnceCell::new();
    let _ = cell.get_or_init(|| *cell.get_or_init(|| 1) + 1);
}
