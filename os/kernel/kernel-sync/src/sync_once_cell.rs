use core::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

const EMPTY: u8 = 0;
const RUNNING: u8 = 1;
const SET: u8 = 2;

/// Write-once cell for kernel singletons.
///
/// There is only one hart, so an initializer that finds another
/// initialization in progress must have been re-entered from within that
/// initializer. That is reported as a panic.
pub struct SyncOnceCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Default for SyncOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncOnceCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == SET {
            // SAFETY: SET is only stored after the value was written.
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// Store `value` unless the cell is already filled, in which case it is
    /// handed back.
    pub fn set(&self, value: T) -> Result<&T, T> {
        if self
            .state
            .compare_exchange(EMPTY, RUNNING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }
        Ok(self.publish(value))
    }

    /// Initialize at most once and return `&T`.
    ///
    /// # Panics
    /// If `init` itself re-enters `get_or_init` on the same cell.
    #[must_use]
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        if let Some(v) = self.get() {
            return v;
        }

        match self
            .state
            .compare_exchange(EMPTY, RUNNING, Ordering::Acquire, Ordering::Acquire)
        {
            Ok(_) => self.publish(init()),
            Err(SET) => self.get().unwrap_or_else(|| unreachable!()),
            Err(_) => panic!("SyncOnceCell initializer re-entered"),
        }
    }

    fn publish(&self, value: T) -> &T {
        // SAFETY: the caller moved the state from EMPTY to RUNNING, so no
        // reference to the slot exists yet.
        let v = unsafe { (*self.value.get()).write(value) };
        self.state.store(SET, Ordering::Release);
        v
    }
}

impl<T> Drop for SyncOnceCell<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == SET {
            // SAFETY: SET means the slot holds an initialized value.
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}

// Safety: shared after SET; initialization is single-writer.
unsafe impl<T: Sync + Send> Sync for SyncOnceCell<T> {}
unsafe impl<T: Send> Send for SyncOnceCell<T> {}
