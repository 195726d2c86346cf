use crate::IrqGuard;
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

/// Interrupt-masking lock for single-hart kernel state.
///
/// Acquiring masks interrupts first and then claims the held flag. A second
/// acquisition while the guard is alive can only come from the same hart
/// (e.g. a trap taken inside the critical section calling back into the
/// memory subsystem) and is a kernel bug, so it panics rather than spinning
/// forever.
pub struct IrqLock<T> {
    held: AtomicBool,
    inner: UnsafeCell<T>,
}

// Safety: access is serialized through the held flag.
unsafe impl<T: Send> Sync for IrqLock<T> {}

impl<T> IrqLock<T> {
    #[must_use]
    pub const fn new(inner: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            inner: UnsafeCell::new(inner),
        }
    }

    /// Try once; `None` if the lock is already held.
    #[inline]
    #[must_use]
    pub fn try_lock(&self) -> Option<IrqLockGuard<'_, T>> {
        let irq = IrqGuard::new();
        if self
            .held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(IrqLockGuard {
                lock: self,
                _irq: irq,
            })
        } else {
            None
        }
    }

    /// Mask interrupts and take the lock.
    ///
    /// # Panics
    /// If the lock is already held.
    #[inline]
    #[must_use]
    pub fn lock(&self) -> IrqLockGuard<'_, T> {
        match self.try_lock() {
            Some(guard) => guard,
            None => panic!("IrqLock re-entered while held"),
        }
    }

    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.lock();
        f(&mut g)
    }

    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

/// Field order matters: the flag is released before interrupts are restored.
pub struct IrqLockGuard<'a, T> {
    lock: &'a IrqLock<T>,
    _irq: IrqGuard,
}

impl<T> Deref for IrqLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> DerefMut for IrqLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T> Drop for IrqLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}
