/// RAII guard that masks supervisor interrupts on creation and restores them
/// on drop.
///
/// `IrqGuard::new()` clears `sstatus.SIE` and remembers whether it was set.
/// On drop, `SIE` is set again **only** if it was set before, so guards nest.
///
/// On targets other than `riscv64` there are no interrupts to mask and the
/// guard does nothing; this keeps host-side tests of the locking code
/// meaningful.
///
/// # Examples
///
/// ```
/// use kernel_sync::IrqGuard;
///
/// {
///     let _g = IrqGuard::new(); // interrupts masked here
///     // critical section
/// }
/// // previous interrupt state restored
/// ```
pub struct IrqGuard {
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            were_enabled: mask_interrupts(),
        }
    }

    /// Whether interrupts were enabled when the guard was taken.
    #[inline]
    #[must_use]
    pub const fn were_enabled(&self) -> bool {
        self.were_enabled
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            unmask_interrupts();
        }
    }
}

#[cfg(target_arch = "riscv64")]
#[inline]
fn mask_interrupts() -> bool {
    // SAFETY: the kernel runs in S-mode.
    unsafe { kernel_registers::sstatus::disable_interrupts() }
}

#[cfg(target_arch = "riscv64")]
#[inline]
fn unmask_interrupts() {
    // SAFETY: only re-enables what `mask_interrupts` observed as enabled.
    unsafe { kernel_registers::sstatus::enable_interrupts() }
}

#[cfg(not(target_arch = "riscv64"))]
#[inline]
const fn mask_interrupts() -> bool {
    false
}

#[cfg(not(target_arch = "riscv64"))]
#[inline]
const fn unmask_interrupts() {}
