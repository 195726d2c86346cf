//! # QEMU `virt` Console Support
//!
//! Early console output for kernels running under `qemu-system-riscv64
//! -machine virt`. Characters go through the SBI legacy console extension
//! (`sbi_console_putchar`, EID `0x01`) implemented by OpenSBI, so no UART
//! driver is needed.
//!
//! ```text
//! log::info!  ──► QemuLogger ──► qemu_trace! ──► SbiSink ──► ecall ──► OpenSBI ──► host stdio
//! ```
//!
//! ## Features
//!
//! * `enabled` (default): emit characters. Without it, or on any target other
//!   than `riscv64`, all output is discarded.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::{LevelFilter, info};
//!
//! QemuLogger::new(LevelFilter::Debug).init().expect("logger initialization");
//! info!("memory subsystem up");
//! ```
//!
//! Run QEMU with `-nographic` (or `-serial stdio`) to see the output.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::QemuLogger;

#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// SBI legacy extension: console putchar.
    #[cfg(all(feature = "enabled", target_arch = "riscv64"))]
    const SBI_CONSOLE_PUTCHAR: usize = 0x01;

    /// Write a single byte to the SBI console.
    #[cfg(all(feature = "enabled", target_arch = "riscv64"))]
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn sbi_putc(c: u8) {
        unsafe {
            core::arch::asm!(
                "ecall",
                inlateout("a0") usize::from(c) => _,
                in("a7") SBI_CONSOLE_PUTCHAR,
                options(nostack)
            );
        }
    }

    #[cfg(not(all(feature = "enabled", target_arch = "riscv64")))]
    #[inline]
    pub const fn sbi_putc(_c: u8) {}

    pub struct SbiSink;

    impl Write for SbiSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for b in s.bytes() {
                sbi_putc(b);
            }
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        // Best-effort debug output.
        let _ = fmt::write(&mut SbiSink, args);
    }
}

/// Print straight to the SBI console, bypassing `log`.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
