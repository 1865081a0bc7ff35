// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The machine capability consumed by the kernel.
//!
//! Everything architecture-specific -- port I/O, the cycle counter, the timer,
//! the console sink, and the actual mechanics of a context switch -- sits
//! behind the [`Platform`] trait. The kernel core calls nothing else, which is
//! what keeps it portable and testable: a bare-metal port wraps a few
//! instructions per method, while [`fake::FakePlatform`] gives tests a machine
//! with a programmable clock.

use core::fmt;

pub mod fake;

macro_rules! uassert {
    ($cond:expr) => {
        if !$cond {
            panic!("Assertion failed!");
        }
    };
}

/// Kernel diagnostic logging. Output is clamped to one console line of at
/// most [`LOG_LINE_MAX`] bytes so a log call has a fixed worst-case cost.
macro_rules! klog {
    ($platform:expr, $($args:tt)*) => {
        $crate::platform::log_args(&mut $platform, format_args!($($args)*))
    };
}

/// Longest diagnostic line emitted by `klog!`, newline excluded.
pub const LOG_LINE_MAX: usize = 256;

/// Narrow capability interface to the machine.
///
/// Methods take `&mut self` even where a particular implementation would not
/// need it; reading a hardware cycle counter or poking an I/O port is a
/// machine interaction, not a pure function.
pub trait Platform {
    /// Delivers bytes to the console sink. This is the only output path for
    /// kernel diagnostics and for `write(fd = 1)`.
    fn console_write(&mut self, bytes: &[u8]);

    /// Programs the periodic timer to fire `hz` times per second.
    fn timer_program(&mut self, hz: u32);

    /// Reads one byte from an I/O port.
    fn io_port_in8(&mut self, port: u16) -> u8;

    /// Writes one byte to an I/O port.
    fn io_port_out8(&mut self, port: u16, value: u8);

    /// Reads a 16-bit value from an I/O port.
    fn io_port_in16(&mut self, port: u16) -> u16;

    /// Writes a 16-bit value to an I/O port.
    fn io_port_out16(&mut self, port: u16, value: u16);

    /// Reads a 32-bit value from an I/O port.
    fn io_port_in32(&mut self, port: u16) -> u32;

    /// Writes a 32-bit value to an I/O port.
    fn io_port_out32(&mut self, port: u16, value: u32);

    /// Reads the monotonic hardware cycle counter used for WCET measurement.
    fn cycle_counter_read(&mut self) -> u64;

    /// Performs the architecture-specific part of a context switch between
    /// the task slots `from` and `to`. The kernel has already updated all of
    /// its own bookkeeping when this is called.
    fn context_switch(&mut self, from: usize, to: usize);

    /// Invalidates the instruction cache for a range whose permissions just
    /// changed. Implementations without an icache leave the default no-op.
    fn flush_icache(&mut self, base: usize, len: usize) {
        let _ = (base, len);
    }

    /// Halts or resets the machine. Only reached from the fatal-error path.
    fn reset(&mut self) -> !;
}

/// Writes one formatted, newline-terminated diagnostic line to the console,
/// truncating at [`LOG_LINE_MAX`] bytes.
pub fn log_args<P: Platform>(platform: &mut P, args: fmt::Arguments<'_>) {
    let mut writer = BoundedConsole {
        platform,
        remaining: LOG_LINE_MAX,
    };
    // A formatting error here means a Display impl lied; there is nothing
    // useful to do about it on the log path.
    let _ = fmt::Write::write_fmt(&mut writer, args);
    writer.platform.console_write(b"\n");
}

/// `fmt::Write` adapter over the console sink that stops after a fixed
/// number of bytes instead of letting a malformed message run away.
struct BoundedConsole<'a, P: Platform> {
    platform: &'a mut P,
    remaining: usize,
}

impl<P: Platform> fmt::Write for BoundedConsole<'_, P> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let n = bytes.len().min(self.remaining);
        if n != 0 {
            self.platform.console_write(&bytes[..n]);
            self.remaining -= n;
        }
        Ok(())
    }
}
