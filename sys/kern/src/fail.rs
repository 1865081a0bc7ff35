// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for recording kernel deaths such that they can be found by
//! tooling.
//!
//! This module defines the following binary interface to debuggers:
//!
//! - `KERNEL_HAS_FAILED` is a `bool`. It is zero (false) from boot, and set
//!   to one (true) if the kernel reaches [`die`]. Any other value means the
//!   kernel has either not booted or has corrupted memory on the way down.
//!
//! - `KERNEL_EPITAPH` is an array of `u8`. The `die` routine writes as much
//!   of the failure reason into this buffer (as UTF-8) as possible,
//!   truncating if the buffer fills. For printing, trim trailing NUL bytes.

use core::fmt::{Display, Write};

use crate::platform::Platform;

const EPITAPH_LEN: usize = 128;

/// Flag that gets set to `true` on the way down, giving tools a
/// one-stop-shop for doing kernel triage.
#[used]
static mut KERNEL_HAS_FAILED: bool = false;

/// The "epitaph" buffer records up to `EPITAPH_LEN` bytes of description of
/// the event that killed the kernel, padded with NULs.
#[used]
static mut KERNEL_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

fn begin_epitaph() -> &'static mut [u8; EPITAPH_LEN] {
    // Safety: we only access this flag here, at most once per boot, and
    // never from a context where concurrency or nested interrupts are live.
    let previous_fail = unsafe {
        core::ptr::replace(core::ptr::addr_of_mut!(KERNEL_HAS_FAILED), true)
    };
    if previous_fail {
        // A second death on the way down suggests a recursive failure. We
        // can't very well report it, so we spin.
        loop {
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        }
    }

    // Safety: only one execution per boot gets past the flag above, so the
    // mutable reference is unique.
    unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_EPITAPH) }
}

/// Records `msg` as the kernel's last words and halts the machine.
pub fn die<P: Platform>(platform: &mut P, msg: impl Display) -> ! {
    let buf = begin_epitaph();
    let mut writer = Eulogist { dest: &mut buf[..] };
    write!(writer, "{msg}").ok();
    platform.reset()
}

struct Eulogist<'a> {
    dest: &'a mut [u8],
}

impl Write for Eulogist<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let s = s.as_bytes();
        let n = s.len().min(self.dest.len());
        let (dest, leftovers) = {
            let taken = core::mem::take(&mut self.dest);
            taken.split_at_mut(n)
        };
        dest.copy_from_slice(&s[..n]);
        self.dest = leftovers;
        Ok(())
    }
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    // No platform in reach here; record what we can and spin.
    let buf = begin_epitaph();
    let mut writer = Eulogist { dest: &mut buf[..] };
    write!(writer, "{info}").ok();
    loop {
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }
}
