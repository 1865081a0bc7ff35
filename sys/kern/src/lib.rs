// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! AtomicOS deterministic kernel core.
//!
//! This is the hardware-independent portion of the operating system: the
//! real-time scheduler, the WCET-measured syscall dispatcher, the interrupt
//! dispatch path, the W^X memory-protection policy, and the static-allocation
//! IPC broker. Everything the kernel needs from a machine arrives through the
//! [`platform::Platform`] capability, so the same code runs on a bare target
//! and under the hosted test harness.
//!
//! # Design principles
//!
//! While this isn't a *deeply* principled kernel, there are some basic ideas
//! that appear consistently.
//!
//! 1. Static configuration. Every table -- tasks, channels, messages, syscall
//!    metadata, interrupt vectors -- takes its shape at compile time; nothing
//!    is allocated at steady state.
//! 2. Determinism before throughput. Work done on any interrupt or syscall
//!    path is bounded, and the bound is measured and recorded rather than
//!    assumed.
//! 3. Diagnostics over enforcement. A WCET overrun or a missed deadline is
//!    counted and reported; it does not kill the offender. The one exception
//!    is W^X, which blocks the mapping outright.
//! 4. A strong preference for safe code where reasonable. The `unsafe` in
//!    this tree is confined to the validated user-memory access in [`umem`]
//!    and the debugger-facing death-report statics in [`fail`].

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
pub mod platform;

pub mod diag;
pub mod err;
pub mod fail;
pub mod ipc;
pub mod irq;
pub mod readyq;
pub mod sched;
pub mod startup;
pub mod syscalls;
pub mod task;
pub mod time;
pub mod umem;
pub mod wx;

pub use startup::Kernel;
