// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel, applications, and
//! monitor tooling.
//!
//! Everything in this crate is sized and numbered at compile time. The kernel
//! never invents values at runtime that are not representable here, which is
//! what lets an external monitor decode kernel state without a schema
//! exchange.

#![no_std]

use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Number of task control block slots. Fixed for determinism.
pub const MAX_TASKS: usize = 32;

/// Maximum length of a task name, in bytes.
pub const MAX_TASK_NAME: usize = 16;

/// Number of IPC channel slots.
pub const MAX_CHANNELS: usize = 16;

/// Number of messages in the global IPC pool.
pub const MAX_MESSAGES: usize = 32;

/// Maximum payload carried by a single IPC message, in bytes. This also bounds
/// the number of bytes `write` will move to the console in one call.
pub const MAX_MESSAGE_SIZE: usize = 256;

/// Maximum queue depth of a single channel.
pub const CHANNEL_MAX_DEPTH: u32 = 8;

/// Kernel stack reservation per task, in bytes.
pub const KERNEL_STACK_SIZE: usize = 4096;

/// User stack reservation per task, in bytes.
pub const USER_STACK_SIZE: usize = 8192;

/// Highest valid syscall number.
pub const SYS_MAX: u32 = 63;

/// Number of entries in the syscall table.
pub const SYS_COUNT: usize = SYS_MAX as usize + 1;

/// Ticks between two runs of the real-time deadline sweep.
pub const DEADLINE_CHECK_INTERVAL: u64 = 100;

/// Kernel tick rate programmed into the timer at startup.
pub const TIMER_HZ: u32 = 1000;

/// Budget for a single pass through the interrupt dispatch path, in cycles.
/// Exceeding it is recorded as an overrun and fails the health check.
pub const MAX_IRQ_CYCLES: u64 = 2000;

/// Number of interrupt vectors tracked by the kernel.
pub const NUM_VECTORS: usize = 256;

/// Vector taken by the periodic timer.
pub const TIMER_VECTOR: u8 = 32;

/// Software interrupt vector used for syscall entry.
pub const SYSCALL_VECTOR: u8 = 0x80;

/// Time slice handed to non-real-time tasks on dispatch, in ticks.
pub const DEFAULT_TIME_SLICE: u32 = 10;

/// Size of a page for the W^X policy engine.
pub const PAGE_SIZE: usize = 4096;

/// Bottom of the user-space window accepted by the W^X policy.
pub const USER_SPACE_BASE: usize = 0x0040_0000;

/// Top (exclusive) of the user-space window accepted by the W^X policy.
pub const USER_SPACE_LIMIT: usize = 0xBF00_0000;

/// Names a task for the lifetime of the system.
///
/// Process identifiers are handed out monotonically; identifier 0 is reserved
/// for the idle task, which exists from boot and is never destroyed. A `Pid`
/// is *not* a slot index -- slots are recycled, identifiers are not.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Default,
)]
#[repr(transparent)]
pub struct Pid(pub u32);

impl Pid {
    /// The idle task's identifier.
    pub const IDLE: Self = Self(0);
}

/// Indicates priority of a task.
///
/// Priorities are small numbers starting from zero. Numerically lower
/// priorities are more important, so Priority 0 is the most likely to be
/// scheduled, followed by 1, and so forth.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`,
/// to keep us from confusing ourselves on whether `>` means numerically
/// greater / less important, or more important / numerically smaller.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Default,
    Serialize,
    Deserialize,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const KERNEL: Self = Self(0);
    pub const REALTIME: Self = Self(1);
    pub const SYSTEM: Self = Self(2);
    pub const NORMAL: Self = Self(3);
    pub const LOW: Self = Self(4);
    pub const IDLE: Self = Self(5);

    /// Checks if `self` is strictly more important than `other`.
    ///
    /// This is easier to read than comparing the numeric values of the
    /// priorities, since lower numbers are more important.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 < other.0
    }
}

/// Security level of a task, 0..=3. Numerically *higher* levels carry more
/// authority, which is the opposite convention from `Priority` -- another
/// reason neither type implements `Ord`.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Default,
    Serialize,
    Deserialize,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
)]
#[repr(transparent)]
pub struct SecurityLevel(pub u8);

impl SecurityLevel {
    pub const USER: Self = Self(0);
    pub const SYSTEM: Self = Self(1);
    pub const SECURE: Self = Self(2);
    pub const KERNEL: Self = Self(3);

    /// Highest representable level.
    pub const MAX: Self = Self::KERNEL;

    /// Checks whether a task at this level clears a gate requiring `min`.
    pub fn satisfies(self, min: Self) -> bool {
        self.0 >= min.0
    }
}

/// Why a Blocked task is blocked.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum WaitReason {
    /// Waiting for the tick recorded in the task's wake field.
    Sleep,
    /// Waiting on an application-defined event code.
    Event(u32),
}

/// State used to make status and scheduling decisions.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TaskState {
    /// In the ready queue, waiting for the CPU.
    Ready,
    /// Currently executing. Exactly one task is in this state at any kernel
    /// exit point.
    Running,
    /// Off the ready queue until its wait reason clears.
    Blocked(WaitReason),
    /// Administratively stopped; ignored by the scheduler.
    Suspended,
    /// Exited, occupying its slot until reaped.
    Zombie,
}

impl Default for TaskState {
    fn default() -> Self {
        TaskState::Ready
    }
}

/// Policy used for admitting and ordering real-time tasks.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SchedMode {
    /// Earliest-deadline-first: admission up to total utilization 1, ordering
    /// by absolute deadline.
    Edf,
    /// Rate-monotonic: admission up to the Liu-Layland bound, ordering by
    /// period.
    Rms,
}

impl Default for SchedMode {
    fn default() -> Self {
        SchedMode::Edf
    }
}

/// Stable error taxonomy. The numeric values are ABI: user code sees them
/// negated in the syscall return register, and monitor tooling decodes them
/// from counters and logs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(i32)]
pub enum Error {
    /// Operation not permitted (failed the security-level gate).
    Perm = 1,
    /// No such entity (task, channel).
    NoEnt = 2,
    /// Interrupted operation.
    Intr = 3,
    /// I/O error.
    Io = 4,
    /// Table or pool exhausted, or admission bound exceeded.
    NoMem = 5,
    /// Caller lacks access rights on an existing object.
    Acces = 6,
    /// Bad address passed where the kernel must dereference.
    Fault = 7,
    /// Resource momentarily unavailable; retry or back off.
    Busy = 8,
    /// Invalid argument.
    Inval = 9,
    /// Syscall number not implemented.
    NoSys = 10,
    /// Real-time deadline missed.
    Deadline = 11,
    /// Security policy violation (W^X, pledge).
    Security = 12,
    /// Declared WCET bound exceeded.
    Wcet = 13,
}

impl Error {
    /// The positive code as it appears in the taxonomy table.
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// The value placed in the syscall return register: the negated code.
    pub const fn as_sysret(self) -> i64 {
        -(self as i32 as i64)
    }
}

/// Enumeration of syscall numbers. The numbering is deliberately sparse;
/// gaps are reserved and return `NoSys`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Sysnum {
    Exit = 0,
    Fork = 1,
    Exec = 2,
    Wait = 3,
    GetPid = 4,
    Kill = 5,

    Brk = 10,
    Mmap = 11,
    Munmap = 12,
    Mprotect = 13,

    Open = 20,
    Close = 21,
    Read = 22,
    Write = 23,
    Lseek = 24,
    Stat = 25,

    RtCreate = 30,
    RtDelete = 31,
    RtYield = 32,
    RtSleep = 33,
    RtGetTime = 34,
    RtSetPrio = 35,

    SetUid = 40,
    GetUid = 41,
    SetSec = 42,
    GetSec = 43,
    Pledge = 44,

    Pipe = 50,
    MsgQueue = 51,
    MsgSend = 52,
    MsgRecv = 53,

    Ioctl = 60,
    InPort = 61,
    OutPort = 62,
}

/// We're using an explicit `TryFrom` impl for `Sysnum` instead of
/// `FromPrimitive` because the kernel doesn't currently depend on `num-traits`
/// and this seems okay.
impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, ()> {
        match x {
            0 => Ok(Self::Exit),
            1 => Ok(Self::Fork),
            2 => Ok(Self::Exec),
            3 => Ok(Self::Wait),
            4 => Ok(Self::GetPid),
            5 => Ok(Self::Kill),
            10 => Ok(Self::Brk),
            11 => Ok(Self::Mmap),
            12 => Ok(Self::Munmap),
            13 => Ok(Self::Mprotect),
            20 => Ok(Self::Open),
            21 => Ok(Self::Close),
            22 => Ok(Self::Read),
            23 => Ok(Self::Write),
            24 => Ok(Self::Lseek),
            25 => Ok(Self::Stat),
            30 => Ok(Self::RtCreate),
            31 => Ok(Self::RtDelete),
            32 => Ok(Self::RtYield),
            33 => Ok(Self::RtSleep),
            34 => Ok(Self::RtGetTime),
            35 => Ok(Self::RtSetPrio),
            40 => Ok(Self::SetUid),
            41 => Ok(Self::GetUid),
            42 => Ok(Self::SetSec),
            43 => Ok(Self::GetSec),
            44 => Ok(Self::Pledge),
            50 => Ok(Self::Pipe),
            51 => Ok(Self::MsgQueue),
            52 => Ok(Self::MsgSend),
            53 => Ok(Self::MsgRecv),
            60 => Ok(Self::Ioctl),
            61 => Ok(Self::InPort),
            62 => Ok(Self::OutPort),
            _ => Err(()),
        }
    }
}

/// Raw syscall argument frame, as deposited by the software-interrupt entry
/// sequence. The layout is ABI: ports fill this directly from saved
/// registers.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
)]
#[repr(C)]
pub struct SyscallArgs {
    pub arg0: usize,
    pub arg1: usize,
    pub arg2: usize,
    pub arg3: usize,
    pub arg4: usize,
    pub arg5: usize,
}

const_assert_eq!(
    core::mem::size_of::<SyscallArgs>(),
    6 * core::mem::size_of::<usize>()
);

impl From<[usize; 6]> for SyscallArgs {
    fn from(a: [usize; 6]) -> Self {
        Self {
            arg0: a[0],
            arg1: a[1],
            arg2: a[2],
            arg3: a[3],
            arg4: a[4],
            arg5: a[5],
        }
    }
}

/// What a syscall hands back: the value for the return register (negative on
/// error, per the taxonomy) and the measured cost of the handler in cycles.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SyscallResult {
    /// Return value, or a negated `Error` code.
    pub value: i64,
    /// Cycles measured around the handler invocation only.
    pub wcet: u64,
}

impl SyscallResult {
    /// Shorthand for an error return that consumed no measurable handler
    /// time (rejected before invocation).
    pub const fn rejected(e: Error) -> Self {
        Self {
            value: e.as_sysret(),
            wcet: 0,
        }
    }
}

bitflags::bitflags! {
    /// Page permission bits used by the W^X policy engine.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct PageFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        const PRESENT = 1 << 3;
        const USER = 1 << 4;
    }
}

impl PageFlags {
    /// The combination the policy exists to forbid.
    pub fn violates_wx(self) -> bool {
        self.contains(PageFlags::WRITE | PageFlags::EXECUTE)
    }
}

bitflags::bitflags! {
    /// Access bits on an IPC channel. Receiving additionally requires being
    /// the channel's owner, which is not a bit but an identity check.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct ChannelPerms: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const OWNER = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Capability groups a task may pledge itself down to. A syscall whose
    /// group is outside the caller's pledge set fails with
    /// [`Error::Security`], regardless of security level.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct Pledges: u32 {
        /// Task lifecycle: exit, getpid, rt task management, yield.
        const PROC = 1 << 0;
        /// Time: rt_sleep, rt_gettime.
        const TIME = 1 << 1;
        /// Memory permission changes: mprotect.
        const MEM = 1 << 2;
        /// Descriptor I/O: write.
        const FD = 1 << 3;
        /// Message passing: msgqueue, msgsend, msgrecv.
        const IPC = 1 << 4;
        /// Security level manipulation and further pledging.
        const SEC = 1 << 5;
    }
}

/// Point-in-time description of a task, as served to monitor tooling.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub pid: Pid,
    pub parent: Pid,
    pub name: [u8; MAX_TASK_NAME],
    pub state: TaskState,
    pub priority: Priority,
    pub security: SecurityLevel,
    pub cpu_ticks: u64,
    pub exec_count: u32,
    pub total_cycles: u64,
    pub max_cycles: u64,
    pub deadline_misses: u32,
    pub wcet_overruns: u32,
}

/// Accumulated counters for one syscall number.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SyscallStats {
    pub count: u32,
    pub total_cycles: u64,
    pub wcet_violations: u32,
    pub security_violations: u32,
}

/// Point-in-time description of an IPC channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub id: u32,
    pub owner: Pid,
    pub depth: u32,
    pub max_depth: u32,
    pub live_channels: u32,
}

/// Summary of the interrupt subsystem for the health check.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct IrqHealth {
    pub overruns: u32,
    pub nesting: u32,
    pub healthy: bool,
}

/// Marker for secret-dependent data.
///
/// # Contract
///
/// Code operating on the wrapped value must not branch on it and must not
/// use it to index memory; any timing observable from outside must be
/// independent of the value. The wrapper cannot enforce this, but it keeps
/// secrets out of `Debug` output and out of accidental `==` comparisons,
/// and auth paths are expected to compare through [`Self::bytes_eq`]
/// instead of slice equality.
pub struct ConstantTime<T>(T);

impl<T> ConstantTime<T> {
    pub const fn new(value: T) -> Self {
        Self(value)
    }

    /// Surrenders the wrapped value. Code taking it out of the wrapper
    /// takes over the contract.
    pub fn expose(self) -> T {
        self.0
    }
}

impl<T: AsRef<[u8]>> ConstantTime<T> {
    /// Compares against `other` without data-dependent branches: every byte
    /// pair is visited and folded into an accumulator regardless of earlier
    /// differences. Slices of unequal length compare unequal, which leaks
    /// only the lengths.
    pub fn bytes_eq(&self, other: &[u8]) -> bool {
        let a = self.0.as_ref();
        if a.len() != other.len() {
            return false;
        }
        let mut acc = 0u8;
        for (x, y) in a.iter().zip(other) {
            acc |= x ^ y;
        }
        acc == 0
    }
}

impl<T> core::fmt::Debug for ConstantTime<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("ConstantTime(..)")
    }
}
