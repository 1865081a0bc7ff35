// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The deterministic syscall dispatcher.
//!
//! Dispatch follows a fixed contract, in order: range-check the number, look
//! up the metadata entry, apply the security-level gate, apply the pledge
//! gate, snapshot the cycle counter, invoke the handler, snapshot again, and
//! account the measurement. The measured cost wraps the handler *only* --
//! scheduling triggered by the handler's hint happens after the second
//! snapshot.
//!
//! A handler that exceeds its declared WCET bound is counted and reported,
//! never terminated: bounds here are diagnostics, not watchdogs.
//!
//! # Handler implementations
//!
//! Handlers are methods on [`Kernel`] with the signature
//!
//! ```ignore
//! fn handler(&mut self, args: &SyscallArgs) -> SysOutcome;
//! ```
//!
//! returning the register value plus a [`NextTask`] hint. Multi-argument
//! syscalls read their arguments through proxy types (`AsWriteArgs` and
//! friends) that assign names and types to the raw frame.

use abi::{
    Error, PageFlags, Pid, Pledges, Priority, SecurityLevel, SyscallArgs,
    SyscallResult, SyscallStats, Sysnum, MAX_MESSAGE_SIZE, SYS_COUNT,
    SYS_MAX,
};

use crate::platform::Platform;
use crate::task::NextTask;
use crate::umem::USlice;
use crate::Kernel;

/// What a handler produces: the value for the return register and a
/// scheduling hint applied after measurement.
pub type SysOutcome = Result<(i64, NextTask), Error>;

/// Metadata for one syscall number. The table of these is immutable after
/// build; per-call statistics live in [`SyscallStatsTable`].
#[derive(Copy, Clone, Debug)]
pub struct SyscallEntry {
    /// The implemented syscall, or `None` for reserved numbers.
    pub num: Option<Sysnum>,
    /// Declared WCET bound in cycles. Diagnostic, not enforced.
    pub wcet_bound: u64,
    /// Minimum security level required to invoke.
    pub min_security: SecurityLevel,
    /// Number of meaningful arguments.
    pub param_count: u8,
    /// Whether the handler tolerates interruption.
    pub interruptible: bool,
    /// Whether a real-time task can call this without losing determinism.
    pub rt_safe: bool,
    /// Capability group checked against the caller's pledge set.
    pub pledge: Pledges,
}

const NOT_IMPLEMENTED: SyscallEntry = SyscallEntry {
    num: None,
    wcet_bound: 0,
    min_security: SecurityLevel::USER,
    param_count: 0,
    interruptible: false,
    rt_safe: false,
    pledge: Pledges::empty(),
};

const fn entry(
    num: Sysnum,
    wcet_bound: u64,
    min_security: SecurityLevel,
    param_count: u8,
    interruptible: bool,
    rt_safe: bool,
    pledge: Pledges,
) -> SyscallEntry {
    SyscallEntry {
        num: Some(num),
        wcet_bound,
        min_security,
        param_count,
        interruptible,
        rt_safe,
        pledge,
    }
}

/// The syscall metadata table, indexed by syscall number.
static SYSCALL_TABLE: [SyscallEntry; SYS_COUNT] = build_table();

const fn build_table() -> [SyscallEntry; SYS_COUNT] {
    let mut t = [NOT_IMPLEMENTED; SYS_COUNT];
    let u = SecurityLevel::USER;
    let s = SecurityLevel::SYSTEM;

    t[Sysnum::Exit as usize] =
        entry(Sysnum::Exit, 1000, u, 1, false, true, Pledges::PROC);
    t[Sysnum::GetPid as usize] =
        entry(Sysnum::GetPid, 100, u, 0, true, true, Pledges::PROC);
    t[Sysnum::Mprotect as usize] =
        entry(Sysnum::Mprotect, 1000, u, 3, false, false, Pledges::MEM);
    t[Sysnum::Write as usize] =
        entry(Sysnum::Write, 2000, u, 3, true, false, Pledges::FD);
    t[Sysnum::RtCreate as usize] =
        entry(Sysnum::RtCreate, 2000, s, 4, false, false, Pledges::PROC);
    t[Sysnum::RtDelete as usize] =
        entry(Sysnum::RtDelete, 1000, s, 1, false, false, Pledges::PROC);
    t[Sysnum::RtYield as usize] =
        entry(Sysnum::RtYield, 300, u, 0, false, true, Pledges::PROC);
    t[Sysnum::RtSleep as usize] =
        entry(Sysnum::RtSleep, 400, u, 1, false, true, Pledges::TIME);
    t[Sysnum::RtGetTime as usize] =
        entry(Sysnum::RtGetTime, 100, u, 0, true, true, Pledges::TIME);
    t[Sysnum::RtSetPrio as usize] =
        entry(Sysnum::RtSetPrio, 200, u, 1, false, true, Pledges::PROC);
    t[Sysnum::SetSec as usize] = entry(
        Sysnum::SetSec,
        300,
        SecurityLevel::SECURE,
        1,
        false,
        false,
        Pledges::SEC,
    );
    t[Sysnum::GetSec as usize] =
        entry(Sysnum::GetSec, 100, u, 0, true, true, Pledges::SEC);
    t[Sysnum::Pledge as usize] =
        entry(Sysnum::Pledge, 500, u, 1, false, true, Pledges::SEC);
    t[Sysnum::MsgQueue as usize] =
        entry(Sysnum::MsgQueue, 1500, u, 1, false, false, Pledges::IPC);
    t[Sysnum::MsgSend as usize] =
        entry(Sysnum::MsgSend, 2000, u, 3, false, true, Pledges::IPC);
    t[Sysnum::MsgRecv as usize] =
        entry(Sysnum::MsgRecv, 2000, u, 3, false, true, Pledges::IPC);
    t
}

/// Returns the metadata entry for a syscall number, if it is in range.
pub fn table_entry(number: u32) -> Option<&'static SyscallEntry> {
    SYSCALL_TABLE.get(number as usize)
}

/// Per-syscall accumulated counters.
pub struct SyscallStatsTable {
    count: [u32; SYS_COUNT],
    total_cycles: [u64; SYS_COUNT],
    wcet_violations: [u32; SYS_COUNT],
    security_violations: [u32; SYS_COUNT],
}

impl SyscallStatsTable {
    pub(crate) fn new() -> Self {
        Self {
            count: [0; SYS_COUNT],
            total_cycles: [0; SYS_COUNT],
            wcet_violations: [0; SYS_COUNT],
            security_violations: [0; SYS_COUNT],
        }
    }

    /// Counters for one syscall number, if it is in range.
    pub fn get(&self, number: u32) -> Option<SyscallStats> {
        let i = number as usize;
        if i >= SYS_COUNT {
            return None;
        }
        Some(SyscallStats {
            count: self.count[i],
            total_cycles: self.total_cycles[i],
            wcet_violations: self.wcet_violations[i],
            security_violations: self.security_violations[i],
        })
    }
}

/// Reference proxy for write argument registers.
pub struct AsWriteArgs<'a>(&'a SyscallArgs);

impl AsWriteArgs<'_> {
    pub fn fd(&self) -> usize {
        self.0.arg0
    }

    /// The caller's buffer, clamped to the per-call copy bound.
    pub fn buffer(&self) -> Result<USlice<u8>, Error> {
        let mut s = USlice::from_raw(self.0.arg1, self.0.arg2)?;
        s.truncate(MAX_MESSAGE_SIZE);
        Ok(s)
    }

    pub fn requested_len(&self) -> usize {
        self.0.arg2
    }
}

/// Reference proxy for rt_create argument registers.
pub struct AsRtCreateArgs<'a>(&'a SyscallArgs);

impl AsRtCreateArgs<'_> {
    pub fn period(&self) -> u64 {
        self.0.arg0 as u64
    }

    pub fn wcet(&self) -> u64 {
        self.0.arg1 as u64
    }

    pub fn entry_point(&self) -> usize {
        self.0.arg2
    }

    /// Relative deadline; zero means "use the period".
    pub fn deadline(&self) -> u64 {
        if self.0.arg3 == 0 {
            self.period()
        } else {
            self.0.arg3 as u64
        }
    }
}

/// Reference proxy for mprotect argument registers.
pub struct AsMprotectArgs<'a>(&'a SyscallArgs);

impl AsMprotectArgs<'_> {
    pub fn addr(&self) -> usize {
        self.0.arg0
    }

    pub fn len(&self) -> usize {
        self.0.arg1
    }

    pub fn prot(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0.arg2 as u32)
    }
}

/// Reference proxy for msgsend/msgrecv argument registers.
pub struct AsMsgArgs<'a>(&'a SyscallArgs);

impl AsMsgArgs<'_> {
    pub fn channel(&self) -> u32 {
        self.0.arg0 as u32
    }

    pub fn buffer(&self) -> Result<USlice<u8>, Error> {
        USlice::from_raw(self.0.arg1, self.0.arg2)
    }
}

/// Adds the argument-proxy constructors to the raw frame type.
pub trait SyscallArgsExt {
    fn as_write_args(&self) -> AsWriteArgs<'_>;
    fn as_rt_create_args(&self) -> AsRtCreateArgs<'_>;
    fn as_mprotect_args(&self) -> AsMprotectArgs<'_>;
    fn as_msg_args(&self) -> AsMsgArgs<'_>;
}

impl SyscallArgsExt for SyscallArgs {
    fn as_write_args(&self) -> AsWriteArgs<'_> {
        AsWriteArgs(self)
    }

    fn as_rt_create_args(&self) -> AsRtCreateArgs<'_> {
        AsRtCreateArgs(self)
    }

    fn as_mprotect_args(&self) -> AsMprotectArgs<'_> {
        AsMprotectArgs(self)
    }

    fn as_msg_args(&self) -> AsMsgArgs<'_> {
        AsMsgArgs(self)
    }
}

impl<P: Platform> Kernel<P> {
    /// The dispatcher. `number` and `args` come straight from the software
    /// interrupt entry; nothing has been validated yet.
    pub fn dispatch(&mut self, number: u32, args: &SyscallArgs) -> SyscallResult {
        if number > SYS_MAX {
            return SyscallResult::rejected(Error::NoSys);
        }
        let entry = &SYSCALL_TABLE[number as usize];
        let Some(sysnum) = entry.num else {
            return SyscallResult::rejected(Error::NoSys);
        };
        let idx = number as usize;

        let caller = self.tasks.current_task();
        if !caller.security().satisfies(entry.min_security) {
            self.syscall_stats.security_violations[idx] += 1;
            return SyscallResult::rejected(Error::Perm);
        }
        if !caller.pledges().contains(entry.pledge) {
            self.syscall_stats.security_violations[idx] += 1;
            return SyscallResult::rejected(Error::Security);
        }

        self.syscall_stats.count[idx] += 1;

        let start = self.platform.cycle_counter_read();
        let outcome = self.invoke(sysnum, args);
        let end = self.platform.cycle_counter_read();
        let measured = end.saturating_sub(start);

        self.syscall_stats.total_cycles[idx] += measured;
        if measured > entry.wcet_bound {
            self.syscall_stats.wcet_violations[idx] += 1;
            klog!(
                self.platform,
                "wcet overrun: syscall {} took {} of {}",
                number,
                measured,
                entry.wcet_bound
            );
        }

        let (value, hint) = match outcome {
            Ok((value, hint)) => (value, hint),
            Err(e) => (e.as_sysret(), NextTask::Same),
        };
        match hint {
            NextTask::Same => {}
            NextTask::Other | NextTask::Specific(_) => self.schedule(),
        }
        SyscallResult {
            value,
            wcet: measured,
        }
    }

    fn invoke(&mut self, sysnum: Sysnum, args: &SyscallArgs) -> SysOutcome {
        match sysnum {
            Sysnum::Exit => self.sys_exit(args),
            Sysnum::GetPid => {
                Ok((i64::from(self.tasks.current_task().pid().0), NextTask::Same))
            }
            Sysnum::Mprotect => self.sys_mprotect(args),
            Sysnum::Write => self.sys_write(args),
            Sysnum::RtCreate => self.sys_rt_create(args),
            Sysnum::RtDelete => {
                let hint = self.destroy_task(Pid(args.arg0 as u32))?;
                Ok((0, hint))
            }
            Sysnum::RtYield => self.sys_rt_yield(),
            Sysnum::RtSleep => {
                self.sleep_current(args.arg0 as u64)?;
                Ok((0, NextTask::Other))
            }
            Sysnum::RtGetTime => Ok((self.ticks() as i64, NextTask::Same)),
            Sysnum::RtSetPrio => self.sys_rt_setprio(args),
            Sysnum::SetSec => self.sys_setsec(args),
            Sysnum::GetSec => Ok((
                i64::from(self.tasks.current_task().security().0),
                NextTask::Same,
            )),
            Sysnum::Pledge => {
                let keep = Pledges::from_bits_truncate(args.arg0 as u32);
                self.tasks.current_task_mut().restrict_pledges(keep);
                Ok((0, NextTask::Same))
            }
            Sysnum::MsgQueue => self.sys_msg_queue(args),
            Sysnum::MsgSend => self.sys_msg_send(args),
            Sysnum::MsgRecv => self.sys_msg_recv(args),
            // Reserved numbers never reach here: their table entries carry
            // no Sysnum.
            _ => Err(Error::NoSys),
        }
    }

    fn sys_exit(&mut self, args: &SyscallArgs) -> SysOutcome {
        let pid = self.tasks.current_task().pid();
        let code = args.arg0 as i32;
        klog!(self.platform, "pid {} exited with code {}", pid.0, code);
        let hint = self.destroy_task(pid)?;
        Ok((0, hint))
    }

    fn sys_rt_yield(&mut self) -> SysOutcome {
        let cur = self.tasks.current_slot();
        if cur != crate::task::IDLE_SLOT {
            let mode = self.mode();
            self.tasks
                .current_task_mut()
                .set_state(abi::TaskState::Ready);
            self.ready.insert(&mut self.tasks, cur, mode);
            return Ok((0, NextTask::Other));
        }
        Ok((0, NextTask::Same))
    }

    fn sys_mprotect(&mut self, args: &SyscallArgs) -> SysOutcome {
        let args = args.as_mprotect_args();
        let prot = args.prot();
        if prot.violates_wx() {
            // Count it where the policy counts all such attempts.
            let _ = self.wx.map_page_secure(args.addr(), 0, prot);
            return Err(Error::Security);
        }
        if prot.contains(PageFlags::WRITE) {
            self.make_writable(args.addr(), args.len())?;
        } else if prot.contains(PageFlags::EXECUTE) {
            self.make_executable(args.addr(), args.len())?;
        } else {
            self.make_readonly(args.addr(), args.len())?;
        }
        Ok((0, NextTask::Same))
    }

    fn sys_write(&mut self, args: &SyscallArgs) -> SysOutcome {
        let args = args.as_write_args();
        // Only the console is a file around here.
        if args.fd() != 1 {
            return Err(Error::Inval);
        }
        if args.requested_len() == 0 {
            return Err(Error::Inval);
        }
        let slice = args.buffer()?;
        let bytes = self.tasks.current_task().try_read(&slice)?;
        self.platform.console_write(bytes);
        Ok((bytes.len() as i64, NextTask::Same))
    }

    fn sys_rt_create(&mut self, args: &SyscallArgs) -> SysOutcome {
        let args = args.as_rt_create_args();
        if args.entry_point() == 0 {
            return Err(Error::Inval);
        }
        let pid = self.create_rt_task(
            "rt-task",
            args.entry_point(),
            args.period(),
            args.deadline(),
            args.wcet(),
        )?;
        Ok((i64::from(pid.0), NextTask::Same))
    }

    fn sys_rt_setprio(&mut self, args: &SyscallArgs) -> SysOutcome {
        let prio = args.arg0;
        if prio > usize::from(Priority::IDLE.0) {
            return Err(Error::Inval);
        }
        self.tasks
            .current_task_mut()
            .set_dynamic_priority(Priority(prio as u8));
        Ok((0, NextTask::Same))
    }

    fn sys_setsec(&mut self, args: &SyscallArgs) -> SysOutcome {
        let level = args.arg0;
        if level > usize::from(SecurityLevel::MAX.0) {
            return Err(Error::Inval);
        }
        self.tasks
            .current_task_mut()
            .set_security(SecurityLevel(level as u8));
        Ok((0, NextTask::Same))
    }

    fn sys_msg_queue(&mut self, args: &SyscallArgs) -> SysOutcome {
        let perms = abi::ChannelPerms::from_bits_truncate(args.arg0 as u32);
        let owner = self.tasks.current_task().pid();
        // Channel id, or 0 when the table is full.
        let id = self.ipc.create_channel(owner, perms);
        Ok((i64::from(id), NextTask::Same))
    }

    fn sys_msg_send(&mut self, args: &SyscallArgs) -> SysOutcome {
        let proxy = args.as_msg_args();
        let channel = proxy.channel();
        let slice = proxy.buffer()?;
        let sender = self.tasks.current_task().pid();
        let payload = self.tasks.current_task().try_read(&slice)?;
        self.ipc.send(channel, sender, payload)?;
        Ok((0, NextTask::Same))
    }

    fn sys_msg_recv(&mut self, args: &SyscallArgs) -> SysOutcome {
        let proxy = args.as_msg_args();
        let channel = proxy.channel();
        let mut slice = proxy.buffer()?;
        let receiver = self.tasks.current_task().pid();
        let buf = self.tasks.current_task().try_write(&mut slice)?;
        let full_len = self.ipc.receive(channel, receiver, buf)?;
        Ok((full_len as i64, NextTask::Same))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakePlatform;
    use crate::umem::MemRegion;
    use abi::{ChannelPerms, TaskState};

    fn kernel() -> Kernel<FakePlatform> {
        Kernel::new(FakePlatform::new())
    }

    fn args(a: [usize; 6]) -> SyscallArgs {
        SyscallArgs::from(a)
    }

    /// Creates a task, makes it current, and returns its pid.
    fn run_user_task(k: &mut Kernel<FakePlatform>) -> Pid {
        let pid = k.create_task("user", 0x1000, Priority::NORMAL).unwrap();
        k.schedule();
        assert_eq!(k.tasks.current_task().pid(), pid);
        pid
    }

    /// Leaks a buffer and grants the current task access to it.
    fn grant_buffer(
        k: &mut Kernel<FakePlatform>,
        contents: &[u8],
        atts: PageFlags,
    ) -> usize {
        let buf: &'static mut [u8] =
            Box::leak(contents.to_vec().into_boxed_slice());
        let base = buf.as_ptr() as usize;
        k.tasks
            .current_task_mut()
            .grant_region(MemRegion {
                base,
                size: buf.len(),
                atts,
            })
            .unwrap();
        base
    }

    #[test]
    fn out_of_range_numbers_are_nosys_without_side_effects() {
        let mut k = kernel();
        for n in [SYS_MAX + 1, 100, u32::MAX] {
            let r = k.dispatch(n, &args([0; 6]));
            assert_eq!(r.value, Error::NoSys.as_sysret());
            assert_eq!(r.wcet, 0);
        }
        // Reserved in-range numbers behave identically.
        let r = k.dispatch(Sysnum::Fork as u32, &args([0; 6]));
        assert_eq!(r.value, Error::NoSys.as_sysret());
        assert_eq!(
            k.syscall_stats.get(Sysnum::Fork as u32).unwrap().count,
            0
        );
    }

    #[test]
    fn security_gate_rejects_and_counts() {
        let mut k = kernel();
        run_user_task(&mut k);
        // rt_create requires System level; the caller is User.
        let r = k.dispatch(
            Sysnum::RtCreate as u32,
            &args([1000, 100, 0x2000, 1000, 0, 0]),
        );
        assert_eq!(r.value, Error::Perm.as_sysret());
        let stats = k.syscall_stats.get(Sysnum::RtCreate as u32).unwrap();
        assert_eq!(stats.security_violations, 1);
        assert_eq!(stats.count, 0);
    }

    #[test]
    fn pledge_gate_rejects_unpledged_groups() {
        let mut k = kernel();
        run_user_task(&mut k);
        // Keep PROC only; IPC calls must now fail closed.
        let keep = Pledges::PROC;
        let r = k.dispatch(Sysnum::Pledge as u32, &args([keep.bits() as usize, 0, 0, 0, 0, 0]));
        assert_eq!(r.value, 0);
        let r = k.dispatch(Sysnum::MsgQueue as u32, &args([0; 6]));
        assert_eq!(r.value, Error::Security.as_sysret());
        assert_eq!(
            k.syscall_stats
                .get(Sysnum::MsgQueue as u32)
                .unwrap()
                .security_violations,
            1
        );
        // GetPid is in PROC and still works.
        let r = k.dispatch(Sysnum::GetPid as u32, &args([0; 6]));
        assert!(r.value > 0);
    }

    #[test]
    fn measured_cycles_wrap_the_handler_only() {
        let mut k = kernel();
        let pid = run_user_task(&mut k);
        // Each counter read advances by 3000 fake cycles, so the start/end
        // pair brackets exactly one step; getpid's bound is 100.
        k.platform.cycle_step = 3000;
        let r = k.dispatch(Sysnum::GetPid as u32, &args([0; 6]));
        assert_eq!(r.value, i64::from(pid.0));
        assert_eq!(r.wcet, 3000);
        let stats = k.syscall_stats.get(Sysnum::GetPid as u32).unwrap();
        assert_eq!(stats.wcet_violations, 1);
        assert_eq!(stats.count, 1);
        assert_eq!(stats.total_cycles, 3000);
    }

    #[test]
    fn fast_handlers_stay_inside_their_bounds() {
        let mut k = kernel();
        run_user_task(&mut k);
        let r = k.dispatch(Sysnum::RtGetTime as u32, &args([0; 6]));
        assert_eq!(r.value, 0);
        assert_eq!(r.wcet, 1);
        assert_eq!(
            k.syscall_stats
                .get(Sysnum::RtGetTime as u32)
                .unwrap()
                .wcet_violations,
            0
        );
    }

    #[test]
    fn write_accepts_only_the_console() {
        let mut k = kernel();
        run_user_task(&mut k);
        let base = grant_buffer(&mut k, b"hello", PageFlags::READ);
        let r = k.dispatch(Sysnum::Write as u32, &args([2, base, 5, 0, 0, 0]));
        assert_eq!(r.value, Error::Inval.as_sysret());
        let r = k.dispatch(Sysnum::Write as u32, &args([1, base, 0, 0, 0, 0]));
        assert_eq!(r.value, Error::Inval.as_sysret());
        k.platform.clear_console();
        let r = k.dispatch(Sysnum::Write as u32, &args([1, base, 5, 0, 0, 0]));
        assert_eq!(r.value, 5);
        assert_eq!(k.platform.console(), b"hello");
    }

    #[test]
    fn write_clamps_to_the_copy_bound() {
        let mut k = kernel();
        run_user_task(&mut k);
        let big = vec![b'x'; 400];
        let base = grant_buffer(&mut k, &big, PageFlags::READ);
        k.platform.clear_console();
        let r = k.dispatch(Sysnum::Write as u32, &args([1, base, 400, 0, 0, 0]));
        assert_eq!(r.value, MAX_MESSAGE_SIZE as i64);
        assert_eq!(k.platform.console().len(), MAX_MESSAGE_SIZE);
    }

    #[test]
    fn write_requires_a_granted_buffer() {
        let mut k = kernel();
        run_user_task(&mut k);
        // An address the task was never granted.
        let r = k.dispatch(Sysnum::Write as u32, &args([1, 0xdead_0000, 4, 0, 0, 0]));
        assert_eq!(r.value, Error::Fault.as_sysret());
    }

    #[test]
    fn exit_reschedules_away_from_the_zombie() {
        let mut k = kernel();
        let pid = run_user_task(&mut k);
        let r = k.dispatch(Sysnum::Exit as u32, &args([0; 6]));
        assert_eq!(r.value, 0);
        let slot = k.tasks.by_pid(pid).unwrap();
        assert_eq!(k.tasks.get(slot).state(), TaskState::Zombie);
        // Something else is running now.
        assert_ne!(k.tasks.current_slot(), slot);
        assert_eq!(k.tasks.current_task().state(), TaskState::Running);
    }

    #[test]
    fn rt_create_via_syscall_validates_and_admits() {
        let mut k = kernel();
        let pid = run_user_task(&mut k);
        // Promote the caller so it clears the System gate.
        let slot = k.tasks.by_pid(pid).unwrap();
        k.tasks.get_mut(slot).set_security(SecurityLevel::SYSTEM);

        // Bad entry point.
        let r = k.dispatch(Sysnum::RtCreate as u32, &args([1000, 100, 0, 0, 0, 0]));
        assert_eq!(r.value, Error::Inval.as_sysret());
        // wcet > period.
        let r = k.dispatch(
            Sysnum::RtCreate as u32,
            &args([100, 200, 0x2000, 0, 0, 0]),
        );
        assert_eq!(r.value, Error::Inval.as_sysret());
        // Registers can carry arbitrary bit patterns; an absurd period is
        // rejected before any admission arithmetic sees it.
        let huge = 1usize << 44;
        let r = k.dispatch(
            Sysnum::RtCreate as u32,
            &args([huge, huge, 0x2000, 0, 0, 0]),
        );
        assert_eq!(r.value, Error::Inval.as_sysret());
        // Feasible task admitted; returned value is its pid.
        let r = k.dispatch(
            Sysnum::RtCreate as u32,
            &args([1000, 100, 0x2000, 500, 0, 0]),
        );
        assert!(r.value > 0);
        let rt_slot = k.tasks.by_pid(Pid(r.value as u32)).unwrap();
        let rt = k.tasks.get(rt_slot).rt().unwrap();
        assert_eq!(rt.period, 1000);
        assert_eq!(rt.deadline, 500);
    }

    #[test]
    fn rt_sleep_and_gettime_via_syscall() {
        let mut k = kernel();
        let pid = run_user_task(&mut k);
        let r = k.dispatch(Sysnum::RtGetTime as u32, &args([0; 6]));
        assert_eq!(r.value, 0);
        let r = k.dispatch(Sysnum::RtSleep as u32, &args([5, 0, 0, 0, 0, 0]));
        assert_eq!(r.value, 0);
        // The sleeper lost the CPU on the way out of dispatch.
        assert_ne!(k.tasks.current_task().pid(), pid);
        for _ in 0..6 {
            k.handle_irq(abi::TIMER_VECTOR);
        }
        assert_eq!(k.tasks.current_task().pid(), pid);
    }

    #[test]
    fn setsec_gate_and_getsec() {
        let mut k = kernel();
        let pid = run_user_task(&mut k);
        let r = k.dispatch(Sysnum::GetSec as u32, &args([0; 6]));
        assert_eq!(r.value, i64::from(SecurityLevel::USER.0));
        // User cannot reach setsec (requires Secure).
        let r = k.dispatch(Sysnum::SetSec as u32, &args([3, 0, 0, 0, 0, 0]));
        assert_eq!(r.value, Error::Perm.as_sysret());
        let slot = k.tasks.by_pid(pid).unwrap();
        k.tasks.get_mut(slot).set_security(SecurityLevel::SECURE);
        let r = k.dispatch(Sysnum::SetSec as u32, &args([1, 0, 0, 0, 0, 0]));
        assert_eq!(r.value, 0);
        let r = k.dispatch(Sysnum::GetSec as u32, &args([0; 6]));
        assert_eq!(r.value, i64::from(SecurityLevel::SYSTEM.0));
        // Out-of-range levels are rejected.
        k.tasks.get_mut(slot).set_security(SecurityLevel::SECURE);
        let r = k.dispatch(Sysnum::SetSec as u32, &args([9, 0, 0, 0, 0, 0]));
        assert_eq!(r.value, Error::Inval.as_sysret());
    }

    #[test]
    fn message_round_trip_via_syscalls() {
        let mut k = kernel();
        run_user_task(&mut k);
        let perms = ChannelPerms::READ | ChannelPerms::WRITE;
        let r = k.dispatch(
            Sysnum::MsgQueue as u32,
            &args([perms.bits() as usize, 0, 0, 0, 0, 0]),
        );
        let id = r.value as usize;
        assert!(id > 0);

        let send_base = grant_buffer(&mut k, b"ping", PageFlags::READ);
        let r = k.dispatch(Sysnum::MsgSend as u32, &args([id, send_base, 4, 0, 0, 0]));
        assert_eq!(r.value, 0);

        let recv_base =
            grant_buffer(&mut k, &[0; 16], PageFlags::READ | PageFlags::WRITE);
        let r = k.dispatch(Sysnum::MsgRecv as u32, &args([id, recv_base, 16, 0, 0, 0]));
        assert_eq!(r.value, 4);
        let got = unsafe {
            core::slice::from_raw_parts(recv_base as *const u8, 4)
        };
        assert_eq!(got, b"ping");

        // Empty queue is Busy, not a block.
        let r = k.dispatch(Sysnum::MsgRecv as u32, &args([id, recv_base, 16, 0, 0, 0]));
        assert_eq!(r.value, Error::Busy.as_sysret());
    }

    #[test]
    fn mprotect_routes_through_the_policy() {
        let mut k = kernel();
        run_user_task(&mut k);
        let addr = 0x4000_0000;
        k.wx.map_data_page(addr, 0x1000).unwrap();
        let rx = PageFlags::READ | PageFlags::EXECUTE;
        let r = k.dispatch(
            Sysnum::Mprotect as u32,
            &args([addr, abi::PAGE_SIZE, rx.bits() as usize, 0, 0, 0]),
        );
        assert_eq!(r.value, 0);
        assert!(k
            .wx
            .mapping(addr)
            .unwrap()
            .flags
            .contains(PageFlags::EXECUTE));
        assert_eq!(k.platform.icache_flushes(), 1);

        // W|X requests are blocked and counted.
        let wx = PageFlags::WRITE | PageFlags::EXECUTE;
        let r = k.dispatch(
            Sysnum::Mprotect as u32,
            &args([addr, abi::PAGE_SIZE, wx.bits() as usize, 0, 0, 0]),
        );
        assert_eq!(r.value, Error::Security.as_sysret());
        assert_eq!(k.wx.metrics().wx_violations_blocked, 1);
    }

    #[test]
    fn rt_yield_round_robins_among_peers() {
        let mut k = kernel();
        let a = run_user_task(&mut k);
        let b = k.create_task("peer", 0x1000, Priority::NORMAL).unwrap();
        let r = k.dispatch(Sysnum::RtYield as u32, &args([0; 6]));
        assert_eq!(r.value, 0);
        assert_eq!(k.tasks.current_task().pid(), b);
        let r = k.dispatch(Sysnum::RtYield as u32, &args([0; 6]));
        assert_eq!(r.value, 0);
        assert_eq!(k.tasks.current_task().pid(), a);
    }

    #[test]
    fn table_carries_declared_bounds() {
        let exp = [
            (Sysnum::Exit, 1000),
            (Sysnum::GetPid, 100),
            (Sysnum::Write, 2000),
            (Sysnum::RtCreate, 2000),
            (Sysnum::RtYield, 300),
            (Sysnum::RtGetTime, 100),
            (Sysnum::RtSetPrio, 200),
        ];
        for (num, bound) in exp {
            let e = table_entry(num as u32).unwrap();
            assert_eq!(e.num, Some(num));
            assert_eq!(e.wcet_bound, bound);
        }
        // rt_create is gated at System level and not rt-safe; getpid is both
        // interruptible and rt-safe.
        let rc = table_entry(Sysnum::RtCreate as u32).unwrap();
        assert_eq!(rc.min_security, SecurityLevel::SYSTEM);
        assert!(!rc.rt_safe);
        let gp = table_entry(Sysnum::GetPid as u32).unwrap();
        assert!(gp.interruptible && gp.rt_safe);
    }
}
