// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of tasks.

use abi::{
    Error, PageFlags, Pid, Pledges, Priority, SecurityLevel, TaskState,
    TaskStatus, KERNEL_STACK_SIZE, MAX_TASKS, MAX_TASK_NAME,
    USER_STACK_SIZE,
};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::time::Timestamp;
use crate::umem::{self, MemRegion, USlice};

/// Slot index of the idle task. The idle task exists from boot, is never
/// enqueued, and is the scheduler's fallback when nothing else is runnable.
pub const IDLE_SLOT: usize = 0;

/// Extra memory regions a task can be granted beyond its two stacks.
pub const REGIONS_PER_TASK: usize = 4;

/// Bottom of the address window holding kernel stacks, one
/// [`KERNEL_STACK_SIZE`] reservation per slot. Ports back this window with
/// real memory; the kernel core only needs the arithmetic.
const KERNEL_STACK_WINDOW: usize = 0x0010_0000;

/// Bottom of the address window holding user stacks.
const USER_STACK_WINDOW: usize = 0x0020_0000;

/// Saved processor state of a task, in the platform-neutral form the kernel
/// cares about. The full register frame lives wherever the port keeps it;
/// the core only tracks where execution resumes.
#[derive(Copy, Clone, Debug, Default)]
pub struct SavedState {
    entry: usize,
    stack_pointer: usize,
}

impl SavedState {
    pub fn entry(&self) -> usize {
        self.entry
    }

    pub fn stack_pointer(&self) -> usize {
        self.stack_pointer
    }
}

/// Parameters attached to a real-time task. All durations are in ticks.
#[derive(Copy, Clone, Debug)]
pub struct RtParams {
    /// Release period.
    pub period: u64,
    /// Deadline relative to each release.
    pub deadline: u64,
    /// Declared worst-case execution time. Used for admission and as the
    /// soft bound for overrun diagnostics.
    pub wcet: u64,
    /// Next release instant.
    pub next_release: Timestamp,
    /// Deadline of the current period, as an absolute instant.
    pub absolute_deadline: Timestamp,
}

/// Internal representation of a task.
///
/// The fields of this struct are private to this module so that we can
/// maintain some task invariants, chiefly that statistics only move through
/// [`Task::record_execution`] and that the ready-queue links in the table
/// stay consistent with task state.
#[derive(Debug)]
pub struct Task {
    pid: Pid,
    parent: Pid,
    name: [u8; MAX_TASK_NAME],
    state: TaskState,
    /// Base priority, fixed at creation.
    priority: Priority,
    /// Priority actually used for queue ordering.
    dynamic_priority: Priority,
    security: SecurityLevel,
    pledges: Pledges,
    save: SavedState,
    kernel_stack: MemRegion,
    user_stack: MemRegion,
    regions: [Option<MemRegion>; REGIONS_PER_TASK],
    /// Ticks during which this task was the running task.
    cpu_ticks: u64,
    /// Remaining time slice, in ticks.
    time_slice: u32,
    exec_count: u32,
    total_cycles: u64,
    max_cycles: u64,
    deadline_misses: u32,
    wcet_overruns: u32,
    /// Tick at which a sleeping task becomes runnable again.
    wake_at: Option<Timestamp>,
    last_scheduled: Timestamp,
    /// Cycle counter value when this task last started running.
    run_started_cycles: u64,
    rt: Option<RtParams>,
    /// Ready-queue links. Owned by `readyq`; valid only while Ready.
    pub(crate) qnext: Option<u8>,
    pub(crate) qprev: Option<u8>,
}

impl Task {
    fn new(
        pid: Pid,
        parent: Pid,
        name: &str,
        entry: usize,
        priority: Priority,
        security: SecurityLevel,
        slot: usize,
    ) -> Self {
        let mut name_buf = [0; MAX_TASK_NAME];
        let n = name.len().min(MAX_TASK_NAME);
        name_buf[..n].copy_from_slice(&name.as_bytes()[..n]);

        let kernel_stack = MemRegion {
            base: KERNEL_STACK_WINDOW + slot * KERNEL_STACK_SIZE,
            size: KERNEL_STACK_SIZE,
            atts: PageFlags::READ | PageFlags::WRITE,
        };
        let user_stack = MemRegion {
            base: USER_STACK_WINDOW + slot * USER_STACK_SIZE,
            size: USER_STACK_SIZE,
            atts: PageFlags::READ | PageFlags::WRITE,
        };

        Task {
            pid,
            parent,
            name: name_buf,
            state: TaskState::Ready,
            priority,
            dynamic_priority: priority,
            security,
            pledges: Pledges::all(),
            save: SavedState {
                entry,
                stack_pointer: kernel_stack.base + kernel_stack.size,
            },
            kernel_stack,
            user_stack,
            regions: [None; REGIONS_PER_TASK],
            cpu_ticks: 0,
            time_slice: 0,
            exec_count: 0,
            total_cycles: 0,
            max_cycles: 0,
            deadline_misses: 0,
            wcet_overruns: 0,
            wake_at: None,
            last_scheduled: Timestamp::default(),
            run_started_cycles: 0,
            rt: None,
            qnext: None,
            qprev: None,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn parent(&self) -> Pid {
        self.parent
    }

    /// The task's name, as far as it is printable.
    pub fn name(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_TASK_NAME);
        core::str::from_utf8(&self.name[..end]).unwrap_or("?")
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub(crate) fn set_state(&mut self, s: TaskState) {
        self.state = s;
    }

    /// Checks if this task is in a potentially schedulable state.
    pub fn is_runnable(&self) -> bool {
        self.state == TaskState::Ready
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn dynamic_priority(&self) -> Priority {
        self.dynamic_priority
    }

    pub(crate) fn set_dynamic_priority(&mut self, p: Priority) {
        self.dynamic_priority = p;
    }

    pub fn security(&self) -> SecurityLevel {
        self.security
    }

    pub(crate) fn set_security(&mut self, level: SecurityLevel) {
        self.security = level;
    }

    pub fn pledges(&self) -> Pledges {
        self.pledges
    }

    /// Intersects the current pledge set with `keep`. Pledging is monotone:
    /// there is no way to get a capability back.
    pub(crate) fn restrict_pledges(&mut self, keep: Pledges) {
        self.pledges &= keep;
    }

    pub fn save(&self) -> &SavedState {
        &self.save
    }

    pub fn is_realtime(&self) -> bool {
        self.rt.is_some()
    }

    pub fn rt(&self) -> Option<&RtParams> {
        self.rt.as_ref()
    }

    pub(crate) fn rt_mut(&mut self) -> Option<&mut RtParams> {
        self.rt.as_mut()
    }

    pub(crate) fn set_rt(&mut self, params: RtParams) {
        self.rt = Some(params);
    }

    pub fn time_slice(&self) -> u32 {
        self.time_slice
    }

    pub(crate) fn set_time_slice(&mut self, ticks: u32) {
        self.time_slice = ticks;
    }

    pub(crate) fn charge_tick(&mut self) {
        self.cpu_ticks += 1;
        self.time_slice = self.time_slice.saturating_sub(1);
    }

    pub fn deadline_misses(&self) -> u32 {
        self.deadline_misses
    }

    pub(crate) fn note_deadline_miss(&mut self) {
        self.deadline_misses += 1;
    }

    pub fn wcet_overruns(&self) -> u32 {
        self.wcet_overruns
    }

    pub fn wake_at(&self) -> Option<Timestamp> {
        self.wake_at
    }

    pub(crate) fn set_wake_at(&mut self, t: Option<Timestamp>) {
        self.wake_at = t;
    }

    pub fn last_scheduled(&self) -> Timestamp {
        self.last_scheduled
    }

    pub(crate) fn begin_run(&mut self, now: Timestamp, cycles: u64) {
        self.last_scheduled = now;
        self.run_started_cycles = cycles;
    }

    pub(crate) fn run_started_cycles(&self) -> u64 {
        self.run_started_cycles
    }

    /// Accounts for one completed stretch of execution.
    ///
    /// Returns `true` when the stretch exceeded a real-time task's declared
    /// WCET -- an observable, non-fatal condition the caller is expected to
    /// log.
    #[must_use]
    pub(crate) fn record_execution(&mut self, cycles: u64) -> bool {
        self.exec_count += 1;
        self.total_cycles += cycles;
        if cycles > self.max_cycles {
            self.max_cycles = cycles;
        }
        match &self.rt {
            Some(rt) if cycles > rt.wcet => {
                self.wcet_overruns += 1;
                true
            }
            _ => false,
        }
    }

    /// Grants this task access to an additional memory region.
    pub fn grant_region(&mut self, region: MemRegion) -> Result<(), Error> {
        for slot in &mut self.regions {
            if slot.is_none() {
                *slot = Some(region);
                return Ok(());
            }
        }
        Err(Error::NoMem)
    }

    /// Every region this task may touch: both stacks plus explicit grants.
    fn region_grants(&self) -> impl Iterator<Item = &MemRegion> {
        [&self.kernel_stack, &self.user_stack]
            .into_iter()
            .chain(self.regions.iter().flatten())
    }

    /// Resolves `slice` to readable memory, if this task holds it.
    pub fn try_read<'s, T>(
        &self,
        slice: &'s USlice<T>,
    ) -> Result<&'s [T], Error>
    where
        T: FromBytes + Immutable + KnownLayout,
    {
        umem::read_checked(slice, self.region_grants())
    }

    /// Resolves `slice` to writable memory, if this task holds it. The
    /// result borrows from the slice, not the task, so the caller can keep
    /// working with other kernel state while filling it.
    pub fn try_write<'s, T>(
        &self,
        slice: &'s mut USlice<T>,
    ) -> Result<&'s mut [T], Error>
    where
        T: FromBytes + Immutable + KnownLayout,
    {
        umem::write_checked(slice, self.region_grants())
    }

    /// Builds the monitor-facing status record for this task.
    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            pid: self.pid,
            parent: self.parent,
            name: self.name,
            state: self.state,
            priority: self.dynamic_priority,
            security: self.security,
            cpu_ticks: self.cpu_ticks,
            exec_count: self.exec_count,
            total_cycles: self.total_cycles,
            max_cycles: self.max_cycles,
            deadline_misses: self.deadline_misses,
            wcet_overruns: self.wcet_overruns,
        }
    }
}

/// Return value for operations that can have scheduling implications. This is
/// marked `must_use` because forgetting to actually run the scheduler after
/// performing an operation that requires it would be Bad.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum NextTask {
    /// It's fine to keep running whatever task we were just running.
    Same,
    /// We need to switch tasks, but this routine has not concluded which one
    /// should now run. The scheduler needs to figure it out.
    Other,
    /// We need to switch tasks, and we already know which one should run
    /// next.
    Specific(usize),
}

impl NextTask {
    pub fn combine(self, other: Self) -> Self {
        use NextTask::*; // shorthand for patterns

        match (self, other) {
            // If both agree, our job is easy.
            (x, y) if x == y => x,
            // Specific task recommendations that *don't* agree get
            // downgraded to Other.
            (Specific(_), Specific(_)) => Other,
            // If only *one* is specific, it wins.
            (Specific(x), _) | (_, Specific(x)) => Specific(x),
            // Otherwise, if either suggestion says switch, switch.
            (Other, _) | (_, Other) => Other,
            // All we have left is...
            (Same, Same) => Same,
        }
    }
}

/// Fixed-size task table. Owns every task control block; all other parts of
/// the kernel refer to tasks by slot index or by `Pid`.
pub struct TaskTable {
    slots: [Option<Task>; MAX_TASKS],
    next_pid: u32,
    current: usize,
}

impl TaskTable {
    /// Creates the table with the idle task installed in slot 0, Running.
    pub(crate) fn new() -> Self {
        let mut slots: [Option<Task>; MAX_TASKS] =
            core::array::from_fn(|_| None);
        let mut idle = Task::new(
            Pid::IDLE,
            Pid::IDLE,
            "idle",
            0,
            Priority::IDLE,
            SecurityLevel::KERNEL,
            IDLE_SLOT,
        );
        idle.state = TaskState::Running;
        slots[IDLE_SLOT] = Some(idle);
        TaskTable {
            slots,
            next_pid: 1,
            current: IDLE_SLOT,
        }
    }

    /// Allocates the first free slot for a new task in the Ready state.
    ///
    /// The caller is responsible for inserting the task into the ready
    /// queue; nothing is runnable merely by existing in the table.
    pub(crate) fn allocate(
        &mut self,
        name: &str,
        entry: usize,
        priority: Priority,
        security: SecurityLevel,
    ) -> Result<usize, Error> {
        let slot = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(Error::NoMem)?;
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        let parent = self.current_task().pid();
        self.slots[slot] =
            Some(Task::new(pid, parent, name, entry, priority, security, slot));
        Ok(slot)
    }

    /// Releases a slot. The task must already be a Zombie; this is the
    /// "reap" half of the exit protocol.
    pub(crate) fn free(&mut self, slot: usize) {
        uassert!(slot != IDLE_SLOT);
        self.slots[slot] = None;
    }

    pub fn get(&self, slot: usize) -> &Task {
        self.slots[slot].as_ref().expect("empty task slot")
    }

    pub(crate) fn get_mut(&mut self, slot: usize) -> &mut Task {
        self.slots[slot].as_mut().expect("empty task slot")
    }

    /// Looks a task up by slot, tolerating empty slots.
    pub fn try_get(&self, slot: usize) -> Option<&Task> {
        self.slots.get(slot)?.as_ref()
    }

    /// Resolves a user-provided `Pid` to a slot index.
    pub fn by_pid(&self, pid: Pid) -> Result<usize, Error> {
        self.slots
            .iter()
            .position(|s| s.as_ref().map(Task::pid) == Some(pid))
            .ok_or(Error::NoEnt)
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub(crate) fn set_current(&mut self, slot: usize) {
        self.current = slot;
    }

    pub fn current_task(&self) -> &Task {
        self.get(self.current)
    }

    pub(crate) fn current_task_mut(&mut self) -> &mut Task {
        self.get_mut(self.current)
    }

    /// Iterates over occupied slots.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Task)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|t| (i, t)))
    }

    /// Number of live tasks, idle included.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}
