// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The real-time scheduler: task admission, dispatch, time-slice accounting,
//! and deadline tracking.
//!
//! Two policies are supported. Under EDF (the default) a set of real-time
//! tasks is admitted as long as total utilization stays at or below 1, and
//! equal-priority real-time tasks are ordered by absolute deadline. Under RMS
//! admission uses the Liu-Layland bound and ordering uses the period.
//! Everything else -- priorities, time slices, the idle fallback -- behaves
//! identically in both modes.
//!
//! Utilization is tracked in parts per million, which keeps admission
//! arithmetic in integers without giving up meaningful resolution.

use abi::{
    Error, Pid, Priority, SchedMode, SecurityLevel, TaskState, WaitReason,
    DEADLINE_CHECK_INTERVAL, DEFAULT_TIME_SLICE, MAX_TASKS,
};

use crate::platform::Platform;
use crate::task::{NextTask, RtParams, IDLE_SLOT};
use crate::time::Timestamp;
use crate::Kernel;

/// One million: the utilization of a task that needs the whole processor.
pub const PPM: u64 = 1_000_000;

/// Longest period (and with it, deadline and WCET) accepted for a
/// real-time task, in ticks. About 49 days at 1000 Hz; anything beyond
/// this is a corrupt argument, not a schedule.
pub const MAX_RT_PERIOD: u64 = 1 << 32;

/// Liu-Layland utilization bounds `n * (2^(1/n) - 1)` in parts per million,
/// indexed by task count. Entry 0 is unused padding.
static RMS_BOUND_PPM: [u64; MAX_TASKS + 1] = [
    0, 1_000_000, 828_427, 779_763, 756_828, 743_491, 734_772, 728_626,
    724_061, 720_537, 717_734, 715_451, 713_557, 711_958, 710_592, 709_411,
    708_380, 707_472, 706_666, 705_945, 705_298, 704_713, 704_182, 703_697,
    703_253, 702_845, 702_469, 702_121, 701_797, 701_497, 701_216, 700_954,
    700_708,
];

/// Scheduler bookkeeping that is not per-task.
pub struct Scheduler {
    mode: SchedMode,
    /// Total utilization of admitted real-time tasks, in ppm.
    admitted_util_ppm: u64,
    /// Number of admitted real-time tasks.
    rt_tasks: u32,
    /// Tick at which the next deadline sweep is due.
    next_deadline_check: u64,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            mode: SchedMode::default(),
            admitted_util_ppm: 0,
            rt_tasks: 0,
            next_deadline_check: DEADLINE_CHECK_INTERVAL,
        }
    }

    pub fn mode(&self) -> SchedMode {
        self.mode
    }

    pub fn admitted_util_ppm(&self) -> u64 {
        self.admitted_util_ppm
    }

    pub(crate) fn next_deadline_check(&self) -> u64 {
        self.next_deadline_check
    }

    pub(crate) fn set_next_deadline_check(&mut self, tick: u64) {
        self.next_deadline_check = tick;
    }

    /// Utilization bound currently in force, for the given prospective task
    /// count.
    fn bound_ppm(&self, n: u32) -> u64 {
        match self.mode {
            SchedMode::Edf => PPM,
            SchedMode::Rms => RMS_BOUND_PPM[(n as usize).min(MAX_TASKS)],
        }
    }

    /// Runs the schedulability test for one more task of utilization
    /// `util_ppm`. On success the task is considered admitted.
    fn admit(&mut self, util_ppm: u64) -> Result<(), Error> {
        let n = self.rt_tasks + 1;
        if self.admitted_util_ppm + util_ppm > self.bound_ppm(n) {
            return Err(Error::NoMem);
        }
        self.admitted_util_ppm += util_ppm;
        self.rt_tasks = n;
        Ok(())
    }

    /// Releases an admitted task's utilization.
    fn release(&mut self, util_ppm: u64) {
        self.admitted_util_ppm = self.admitted_util_ppm.saturating_sub(util_ppm);
        self.rt_tasks = self.rt_tasks.saturating_sub(1);
    }
}

/// Utilization of a `(wcet, period)` pair in parts per million.
///
/// The parameters come from syscall registers, so the product is widened to
/// keep the arithmetic exact for any values that pass validation. With
/// `wcet <= period` the result never exceeds [`PPM`].
fn utilization_ppm(wcet: u64, period: u64) -> u64 {
    (u128::from(wcet) * u128::from(PPM) / u128::from(period)) as u64
}

impl<P: Platform> Kernel<P> {
    /// Selects the real-time scheduling policy. Affects admission of future
    /// tasks and the ordering of equal-priority real-time tasks from this
    /// point on; already-queued tasks are not reordered.
    pub fn set_mode(&mut self, mode: SchedMode) {
        self.sched.mode = mode;
    }

    pub fn mode(&self) -> SchedMode {
        self.sched.mode
    }

    /// Creates an ordinary task and makes it Ready.
    pub fn create_task(
        &mut self,
        name: &str,
        entry: usize,
        priority: Priority,
    ) -> Result<Pid, Error> {
        let slot =
            self.tasks
                .allocate(name, entry, priority, SecurityLevel::USER)?;
        self.ready.insert(&mut self.tasks, slot, self.sched.mode);
        let pid = self.tasks.get(slot).pid();
        klog!(self.platform, "created task {} (pid {})", name, pid.0);
        Ok(pid)
    }

    /// Creates a real-time task, subject to the schedulability test.
    ///
    /// `period`, `deadline` and `wcet` are in ticks. Fails with `Inval` for
    /// parameters no schedule could honor, and with `NoMem` when admission
    /// would push total utilization past the mode's bound.
    pub fn create_rt_task(
        &mut self,
        name: &str,
        entry: usize,
        period: u64,
        deadline: u64,
        wcet: u64,
    ) -> Result<Pid, Error> {
        if period == 0
            || period > MAX_RT_PERIOD
            || wcet == 0
            || wcet > period
            || deadline > period
        {
            return Err(Error::Inval);
        }
        self.sched.admit(utilization_ppm(wcet, period))?;

        let slot = match self.tasks.allocate(
            name,
            entry,
            Priority::REALTIME,
            SecurityLevel::USER,
        ) {
            Ok(slot) => slot,
            Err(e) => {
                // All-or-nothing: a full table must not leak utilization.
                self.sched.release(utilization_ppm(wcet, period));
                return Err(e);
            }
        };
        let now = self.now();
        self.tasks.get_mut(slot).set_rt(RtParams {
            period,
            deadline,
            wcet,
            next_release: now + period,
            absolute_deadline: now + deadline,
        });
        self.ready.insert(&mut self.tasks, slot, self.sched.mode);
        let pid = self.tasks.get(slot).pid();
        klog!(
            self.platform,
            "admitted rt task {} (pid {}, period {}, wcet {})",
            name,
            pid.0,
            period,
            wcet
        );
        Ok(pid)
    }

    /// Marks a task Zombie. Its slot stays occupied until [`Kernel::reap`].
    ///
    /// Returns a scheduling hint: `Other` when the destroyed task was
    /// running, `Same` otherwise.
    pub fn destroy_task(&mut self, pid: Pid) -> Result<NextTask, Error> {
        if pid == Pid::IDLE {
            return Err(Error::Inval);
        }
        let slot = self.tasks.by_pid(pid)?;
        if self.tasks.get(slot).is_runnable() {
            self.ready.remove(&mut self.tasks, slot);
        }
        if let Some(rt) = self.tasks.get(slot).rt() {
            self.sched.release(utilization_ppm(rt.wcet, rt.period));
        }
        self.tasks.get_mut(slot).set_state(TaskState::Zombie);
        if slot == self.tasks.current_slot() {
            Ok(NextTask::Other)
        } else {
            Ok(NextTask::Same)
        }
    }

    /// Frees a Zombie's slot. A live task cannot be reaped.
    pub fn reap(&mut self, pid: Pid) -> Result<(), Error> {
        let slot = self.tasks.by_pid(pid)?;
        if self.tasks.get(slot).state() != TaskState::Zombie {
            return Err(Error::Busy);
        }
        self.tasks.free(slot);
        Ok(())
    }

    /// Administratively stops a Ready or Blocked task.
    pub fn suspend_task(&mut self, pid: Pid) -> Result<NextTask, Error> {
        if pid == Pid::IDLE {
            return Err(Error::Inval);
        }
        let slot = self.tasks.by_pid(pid)?;
        match self.tasks.get(slot).state() {
            TaskState::Ready => {
                self.ready.remove(&mut self.tasks, slot);
            }
            TaskState::Running | TaskState::Blocked(_) => {}
            TaskState::Suspended | TaskState::Zombie => {
                return Err(Error::Inval)
            }
        }
        let was_running =
            self.tasks.get(slot).state() == TaskState::Running;
        self.tasks.get_mut(slot).set_state(TaskState::Suspended);
        Ok(if was_running { NextTask::Other } else { NextTask::Same })
    }

    /// Makes a Suspended task Ready again.
    pub fn resume_task(&mut self, pid: Pid) -> Result<(), Error> {
        let slot = self.tasks.by_pid(pid)?;
        if self.tasks.get(slot).state() != TaskState::Suspended {
            return Err(Error::Inval);
        }
        self.tasks.get_mut(slot).set_state(TaskState::Ready);
        self.ready.insert(&mut self.tasks, slot, self.sched.mode);
        Ok(())
    }

    /// Voluntarily gives up the CPU. The caller goes back into the ready
    /// queue (unless it is the idle task) and the scheduler picks again.
    pub fn yield_current(&mut self) {
        let cur = self.tasks.current_slot();
        if cur != IDLE_SLOT {
            self.tasks.get_mut(cur).set_state(TaskState::Ready);
            self.ready.insert(&mut self.tasks, cur, self.sched.mode);
        }
        self.schedule();
    }

    /// Blocks the current task until `ticks` ticks from now. The idle task
    /// cannot sleep.
    pub fn sleep_current(&mut self, ticks: u64) -> Result<(), Error> {
        let cur = self.tasks.current_slot();
        if cur == IDLE_SLOT {
            return Err(Error::Inval);
        }
        let wake = self.now() + ticks;
        let t = self.tasks.get_mut(cur);
        t.set_wake_at(Some(wake));
        t.set_state(TaskState::Blocked(WaitReason::Sleep));
        Ok(())
    }

    /// Wakes every sleeper whose wake tick has arrived. Called once per
    /// timer tick.
    pub(crate) fn process_sleepers(&mut self, now: Timestamp) -> NextTask {
        let mut hint = NextTask::Same;
        for slot in 0..MAX_TASKS {
            let due = match self.tasks.try_get(slot) {
                Some(t) => {
                    t.state() == TaskState::Blocked(WaitReason::Sleep)
                        && t.wake_at().is_some_and(|w| w <= now)
                }
                None => false,
            };
            if due {
                let t = self.tasks.get_mut(slot);
                t.set_wake_at(None);
                t.set_state(TaskState::Ready);
                self.ready.insert(&mut self.tasks, slot, self.sched.mode);
                hint = hint.combine(NextTask::Specific(slot));
            }
        }
        hint
    }

    /// The deadline sweep. For every real-time task whose absolute deadline
    /// has passed, records the miss and advances the task to its next
    /// period. A miss is observable but non-fatal.
    pub(crate) fn deadline_sweep(&mut self, now: Timestamp) {
        for slot in 0..MAX_TASKS {
            let missed = self
                .tasks
                .try_get(slot)
                .and_then(|t| t.rt())
                .is_some_and(|rt| now > rt.absolute_deadline);
            if missed {
                self.tasks.get_mut(slot).note_deadline_miss();
                let (pid, misses) = {
                    let t = self.tasks.get(slot);
                    (t.pid(), t.deadline_misses())
                };
                let rt = self
                    .tasks
                    .get_mut(slot)
                    .rt_mut()
                    .expect("rt params vanished mid-sweep");
                rt.next_release += rt.period;
                rt.absolute_deadline = rt.next_release + rt.deadline;
                klog!(
                    self.platform,
                    "deadline miss: pid {} ({} total)",
                    pid.0,
                    misses
                );
            }
        }
    }

    /// The dispatcher. Runs from the timer interrupt, from `yield`, on
    /// block, on wake, and on task exit.
    ///
    /// On return exactly one task is Running. When the choice differs from
    /// the task that entered, the platform has been asked to switch
    /// contexts.
    pub fn schedule(&mut self) {
        let now = self.now();
        let cur = self.tasks.current_slot();

        // Time-slice accounting for a task that is still Running: it gets
        // charged for the tick, and expiry sends it to the back of its
        // priority class.
        if self.tasks.get(cur).state() == TaskState::Running {
            self.tasks.get_mut(cur).charge_tick();
            if self.tasks.get(cur).time_slice() == 0 && cur != IDLE_SLOT {
                self.tasks.get_mut(cur).set_state(TaskState::Ready);
                self.ready.insert(&mut self.tasks, cur, self.sched.mode);
            }
        }

        // Pick the head, gating real-time tasks on their release instant.
        let chosen = match self.ready.head() {
            None => IDLE_SLOT,
            Some(h) => {
                let held_back = self
                    .tasks
                    .get(h)
                    .rt()
                    .is_some_and(|rt| now < rt.next_release);
                if held_back {
                    IDLE_SLOT
                } else {
                    h
                }
            }
        };

        if chosen == cur {
            // The incumbent keeps the CPU. If slice expiry just parked it in
            // the queue, pull it back out and refresh its slice.
            if self.tasks.get(cur).state() == TaskState::Ready {
                self.ready.remove(&mut self.tasks, cur);
                self.tasks.get_mut(cur).set_state(TaskState::Running);
                self.refresh_time_slice(cur);
            }
            return;
        }

        // An incumbent with slice remaining is only displaced by a strictly
        // more important head. Equal-priority peers wait for slice expiry.
        if cur != IDLE_SLOT
            && self.tasks.get(cur).state() == TaskState::Running
        {
            let cur_prio = self.tasks.get(cur).dynamic_priority();
            let preempts = chosen != IDLE_SLOT
                && self
                    .tasks
                    .get(chosen)
                    .dynamic_priority()
                    .is_more_important_than(cur_prio);
            if !preempts {
                return;
            }
        }

        if chosen != IDLE_SLOT {
            self.ready.remove(&mut self.tasks, chosen);
        }

        // Account the outgoing task's stretch of execution.
        let end_cycles = self.platform.cycle_counter_read();
        let delta =
            end_cycles.saturating_sub(self.tasks.get(cur).run_started_cycles());
        let overran = self.tasks.get_mut(cur).record_execution(delta);
        if overran {
            let pid = self.tasks.get(cur).pid();
            klog!(
                self.platform,
                "wcet overrun: pid {} ran {} cycles",
                pid.0,
                delta
            );
        }

        // A task preempted while still Running goes back in the queue;
        // idle just steps aside.
        if self.tasks.get(cur).state() == TaskState::Running {
            self.tasks.get_mut(cur).set_state(TaskState::Ready);
            if cur != IDLE_SLOT {
                self.ready.insert(&mut self.tasks, cur, self.sched.mode);
            }
        }

        let start_cycles = self.platform.cycle_counter_read();
        {
            let t = self.tasks.get_mut(chosen);
            t.set_state(TaskState::Running);
            t.begin_run(now, start_cycles);
        }
        self.refresh_time_slice(chosen);
        self.tasks.set_current(chosen);
        self.platform.context_switch(cur, chosen);
    }

    fn refresh_time_slice(&mut self, slot: usize) {
        let slice = match self.tasks.get(slot).rt() {
            Some(rt) => rt.wcet.min(u64::from(u32::MAX)) as u32,
            None => DEFAULT_TIME_SLICE,
        };
        self.tasks.get_mut(slot).set_time_slice(slice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakePlatform;

    fn kernel() -> Kernel<FakePlatform> {
        Kernel::new(FakePlatform::new())
    }

    /// Exactly one task is Running at every kernel exit point.
    fn assert_one_running(k: &Kernel<FakePlatform>) {
        let running = k
            .tasks
            .iter()
            .filter(|(_, t)| t.state() == TaskState::Running)
            .count();
        assert_eq!(running, 1, "running-task invariant violated");
        assert_eq!(
            k.tasks.current_task().state(),
            TaskState::Running,
            "current pointer does not name the running task"
        );
    }

    #[test]
    fn rms_admission_accepts_feasible_set() {
        // Three tasks at 19% total utilization, against a bound of ~78%.
        let mut k = kernel();
        k.set_mode(SchedMode::Rms);
        k.create_rt_task("rt1", 0x1000, 1000, 1000, 100).unwrap();
        k.create_rt_task("rt2", 0x1000, 5000, 5000, 200).unwrap();
        k.create_rt_task("rt3", 0x1000, 10000, 10000, 500).unwrap();
        assert_eq!(k.sched.admitted_util_ppm(), 100_000 + 40_000 + 50_000);
    }

    #[test]
    fn edf_rejects_overcommitment() {
        // 0.9 admitted; adding 0.2 would exceed the EDF bound of 1.
        let mut k = kernel();
        k.create_rt_task("a", 0x1000, 1000, 1000, 450).unwrap();
        k.create_rt_task("b", 0x1000, 1000, 1000, 450).unwrap();
        assert_eq!(
            k.create_rt_task("c", 0x1000, 1000, 1000, 200),
            Err(Error::NoMem)
        );
        // The rejected task must leave no residue.
        assert_eq!(k.sched.admitted_util_ppm(), 900_000);
        assert_eq!(k.tasks.live_count(), 3); // idle + a + b
    }

    #[test]
    fn rms_is_stricter_than_edf() {
        // 0.8 total fits EDF but not the 2-task RMS bound of ~0.828... the
        // third task pushes past it.
        let mut k = kernel();
        k.set_mode(SchedMode::Rms);
        k.create_rt_task("a", 0x1000, 1000, 1000, 400).unwrap();
        k.create_rt_task("b", 0x1000, 1000, 1000, 400).unwrap();
        assert_eq!(
            k.create_rt_task("c", 0x1000, 1000, 1000, 100),
            Err(Error::NoMem)
        );
        let mut k2 = kernel();
        k2.create_rt_task("a", 0x1000, 1000, 1000, 400).unwrap();
        k2.create_rt_task("b", 0x1000, 1000, 1000, 400).unwrap();
        k2.create_rt_task("c", 0x1000, 1000, 1000, 100).unwrap();
    }

    #[test]
    fn rt_parameter_validation() {
        let mut k = kernel();
        assert_eq!(
            k.create_rt_task("z", 0x1000, 0, 0, 0),
            Err(Error::Inval)
        );
        assert_eq!(
            k.create_rt_task("z", 0x1000, 100, 100, 0),
            Err(Error::Inval)
        );
        assert_eq!(
            k.create_rt_task("z", 0x1000, 100, 100, 200),
            Err(Error::Inval)
        );
        assert_eq!(
            k.create_rt_task("z", 0x1000, 100, 200, 50),
            Err(Error::Inval)
        );
    }

    #[test]
    fn oversized_periods_are_rejected_not_overflowed() {
        let mut k = kernel();
        // A full-utilization task with period = wcet = 2^44 would wrap the
        // ppm product in 64 bits and sneak in as near-zero utilization.
        let huge = 1u64 << 44;
        assert_eq!(
            k.create_rt_task("big", 0x1000, huge, huge, huge),
            Err(Error::Inval)
        );
        assert_eq!(k.sched.admitted_util_ppm(), 0);
        // At the cap itself the arithmetic stays exact: the task accounts
        // for the whole processor and closes the door behind it.
        k.create_rt_task(
            "cap",
            0x1000,
            MAX_RT_PERIOD,
            MAX_RT_PERIOD,
            MAX_RT_PERIOD,
        )
        .unwrap();
        assert_eq!(k.sched.admitted_util_ppm(), PPM);
        assert_eq!(
            k.create_rt_task("more", 0x1000, 1000, 1000, 1),
            Err(Error::NoMem)
        );
    }

    #[test]
    fn dispatch_prefers_priority_and_keeps_one_running() {
        let mut k = kernel();
        assert_one_running(&k);
        let hi = k.create_task("hi", 0x1000, Priority::SYSTEM).unwrap();
        let _lo = k.create_task("lo", 0x1000, Priority::LOW).unwrap();
        k.schedule();
        assert_one_running(&k);
        assert_eq!(k.tasks.current_task().pid(), hi);
    }

    #[test]
    fn slice_expiry_rotates_equal_priority_tasks() {
        let mut k = kernel();
        let a = k.create_task("a", 0x1000, Priority::NORMAL).unwrap();
        let b = k.create_task("b", 0x1000, Priority::NORMAL).unwrap();
        k.schedule();
        assert_eq!(k.tasks.current_task().pid(), a);
        // Burn a's whole slice.
        for _ in 0..DEFAULT_TIME_SLICE {
            k.schedule();
            assert_one_running(&k);
        }
        assert_eq!(k.tasks.current_task().pid(), b);
        // And b's, which hands back to a.
        for _ in 0..DEFAULT_TIME_SLICE {
            k.schedule();
        }
        assert_eq!(k.tasks.current_task().pid(), a);
    }

    #[test]
    fn unreleased_rt_head_defers_to_idle() {
        let mut k = kernel();
        // next_release = now + period = tick 100; nothing else to run.
        k.create_rt_task("rt", 0x1000, 100, 100, 10).unwrap();
        k.schedule();
        assert_eq!(k.tasks.current_slot(), IDLE_SLOT);
        assert_one_running(&k);
        // Advance time past the release and try again.
        for _ in 0..101 {
            k.tick_for_test();
        }
        k.schedule();
        assert_eq!(k.tasks.current_task().name(), "rt");
    }

    #[test]
    fn yield_from_sole_task_returns_to_it() {
        let mut k = kernel();
        let a = k.create_task("a", 0x1000, Priority::NORMAL).unwrap();
        k.schedule();
        assert_eq!(k.tasks.current_task().pid(), a);
        k.yield_current();
        assert_eq!(k.tasks.current_task().pid(), a);
        assert_one_running(&k);
        assert!(k.ready.is_empty());
    }

    #[test]
    fn sleep_blocks_until_wake_tick() {
        let mut k = kernel();
        let a = k.create_task("a", 0x1000, Priority::NORMAL).unwrap();
        k.schedule();
        k.sleep_current(3).unwrap();
        k.schedule();
        assert_eq!(k.tasks.current_slot(), IDLE_SLOT);
        let slot = k.tasks.by_pid(a).unwrap();
        assert_eq!(
            k.tasks.get(slot).state(),
            TaskState::Blocked(WaitReason::Sleep)
        );
        for _ in 0..3 {
            k.tick_for_test();
        }
        let hint = k.process_sleepers(k.now());
        assert_eq!(hint, NextTask::Specific(slot));
        k.schedule();
        assert_eq!(k.tasks.current_task().pid(), a);
        assert_one_running(&k);
    }

    #[test]
    fn deadline_sweep_records_miss_and_advances_period() {
        let mut k = kernel();
        let pid = k.create_rt_task("rt", 0x1000, 50, 40, 10).unwrap();
        let slot = k.tasks.by_pid(pid).unwrap();
        // Past the absolute deadline (created at tick 0, deadline 40).
        for _ in 0..60 {
            k.tick_for_test();
        }
        k.deadline_sweep(k.now());
        let t = k.tasks.get(slot);
        assert_eq!(t.deadline_misses(), 1);
        let rt = t.rt().unwrap();
        assert_eq!(u64::from(rt.next_release), 100);
        assert_eq!(u64::from(rt.absolute_deadline), 140);
        // The task lives on; misses are diagnostics.
        assert!(t.is_runnable() || t.state() == TaskState::Ready);
    }

    #[test]
    fn wcet_overrun_is_counted_not_fatal() {
        let mut k = kernel();
        let pid = k.create_rt_task("rt", 0x1000, 1000, 1000, 5).unwrap();
        // Release has not arrived; force it by advancing time.
        for _ in 0..1001 {
            k.tick_for_test();
        }
        k.schedule();
        assert_eq!(k.tasks.current_task().pid(), pid);
        // A kernel-priority arrival preempts the running task, and the
        // measured stretch (one huge fake-cycle step) dwarfs wcet=5.
        let kp = k.create_task("svc", 0x1000, Priority::KERNEL).unwrap();
        k.platform.cycle_step = 10_000;
        k.schedule();
        assert_eq!(k.tasks.current_task().pid(), kp);
        let slot = k.tasks.by_pid(pid).unwrap();
        assert_eq!(k.tasks.get(slot).wcet_overruns(), 1);
        // Still schedulable afterward; overruns are diagnostics.
        assert_eq!(k.tasks.get(slot).state(), TaskState::Ready);
    }

    #[test]
    fn destroy_and_reap_lifecycle() {
        let mut k = kernel();
        let pid = k.create_task("t", 0x1000, Priority::NORMAL).unwrap();
        assert_eq!(k.reap(pid), Err(Error::Busy));
        let hint = k.destroy_task(pid).unwrap();
        assert_eq!(hint, NextTask::Same);
        let slot = k.tasks.by_pid(pid).unwrap();
        assert_eq!(k.tasks.get(slot).state(), TaskState::Zombie);
        assert!(k.ready.is_empty());
        k.reap(pid).unwrap();
        assert_eq!(k.tasks.by_pid(pid), Err(Error::NoEnt));
        // Destroying a ghost reports NoEnt; the idle task is untouchable.
        assert_eq!(k.destroy_task(pid), Err(Error::NoEnt));
        assert_eq!(k.destroy_task(Pid::IDLE), Err(Error::Inval));
    }

    #[test]
    fn destroying_rt_task_releases_utilization() {
        let mut k = kernel();
        let pid = k.create_rt_task("rt", 0x1000, 1000, 1000, 500).unwrap();
        assert_eq!(k.sched.admitted_util_ppm(), 500_000);
        let _ = k.destroy_task(pid).unwrap();
        assert_eq!(k.sched.admitted_util_ppm(), 0);
        // Freed headroom is usable again.
        k.create_rt_task("rt2", 0x1000, 1000, 1000, 900).unwrap();
    }

    #[test]
    fn suspend_resume_round_trip() {
        let mut k = kernel();
        let pid = k.create_task("t", 0x1000, Priority::NORMAL).unwrap();
        let slot = k.tasks.by_pid(pid).unwrap();
        let _ = k.suspend_task(pid).unwrap();
        assert_eq!(k.tasks.get(slot).state(), TaskState::Suspended);
        assert!(k.ready.is_empty());
        // Suspended tasks are not picked.
        k.schedule();
        assert_eq!(k.tasks.current_slot(), IDLE_SLOT);
        k.resume_task(pid).unwrap();
        k.schedule();
        assert_eq!(k.tasks.current_task().pid(), pid);
    }
}
