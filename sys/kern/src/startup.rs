// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel construction and bring-up.
//!
//! The whole kernel is one value: [`Kernel`] owns every table the
//! subsystems use, plus the platform it runs on. There are no module-level
//! globals to initialize in the right order; construction *is*
//! initialization, and the borrow checker enforces that interrupt-path code
//! and syscall-path code go through the same state.

use abi::TIMER_HZ;

use crate::ipc::IpcBroker;
use crate::irq::IrqStats;
use crate::platform::Platform;
use crate::readyq::ReadyQueue;
use crate::sched::Scheduler;
use crate::syscalls::SyscallStatsTable;
use crate::task::TaskTable;
use crate::time::Timestamp;
use crate::wx::WxPolicy;

/// The deterministic kernel core: every table, preallocated, plus the
/// machine underneath.
pub struct Kernel<P: Platform> {
    pub(crate) platform: P,
    /// Monotonic tick counter, incremented exactly once per timer
    /// interrupt.
    pub(crate) ticks: u64,
    pub(crate) tasks: TaskTable,
    pub(crate) ready: ReadyQueue,
    pub(crate) sched: Scheduler,
    pub(crate) ipc: IpcBroker,
    pub(crate) wx: WxPolicy,
    pub(crate) irq: IrqStats,
    pub(crate) syscall_stats: SyscallStatsTable,
}

impl<P: Platform> Kernel<P> {
    /// Brings the kernel up on `platform`: installs the idle task, programs
    /// the timer, and leaves the system ready for its first interrupt.
    pub fn new(platform: P) -> Self {
        let mut kernel = Kernel {
            platform,
            ticks: 0,
            tasks: TaskTable::new(),
            ready: ReadyQueue::new(),
            sched: Scheduler::new(),
            ipc: IpcBroker::new(),
            wx: WxPolicy::new(),
            irq: IrqStats::new(),
            syscall_stats: SyscallStatsTable::new(),
        };
        kernel.platform.timer_program(TIMER_HZ);
        klog!(kernel.platform, "starting: atomos ({} Hz)", TIMER_HZ);
        kernel
    }

    /// Current kernel time.
    pub fn now(&self) -> Timestamp {
        Timestamp::from(self.ticks)
    }

    /// Looks up a live task by identifier.
    pub fn task(&self, pid: abi::Pid) -> Result<&crate::task::Task, abi::Error> {
        let slot = self.tasks.by_pid(pid)?;
        Ok(self.tasks.get(slot))
    }

    /// Raw tick count.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Reads the hardware cycle counter.
    pub fn cycles(&mut self) -> u64 {
        self.platform.cycle_counter_read()
    }

    /// Access to the interrupt statistics.
    pub fn irq_stats(&self) -> &IrqStats {
        &self.irq
    }

    /// Access to the IPC broker.
    pub fn ipc(&mut self) -> &mut IpcBroker {
        &mut self.ipc
    }

    /// Access to the W^X policy engine.
    pub fn wx(&mut self) -> &mut WxPolicy {
        &mut self.wx
    }

    /// Advances the clock without taking the full interrupt path. Test
    /// support only.
    #[cfg(test)]
    pub(crate) fn tick_for_test(&mut self) {
        self.ticks += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakePlatform;
    use crate::task::IDLE_SLOT;
    use abi::TaskState;

    #[test]
    fn bring_up_programs_the_timer_and_runs_idle() {
        let k = Kernel::new(FakePlatform::new());
        assert_eq!(k.platform.timer_hz(), Some(TIMER_HZ));
        assert_eq!(k.tasks.current_slot(), IDLE_SLOT);
        assert_eq!(k.tasks.current_task().state(), TaskState::Running);
        assert_eq!(k.ticks(), 0);
        // The boot banner went to the console.
        assert!(!k.platform.console().is_empty());
    }

    #[test]
    fn cycle_source_is_monotonic() {
        let mut k = Kernel::new(FakePlatform::new());
        let a = k.cycles();
        let b = k.cycles();
        assert!(b > a);
    }
}
