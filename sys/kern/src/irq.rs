// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The interrupt dispatch path.
//!
//! Vectors below 32 are CPU exceptions and are fatal by policy (§ the
//! exception path logs and halts). Vector [`abi::TIMER_VECTOR`] drives the
//! kernel clock: every firing increments the tick counter, periodically runs
//! the deadline sweep, wakes due sleepers, and requests a scheduler pass.
//! Everything else is acknowledged and counted.
//!
//! Each pass through this path is measured against [`abi::MAX_IRQ_CYCLES`];
//! exceeding the budget sets an overrun that [`Kernel::health_ok`] reports.

use abi::{
    IrqHealth, DEADLINE_CHECK_INTERVAL, MAX_IRQ_CYCLES, NUM_VECTORS,
    TIMER_VECTOR,
};

use crate::err::FaultInfo;
use crate::platform::Platform;
use crate::Kernel;

/// Command port of the primary interrupt controller.
const PIC1_CMD: u16 = 0x20;
/// Command port of the secondary interrupt controller.
const PIC2_CMD: u16 = 0xA0;
/// End-of-interrupt command.
const PIC_EOI: u8 = 0x20;

/// First vector delivered by the primary controller.
const IRQ_BASE: u8 = 32;
/// First vector delivered by the secondary controller.
const IRQ_SLAVE_BASE: u8 = 40;
/// One past the last hardware IRQ vector.
const IRQ_LIMIT: u8 = 48;

/// Per-vector counters.
#[derive(Copy, Clone, Debug, Default)]
pub struct VectorStats {
    pub count: u32,
    pub total_cycles: u64,
    pub max_cycles: u64,
}

/// Interrupt statistics and health state.
pub struct IrqStats {
    vectors: [VectorStats; NUM_VECTORS],
    /// Depth of nested interrupt handling. Non-zero outside a handler means
    /// an unbalanced prologue/epilogue, which the health check flags.
    nesting: u32,
    /// Number of dispatch passes that blew the cycle budget.
    overruns: u32,
}

impl IrqStats {
    pub(crate) fn new() -> Self {
        Self {
            vectors: [VectorStats::default(); NUM_VECTORS],
            nesting: 0,
            overruns: 0,
        }
    }

    pub fn vector(&self, v: u8) -> &VectorStats {
        &self.vectors[usize::from(v)]
    }

    pub fn overruns(&self) -> u32 {
        self.overruns
    }

    pub fn nesting(&self) -> u32 {
        self.nesting
    }
}

impl<P: Platform> Kernel<P> {
    /// Entry point for every interrupt vector. Ports call this from their
    /// trap stub after saving machine state.
    pub fn handle_irq(&mut self, vector: u8) {
        let start = self.platform.cycle_counter_read();
        self.irq.nesting += 1;
        self.irq.vectors[usize::from(vector)].count += 1;

        // Acknowledge the controller pair before doing any work, so a long
        // pass cannot hold off the next interrupt at the PIC.
        if (IRQ_BASE..IRQ_LIMIT).contains(&vector) {
            if vector >= IRQ_SLAVE_BASE {
                self.platform.io_port_out8(PIC2_CMD, PIC_EOI);
            }
            self.platform.io_port_out8(PIC1_CMD, PIC_EOI);
        }

        if vector < IRQ_BASE {
            // CPU exception: does not return.
            self.fatal_exception(vector);
        } else if vector == TIMER_VECTOR {
            self.timer_tick();
        }
        // Other hardware IRQs and software vectors are counted only;
        // syscalls arrive through `dispatch`, not here.

        let spent = self
            .platform
            .cycle_counter_read()
            .saturating_sub(start);
        let stats = &mut self.irq.vectors[usize::from(vector)];
        stats.total_cycles += spent;
        if spent > stats.max_cycles {
            stats.max_cycles = spent;
        }
        if spent > MAX_IRQ_CYCLES {
            self.irq.overruns += 1;
            klog!(
                self.platform,
                "irq overrun: vector {} took {} cycles",
                vector,
                spent
            );
        }
        self.irq.nesting -= 1;
    }

    /// The timer half of the interrupt path: advance the clock, run the
    /// deadline sweep when due, wake sleepers, and reschedule.
    fn timer_tick(&mut self) {
        self.ticks += 1;
        let now = self.now();
        if self.ticks >= self.sched.next_deadline_check() {
            self.deadline_sweep(now);
            self.sched
                .set_next_deadline_check(self.ticks + DEADLINE_CHECK_INTERVAL);
        }
        let _ = self.process_sleepers(now);
        self.schedule();
    }

    /// CPU exceptions are fatal: log, record the epitaph, halt.
    fn fatal_exception(&mut self, vector: u8) -> ! {
        let fault = FaultInfo::from_vector(vector);
        klog!(self.platform, "fatal exception: {}", fault);
        crate::fail::die(&mut self.platform, fault)
    }

    /// False once any interrupt pass has overrun its budget, or when the
    /// nesting counter is unbalanced. Call from idle context, where a
    /// non-zero nesting level cannot be legitimate.
    pub fn health_ok(&self) -> bool {
        self.irq.overruns == 0 && self.irq.nesting == 0
    }

    /// Monitor-facing summary of interrupt health.
    pub fn irq_health(&self) -> IrqHealth {
        IrqHealth {
            overruns: self.irq.overruns,
            nesting: self.irq.nesting,
            healthy: self.health_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakePlatform;
    use abi::{Priority, TaskState};

    fn kernel() -> Kernel<FakePlatform> {
        Kernel::new(FakePlatform::new())
    }

    #[test]
    fn timer_irq_advances_clock_and_acknowledges_pic() {
        let mut k = kernel();
        k.handle_irq(TIMER_VECTOR);
        k.handle_irq(TIMER_VECTOR);
        assert_eq!(k.ticks(), 2);
        assert_eq!(k.irq.vector(TIMER_VECTOR).count, 2);
        assert!(k
            .platform
            .port_writes()
            .iter()
            .all(|&(port, val)| port == PIC1_CMD && val == PIC_EOI));
        assert_eq!(k.platform.port_writes().len(), 2);
    }

    #[test]
    fn slave_irqs_acknowledge_both_controllers() {
        let mut k = kernel();
        k.handle_irq(44);
        assert_eq!(
            k.platform.port_writes(),
            &[(PIC2_CMD, PIC_EOI), (PIC1_CMD, PIC_EOI)]
        );
    }

    #[test]
    fn vector_stats_track_count_and_peak() {
        let mut k = kernel();
        k.handle_irq(33);
        k.platform.cycle_step = 40;
        k.handle_irq(33);
        let v = k.irq.vector(33);
        assert_eq!(v.count, 2);
        // Second pass cost one 40-cycle step between the two reads.
        assert_eq!(v.max_cycles, 40);
        assert!(v.total_cycles >= 41);
    }

    #[test]
    fn budget_overrun_trips_health() {
        let mut k = kernel();
        assert!(k.health_ok());
        k.platform.cycle_step = MAX_IRQ_CYCLES + 1;
        k.handle_irq(35);
        assert!(!k.health_ok());
        assert_eq!(k.irq.overruns(), 1);
        let health = k.irq_health();
        assert_eq!(health.overruns, 1);
        assert_eq!(health.nesting, 0);
        assert!(!health.healthy);
    }

    #[test]
    fn nesting_balances_across_dispatch() {
        let mut k = kernel();
        k.handle_irq(TIMER_VECTOR);
        assert_eq!(k.irq.nesting(), 0);
    }

    #[test]
    fn deadline_sweep_runs_on_its_interval() {
        let mut k = kernel();
        // Deadline at tick 40, period 50; first sweep due at tick 100.
        let pid = k.create_rt_task("rt", 0x1000, 50, 40, 10).unwrap();
        let slot = k.tasks.by_pid(pid).unwrap();
        for _ in 0..99 {
            k.handle_irq(TIMER_VECTOR);
        }
        // Miss not yet observed: the sweep hasn't run.
        assert_eq!(k.tasks.get(slot).deadline_misses(), 0);
        k.handle_irq(TIMER_VECTOR);
        assert_eq!(k.tasks.get(slot).deadline_misses(), 1);
        // Next sweep 100 ticks later, and the period has advanced so far
        // that tick 200 is again past the (new) deadline of 140.
        for _ in 0..100 {
            k.handle_irq(TIMER_VECTOR);
        }
        assert_eq!(k.tasks.get(slot).deadline_misses(), 2);
    }

    #[test]
    fn timer_tick_wakes_sleepers_and_dispatches() {
        let mut k = kernel();
        let pid = k.create_task("t", 0x1000, Priority::NORMAL).unwrap();
        k.schedule();
        assert_eq!(k.tasks.current_task().pid(), pid);
        k.sleep_current(2).unwrap();
        k.schedule();
        assert_eq!(k.tasks.current_slot(), crate::task::IDLE_SLOT);
        k.handle_irq(TIMER_VECTOR);
        let slot = k.tasks.by_pid(pid).unwrap();
        assert!(matches!(k.tasks.get(slot).state(), TaskState::Blocked(_)));
        k.handle_irq(TIMER_VECTOR);
        // Wake tick reached: the sleeper is running again.
        assert_eq!(k.tasks.current_task().pid(), pid);
    }

    #[test]
    #[should_panic(expected = "SYSTEM RESET")]
    fn cpu_exception_halts_the_machine() {
        let mut k = kernel();
        k.handle_irq(0);
    }
}
