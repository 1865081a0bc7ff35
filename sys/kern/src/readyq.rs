// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The ready queue: a priority-ordered doubly linked list threaded through
//! the task table by slot index.
//!
//! Links live in each task's control block (`qnext`/`qprev`), so membership
//! costs no storage beyond the table itself and removal is O(1). The queue
//! holds exactly the tasks in the Ready state; the idle task is never
//! enqueued and is the scheduler's implicit fallback.
//!
//! # Ordering
//!
//! Insertion walks from the head and places the new task before the first
//! task it should run ahead of:
//!
//! 1. Numerically lower dynamic priority first.
//! 2. At equal priority, real-time tasks precede non-real-time tasks.
//! 3. Among real-time tasks at equal priority, the earlier absolute deadline
//!    wins in EDF mode, the shorter period in RMS mode.
//! 4. Otherwise FIFO: the newcomer goes after its existing peers.

use abi::SchedMode;

use crate::task::{Task, TaskTable, IDLE_SLOT};

/// The queue itself is just the head link; everything else is in the task
/// table.
#[derive(Default)]
pub struct ReadyQueue {
    head: Option<u8>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot of the highest-priority ready task, if any. The caller supplies
    /// the idle fallback.
    pub fn head(&self) -> Option<usize> {
        self.head.map(usize::from)
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Inserts `slot` at its ordered position.
    ///
    /// The task must be Ready and unlinked. The idle task must never pass
    /// through here.
    pub fn insert(&mut self, tasks: &mut TaskTable, slot: usize, mode: SchedMode) {
        uassert!(slot != IDLE_SLOT);
        uassert!(tasks.get(slot).is_runnable());
        uassert!(tasks.get(slot).qnext.is_none());
        uassert!(tasks.get(slot).qprev.is_none());

        let mut prev: Option<u8> = None;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            if runs_before(tasks.get(slot), tasks.get(usize::from(c)), mode) {
                break;
            }
            prev = Some(c);
            cursor = tasks.get(usize::from(c)).qnext;
        }

        let slot8 = slot as u8;
        {
            let t = tasks.get_mut(slot);
            t.qprev = prev;
            t.qnext = cursor;
        }
        match prev {
            Some(p) => tasks.get_mut(usize::from(p)).qnext = Some(slot8),
            None => self.head = Some(slot8),
        }
        if let Some(c) = cursor {
            tasks.get_mut(usize::from(c)).qprev = Some(slot8);
        }
    }

    /// Unlinks `slot` in O(1) using its back-pointer. Harmless if the task
    /// is not queued.
    pub fn remove(&mut self, tasks: &mut TaskTable, slot: usize) {
        let (prev, next) = {
            let t = tasks.get(slot);
            (t.qprev, t.qnext)
        };
        if prev.is_none() && next.is_none() && self.head != Some(slot as u8) {
            // Not linked at all.
            return;
        }
        match prev {
            Some(p) => tasks.get_mut(usize::from(p)).qnext = next,
            None => self.head = next,
        }
        if let Some(n) = next {
            tasks.get_mut(usize::from(n)).qprev = prev;
        }
        let t = tasks.get_mut(slot);
        t.qnext = None;
        t.qprev = None;
    }

    /// Number of queued tasks. O(n); used for diagnostics and tests.
    pub fn len(&self, tasks: &TaskTable) -> usize {
        let mut n = 0;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            n += 1;
            cursor = tasks.get(usize::from(c)).qnext;
        }
        n
    }
}

/// Decides whether `new` should run ahead of the queued task `queued`.
fn runs_before(new: &Task, queued: &Task, mode: SchedMode) -> bool {
    let np = new.dynamic_priority();
    let qp = queued.dynamic_priority();
    if np.is_more_important_than(qp) {
        return true;
    }
    if qp.is_more_important_than(np) {
        return false;
    }
    match (new.rt(), queued.rt()) {
        // Real-time tasks go ahead of peers that merely share the priority.
        (Some(_), None) => true,
        (None, Some(_)) => false,
        (Some(n), Some(q)) => match mode {
            SchedMode::Edf => n.absolute_deadline < q.absolute_deadline,
            SchedMode::Rms => n.period < q.period,
        },
        // FIFO among equals.
        (None, None) => false,
    }
}
