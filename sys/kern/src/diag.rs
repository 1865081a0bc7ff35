// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Operator queries: serialized views of kernel state.
//!
//! The discipline counters (WCET, security, deadline misses) never abort
//! anything; the deal is that an operator can *ask* about them and decide.
//! This module is that interface. Records are serialized with `ssmarshal`
//! into a caller-provided buffer, so a monitor on the other side of a
//! console or channel can decode them with the matching `abi` types.
//!
//! A buffer that is too small is tolerated: the call reports the size a
//! buffer *would have* needed, and it's up to the caller to notice.

use abi::{ChannelStats, Error, Pid, SyscallStats, TaskStatus};
use serde::Serialize;

use crate::platform::Platform;
use crate::Kernel;

fn serialize_into<T: Serialize>(buf: &mut [u8], val: &T) -> Result<usize, Error> {
    match ssmarshal::serialize(buf, val) {
        Ok(size) => Ok(size),
        Err(ssmarshal::Error::EndOfStream) => Ok(core::mem::size_of::<T>()),
        Err(_) => Err(Error::Inval),
    }
}

impl<P: Platform> Kernel<P> {
    /// Status record for one task.
    pub fn task_status(&self, pid: Pid) -> Result<TaskStatus, Error> {
        let slot = self.tasks.by_pid(pid)?;
        Ok(self.tasks.get(slot).status())
    }

    /// Serializes a task's status record into `buf`.
    pub fn read_task_status(
        &self,
        pid: Pid,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let status = self.task_status(pid)?;
        serialize_into(buf, &status)
    }

    /// Counters for one syscall number.
    pub fn syscall_stats(&self, number: u32) -> Result<SyscallStats, Error> {
        self.syscall_stats.get(number).ok_or(Error::Inval)
    }

    /// Serializes one syscall's counters into `buf`.
    pub fn read_syscall_stats(
        &self,
        number: u32,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let stats = self.syscall_stats(number)?;
        serialize_into(buf, &stats)
    }

    /// Statistics for one IPC channel.
    pub fn channel_stats(&self, channel_id: u32) -> Result<ChannelStats, Error> {
        self.ipc.stats(channel_id)
    }

    /// Serializes one channel's statistics into `buf`.
    pub fn read_channel_stats(
        &self,
        channel_id: u32,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let stats = self.ipc.stats(channel_id)?;
        serialize_into(buf, &stats)
    }

    /// Serializes the interrupt health summary into `buf`.
    pub fn read_irq_health(&self, buf: &mut [u8]) -> Result<usize, Error> {
        serialize_into(buf, &self.irq_health())
    }
}
