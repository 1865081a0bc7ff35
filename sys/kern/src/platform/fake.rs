// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A machine made of arrays, for hosted tests and simulators.

use super::Platform;

const CONSOLE_CAP: usize = 4096;
const SWITCH_CAP: usize = 64;
const PORT_CAP: usize = 16;

/// `Platform` implementation with a programmable cycle counter.
///
/// Every call to [`Platform::cycle_counter_read`] advances the counter by
/// `cycle_step`, so a test can dictate exactly how expensive a measured
/// section appears to be. Console output, context switches, and port writes
/// are recorded for inspection.
pub struct FakePlatform {
    cycles: u64,
    /// Amount the cycle counter advances per read.
    pub cycle_step: u64,
    console: [u8; CONSOLE_CAP],
    console_len: usize,
    switches: [(usize, usize); SWITCH_CAP],
    switch_count: usize,
    port_writes: [(u16, u8); PORT_CAP],
    port_write_count: usize,
    timer_hz: Option<u32>,
    icache_flushes: u32,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            cycles: 0,
            cycle_step: 1,
            console: [0; CONSOLE_CAP],
            console_len: 0,
            switches: [(0, 0); SWITCH_CAP],
            switch_count: 0,
            port_writes: [(0, 0); PORT_CAP],
            port_write_count: 0,
            timer_hz: None,
            icache_flushes: 0,
        }
    }

    /// Everything written to the console so far.
    pub fn console(&self) -> &[u8] {
        &self.console[..self.console_len]
    }

    /// Recorded `(from, to)` context switches, oldest first. Only the most
    /// recent `SWITCH_CAP` are retained.
    pub fn switches(&self) -> &[(usize, usize)] {
        &self.switches[..self.switch_count.min(SWITCH_CAP)]
    }

    /// Recorded 8-bit port writes, oldest first.
    pub fn port_writes(&self) -> &[(u16, u8)] {
        &self.port_writes[..self.port_write_count.min(PORT_CAP)]
    }

    /// The rate the kernel last programmed into the timer, if any.
    pub fn timer_hz(&self) -> Option<u32> {
        self.timer_hz
    }

    pub fn icache_flushes(&self) -> u32 {
        self.icache_flushes
    }

    /// Discards recorded console output.
    pub fn clear_console(&mut self) {
        self.console_len = 0;
    }
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for FakePlatform {
    fn console_write(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(CONSOLE_CAP - self.console_len);
        self.console[self.console_len..self.console_len + n]
            .copy_from_slice(&bytes[..n]);
        self.console_len += n;
    }

    fn timer_program(&mut self, hz: u32) {
        self.timer_hz = Some(hz);
    }

    fn io_port_in8(&mut self, _port: u16) -> u8 {
        0
    }

    fn io_port_out8(&mut self, port: u16, value: u8) {
        if self.port_write_count < PORT_CAP {
            self.port_writes[self.port_write_count] = (port, value);
        }
        self.port_write_count += 1;
    }

    fn io_port_in16(&mut self, _port: u16) -> u16 {
        0
    }

    fn io_port_out16(&mut self, _port: u16, _value: u16) {}

    fn io_port_in32(&mut self, _port: u16) -> u32 {
        0
    }

    fn io_port_out32(&mut self, _port: u16, _value: u32) {}

    fn cycle_counter_read(&mut self) -> u64 {
        self.cycles += self.cycle_step;
        self.cycles
    }

    fn context_switch(&mut self, from: usize, to: usize) {
        if self.switch_count < SWITCH_CAP {
            self.switches[self.switch_count] = (from, to);
        }
        self.switch_count += 1;
    }

    fn flush_icache(&mut self, _base: usize, _len: usize) {
        self.icache_flushes += 1;
    }

    fn reset(&mut self) -> ! {
        panic!("SYSTEM RESET");
    }
}
