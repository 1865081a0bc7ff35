// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of kernel time.

use core::ops::{Add, AddAssign};

/// In-kernel timestamp representation.
///
/// This is measured in ticks of the periodic timer, which runs at
/// [`abi::TIMER_HZ`] -- one tick per millisecond on every current port. The
/// counter is 64 bits wide and is incremented exactly once per timer
/// interrupt, so it does not wrap in any deployment we care about.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Ticks elapsed since `earlier`, saturating at zero if `earlier` is in
    /// the future.
    pub fn since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

impl From<Timestamp> for u64 {
    fn from(v: Timestamp) -> Self {
        v.0
    }
}

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, ticks: u64) -> Timestamp {
        Timestamp(self.0 + ticks)
    }
}

impl AddAssign<u64> for Timestamp {
    fn add_assign(&mut self, ticks: u64) {
        self.0 += ticks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_arithmetic() {
        let t = Timestamp::from(100);
        assert_eq!(t + 50, Timestamp::from(150));
        assert_eq!((t + 50).since(t), 50);
        assert_eq!(t.since(t + 50), 0);
        assert!(t < t + 1);
    }
}
