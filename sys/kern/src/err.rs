// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! Recoverable conditions travel as [`abi::Error`] codes and are returned to
//! the offending caller; nothing in the kernel treats them as exceptional.
//! This module covers the other family: faults raised by the CPU itself,
//! which terminate the system through [`crate::fail`].

use core::fmt;

/// A record describing a fault taken by the processor.
///
/// These originate in the exception half of the interrupt dispatch path. They
/// are fatal by policy: the kernel logs the record, writes it into the
/// epitaph, and halts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultInfo {
    /// Integer division by zero.
    DivideByZero,
    /// Execution of an instruction the processor does not recognize.
    InvalidOpcode,
    /// A page-level access violation. The faulting address is `None` when
    /// the processor cannot report one precisely.
    PageFault { address: Option<usize> },
    /// General protection violation.
    GeneralProtection,
    /// Any other CPU exception, identified by its vector number.
    Other(u8),
}

impl FaultInfo {
    /// Maps an exception vector to its fault record. Only meaningful for
    /// vectors below 32.
    pub fn from_vector(vector: u8) -> Self {
        match vector {
            0 => FaultInfo::DivideByZero,
            6 => FaultInfo::InvalidOpcode,
            13 => FaultInfo::GeneralProtection,
            14 => FaultInfo::PageFault { address: None },
            v => FaultInfo::Other(v),
        }
    }
}

impl fmt::Display for FaultInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultInfo::DivideByZero => f.write_str("divide by zero"),
            FaultInfo::InvalidOpcode => f.write_str("invalid opcode"),
            FaultInfo::PageFault { address: Some(a) } => {
                write!(f, "page fault at {a:#x}")
            }
            FaultInfo::PageFault { address: None } => {
                f.write_str("page fault")
            }
            FaultInfo::GeneralProtection => {
                f.write_str("general protection fault")
            }
            FaultInfo::Other(v) => write!(f, "cpu exception {v}"),
        }
    }
}
