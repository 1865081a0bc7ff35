// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The W^X memory-protection policy engine.
//!
//! The law is small: no live mapping is ever both writable and executable.
//! Every path that installs or rewrites a user mapping funnels through
//! [`WxPolicy::map_page_secure`], which checks the law before touching the
//! table and counts the attempts it blocks. Transitions between R/W and R/X
//! go through [`Kernel::make_writable`] / [`Kernel::make_executable`], which
//! also tell the platform to flush the instruction cache for the range.
//!
//! A page that is not mapped is trivially compliant.

use abi::{
    Error, PageFlags, PAGE_SIZE, USER_SPACE_BASE, USER_SPACE_LIMIT,
};

use crate::platform::Platform;
use crate::Kernel;

/// Capacity of the user mapping table.
pub const MAX_USER_MAPPINGS: usize = 64;

/// One installed user mapping, page-granular.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PageMapping {
    pub virt: usize,
    pub phys: usize,
    pub flags: PageFlags,
}

/// Counters the policy maintains for the operator.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SecurityMetrics {
    /// Mapping attempts rejected for carrying W and X together.
    pub wx_violations_blocked: u32,
    /// All policy violations, W^X or otherwise.
    pub total_violations: u32,
    /// Mappings installed through the checked path.
    pub pages_protected: u32,
}

/// The policy engine: a fixed mapping table plus violation counters.
pub struct WxPolicy {
    mappings: [Option<PageMapping>; MAX_USER_MAPPINGS],
    metrics: SecurityMetrics,
}

/// Checks the W^X law on a permission set, in isolation from any mapping.
pub fn validate_perms(flags: PageFlags) -> Result<(), Error> {
    if flags.violates_wx() {
        Err(Error::Security)
    } else {
        Ok(())
    }
}

/// Validates a `(addr, size)` range for policy operations: page alignment,
/// non-empty, no overflow, and containment in the user window. Returns the
/// exclusive, page-rounded end address.
fn check_range(addr: usize, size: usize) -> Result<usize, Error> {
    if addr % PAGE_SIZE != 0 || size == 0 {
        return Err(Error::Inval);
    }
    let rounded = size
        .checked_add(PAGE_SIZE - 1)
        .ok_or(Error::Inval)?
        & !(PAGE_SIZE - 1);
    let end = addr.checked_add(rounded).ok_or(Error::Inval)?;
    if addr < USER_SPACE_BASE || end > USER_SPACE_LIMIT {
        return Err(Error::Inval);
    }
    Ok(end)
}

impl WxPolicy {
    pub(crate) fn new() -> Self {
        Self {
            mappings: [None; MAX_USER_MAPPINGS],
            metrics: SecurityMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &SecurityMetrics {
        &self.metrics
    }

    /// The mapping installed at `virt`, if any.
    pub fn mapping(&self, virt: usize) -> Option<&PageMapping> {
        self.mappings
            .iter()
            .flatten()
            .find(|m| m.virt == virt)
    }

    /// Installs or rewrites one user mapping, enforcing W^X first.
    ///
    /// A rejected mapping is not installed in any form, and the attempt is
    /// counted.
    pub fn map_page_secure(
        &mut self,
        virt: usize,
        phys: usize,
        flags: PageFlags,
    ) -> Result<(), Error> {
        if validate_perms(flags).is_err() {
            self.metrics.wx_violations_blocked += 1;
            self.metrics.total_violations += 1;
            return Err(Error::Security);
        }
        check_range(virt, PAGE_SIZE)?;

        let entry = PageMapping { virt, phys, flags };
        if let Some(existing) = self
            .mappings
            .iter_mut()
            .flatten()
            .find(|m| m.virt == virt)
        {
            *existing = entry;
        } else {
            let slot = self
                .mappings
                .iter()
                .position(|m| m.is_none())
                .ok_or(Error::NoMem)?;
            self.mappings[slot] = Some(entry);
        }
        self.metrics.pages_protected += 1;
        Ok(())
    }

    /// Maps a code page: present, readable, executable.
    pub fn map_code_page(&mut self, virt: usize, phys: usize) -> Result<(), Error> {
        self.map_page_secure(
            virt,
            phys,
            PageFlags::PRESENT | PageFlags::READ | PageFlags::EXECUTE,
        )
    }

    /// Maps a data page: present, readable, writable.
    pub fn map_data_page(&mut self, virt: usize, phys: usize) -> Result<(), Error> {
        self.map_page_secure(
            virt,
            phys,
            PageFlags::PRESENT | PageFlags::READ | PageFlags::WRITE,
        )
    }

    /// Maps a read-only page.
    pub fn map_readonly_page(
        &mut self,
        virt: usize,
        phys: usize,
    ) -> Result<(), Error> {
        self.map_page_secure(virt, phys, PageFlags::PRESENT | PageFlags::READ)
    }

    /// Checks the mapping covering `virt` against the law. Unmapped
    /// addresses are compliant.
    pub fn validate_page(&self, virt: usize) -> Result<(), Error> {
        match self.mapping(virt & !(PAGE_SIZE - 1)) {
            Some(m) => validate_perms(m.flags),
            None => Ok(()),
        }
    }

    /// Rewrites every mapping in the range to readable-writable,
    /// clearing execute.
    fn set_range_writable(&mut self, addr: usize, size: usize) -> Result<(), Error> {
        let end = check_range(addr, size)?;
        for m in self.mappings.iter_mut().flatten() {
            if m.virt >= addr && m.virt < end {
                m.flags.insert(PageFlags::READ | PageFlags::WRITE);
                m.flags.remove(PageFlags::EXECUTE);
            }
        }
        Ok(())
    }

    /// Rewrites every mapping in the range to readable-executable,
    /// clearing write.
    fn set_range_executable(&mut self, addr: usize, size: usize) -> Result<(), Error> {
        let end = check_range(addr, size)?;
        for m in self.mappings.iter_mut().flatten() {
            if m.virt >= addr && m.virt < end {
                m.flags.insert(PageFlags::READ | PageFlags::EXECUTE);
                m.flags.remove(PageFlags::WRITE);
            }
        }
        Ok(())
    }

    /// Rewrites every mapping in the range to read-only.
    fn set_range_readonly(&mut self, addr: usize, size: usize) -> Result<(), Error> {
        let end = check_range(addr, size)?;
        for m in self.mappings.iter_mut().flatten() {
            if m.virt >= addr && m.virt < end {
                m.flags.insert(PageFlags::READ);
                m.flags.remove(PageFlags::WRITE | PageFlags::EXECUTE);
            }
        }
        Ok(())
    }
}

impl<P: Platform> Kernel<P> {
    /// Transitions a range to R+W, clearing X, and flushes the instruction
    /// cache for it.
    pub fn make_writable(&mut self, addr: usize, size: usize) -> Result<(), Error> {
        self.wx.set_range_writable(addr, size)?;
        self.platform.flush_icache(addr, size);
        Ok(())
    }

    /// Transitions a range to R+X, clearing W, and flushes the instruction
    /// cache for it.
    pub fn make_executable(&mut self, addr: usize, size: usize) -> Result<(), Error> {
        self.wx.set_range_executable(addr, size)?;
        self.platform.flush_icache(addr, size);
        Ok(())
    }

    /// Transitions a range to read-only.
    pub fn make_readonly(&mut self, addr: usize, size: usize) -> Result<(), Error> {
        self.wx.set_range_readonly(addr, size)
    }
}
