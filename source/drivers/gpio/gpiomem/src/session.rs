// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Device sessions: open/release identity gating and the mmap entry point.

use log::{error, info};

use crate::config::GpioMemConfig;
use crate::error::{Error, Result};
use crate::mapping::{MappingPlan, Validator};
use crate::mm::{MemoryManager, ProtectionPolicy, VmArea};
use crate::region::RegionTable;

/// State shared read-only by every session of an attached device.
pub(crate) struct DeviceState {
    pub(crate) table: RegionTable,
    pub(crate) config: GpioMemConfig,
    pub(crate) protection: Box<dyn ProtectionPolicy + Send + Sync>,
}

impl DeviceState {
    pub(crate) fn open(&self, minor: u32) -> Result<Session<'_>> {
        info!("{}: gpiomem device opened", self.config.node_name);
        self.check_minor(minor)?;
        Ok(Session { state: self, minor })
    }

    pub(crate) fn release(&self, minor: u32) -> Result<()> {
        self.check_minor(minor)
    }

    fn check_minor(&self, minor: u32) -> Result<()> {
        if minor != self.config.minor {
            error!("{}: unknown minor device {minor}", self.config.node_name);
            return Err(Error::NoSuchDevice { minor });
        }
        Ok(())
    }

    fn validator(&self) -> Validator<'_> {
        Validator::new(&self.table)
            .containment(self.config.containment)
            .protection(self.protection.as_ref())
            .byte_access(self.config.byte_access)
    }
}

/// One open handle on the device node.
///
/// Holds no OS resources of its own; it only borrows the attached device.
pub struct Session<'d> {
    state: &'d DeviceState,
    minor: u32,
}

impl Session<'_> {
    /// Minor identity the session was opened with.
    pub fn minor(&self) -> u32 {
        self.minor
    }

    /// Maps the physical range named by `vma` into the caller's address space.
    pub fn mmap<M: MemoryManager + ?Sized>(&self, vma: &VmArea, mm: &mut M) -> Result<MappingPlan> {
        self.state.validator().map(self.minor, vma, mm)
    }

    /// Checks `vma` without installing anything.
    pub fn validate(&self, vma: &VmArea) -> Result<MappingPlan> {
        self.state.validator().validate(self.minor, vma)
    }

    /// Releases the session.
    pub fn close(self) -> Result<()> {
        self.state.release(self.minor)
    }
}

impl core::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session").field("minor", &self.minor).finish()
    }
}
