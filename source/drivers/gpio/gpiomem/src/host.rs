// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host backend for the gpiomem collaborators (tests and bring-up)
//! OWNERS: @runtime
//! NOTE: In-memory only; nothing here touches real page tables or device nodes.
//!
//! - [`HostAddressSpace`]: page-granular user address space implementing the remap
//!   primitive, with a failpoint for the next remap and a call counter.
//! - [`HostRegistrar`]: registrar keeping a journal of acquire/release events and
//!   per-step failpoints.

use std::collections::BTreeMap;

use log::warn;
use parking_lot::Mutex;

use crate::error::Errno;
use crate::lifecycle::{ClassId, DevT, DeviceRegistrar, Registration, RegistrationStep};
use crate::mm::{MapError, MemoryManager, PageFlags, VmOps, PAGE_SHIFT, PAGE_SIZE};

/// Highest user virtual address + 1 (Sv39 lower half).
const USER_VA_LIMIT: u64 = 1 << 38;

/// First major number handed out by the host registrar.
const FIRST_DYNAMIC_MAJOR: u32 = 240;

/// One installed remap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapRecord {
    /// Virtual start of the mapping.
    pub virt_start: u64,
    /// First physical page frame.
    pub pfn: u64,
    /// Length in bytes.
    pub len: u64,
    /// Installed protection.
    pub prot: PageFlags,
    /// Fault-path capabilities.
    pub ops: VmOps,
}

/// Page-granular user address space.
#[derive(Debug, Default)]
pub struct HostAddressSpace {
    // virtual page number -> physical address | flags
    entries: BTreeMap<u64, u64>,
    records: Vec<RemapRecord>,
    remap_calls: usize,
    deny_next: bool,
}

impl HostAddressSpace {
    /// Creates an empty address space.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces the next remap to fail with [`MapError::PermissionDenied`].
    pub fn deny_next_remap(&mut self) {
        self.deny_next = true;
    }

    /// Number of remap calls received, successful or not.
    pub fn remap_calls(&self) -> usize {
        self.remap_calls
    }

    /// Installed remaps, oldest first.
    pub fn records(&self) -> &[RemapRecord] {
        &self.records
    }

    /// Number of mapped pages.
    pub fn mapped_pages(&self) -> usize {
        self.entries.len()
    }

    /// Translates `va` to its physical address and the page's protection.
    pub fn translate(&self, va: u64) -> Option<(u64, PageFlags)> {
        let entry = *self.entries.get(&(va >> PAGE_SHIFT))?;
        let flags = PageFlags::from_bits_truncate(entry & (PAGE_SIZE - 1));
        let pa = (entry & !(PAGE_SIZE - 1)) | (va & (PAGE_SIZE - 1));
        Some((pa, flags))
    }
}

impl MemoryManager for HostAddressSpace {
    fn remap_pfn_range(
        &mut self,
        virt_start: u64,
        pfn: u64,
        len: u64,
        prot: PageFlags,
        ops: VmOps,
    ) -> Result<(), MapError> {
        self.remap_calls += 1;
        if core::mem::take(&mut self.deny_next) {
            return Err(MapError::PermissionDenied);
        }
        if virt_start % PAGE_SIZE != 0 {
            return Err(MapError::Unaligned);
        }
        if !prot.is_leaf() {
            return Err(MapError::InvalidFlags);
        }
        if prot.contains(PageFlags::WRITE) && prot.contains(PageFlags::EXECUTE) {
            return Err(MapError::PermissionDenied);
        }
        let pages = len.div_ceil(PAGE_SIZE);
        if pages == 0 {
            return Err(MapError::OutOfRange);
        }
        let span = pages.checked_mul(PAGE_SIZE).ok_or(MapError::OutOfRange)?;
        let virt_end = virt_start.checked_add(span).ok_or(MapError::OutOfRange)?;
        if virt_end > USER_VA_LIMIT {
            return Err(MapError::OutOfRange);
        }
        let phys_start = pfn.checked_mul(PAGE_SIZE).ok_or(MapError::OutOfRange)?;
        phys_start.checked_add(span).ok_or(MapError::OutOfRange)?;

        let first_vpn = virt_start >> PAGE_SHIFT;
        if self.entries.range(first_vpn..first_vpn + pages).next().is_some() {
            return Err(MapError::Overlap);
        }
        for page in 0..pages {
            let pa = phys_start + page * PAGE_SIZE;
            self.entries.insert(first_vpn + page, pa | prot.bits());
        }
        self.records.push(RemapRecord { virt_start, pfn, len, prot, ops });
        Ok(())
    }
}

/// Journal entry of the host registrar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrarEvent {
    /// A resource was acquired.
    Acquired(Registration),
    /// A resource was released.
    Released(Registration),
}

#[derive(Default)]
struct RegistrarState {
    next_major: u32,
    next_class: u32,
    journal: Vec<RegistrarEvent>,
    live: Vec<Registration>,
    fail_at: Option<(RegistrationStep, Errno)>,
}

impl RegistrarState {
    fn check_failpoint(&mut self, step: RegistrationStep) -> Result<(), Errno> {
        match self.fail_at {
            Some((at, errno)) if at == step => {
                self.fail_at = None;
                Err(errno)
            }
            _ => Ok(()),
        }
    }

    fn acquire(&mut self, registration: Registration) {
        self.live.push(registration);
        self.journal.push(RegistrarEvent::Acquired(registration));
    }

    fn release(&mut self, registration: Registration) {
        match self.live.iter().position(|held| *held == registration) {
            Some(index) => {
                self.live.remove(index);
            }
            None => warn!("host registrar: release of unknown {registration:?}"),
        }
        self.journal.push(RegistrarEvent::Released(registration));
    }
}

/// In-memory device registrar.
#[derive(Default)]
pub struct HostRegistrar {
    state: Mutex<RegistrarState>,
}

impl HostRegistrar {
    /// Creates a registrar with nothing registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next attempt at `step` fail with `errno`.
    pub fn fail_at(&self, step: RegistrationStep, errno: Errno) {
        self.state.lock().fail_at = Some((step, errno));
    }

    /// Every acquire and release so far, in order.
    pub fn journal(&self) -> Vec<RegistrarEvent> {
        self.state.lock().journal.clone()
    }

    /// Resources currently held, oldest first.
    pub fn live(&self) -> Vec<Registration> {
        self.state.lock().live.clone()
    }

    /// True when nothing is registered.
    pub fn is_clean(&self) -> bool {
        self.state.lock().live.is_empty()
    }
}

impl DeviceRegistrar for HostRegistrar {
    fn alloc_chrdev_region(&self, first_minor: u32, count: u32, _name: &str) -> Result<DevT, Errno> {
        let mut state = self.state.lock();
        state.check_failpoint(RegistrationStep::ChrdevRegion)?;
        let first = DevT { major: FIRST_DYNAMIC_MAJOR + state.next_major, minor: first_minor };
        state.next_major += 1;
        state.acquire(Registration::ChrdevRegion { first, count });
        Ok(first)
    }

    fn unregister_chrdev_region(&self, first: DevT, count: u32) {
        self.state.lock().release(Registration::ChrdevRegion { first, count });
    }

    fn cdev_add(&self, devt: DevT, count: u32) -> Result<(), Errno> {
        let mut state = self.state.lock();
        state.check_failpoint(RegistrationStep::Cdev)?;
        let held = state
            .live
            .iter()
            .any(|r| matches!(r, Registration::ChrdevRegion { first, .. } if first.major == devt.major));
        if !held {
            return Err(Errno::EINVAL);
        }
        state.acquire(Registration::Cdev { devt, count });
        Ok(())
    }

    fn cdev_del(&self, devt: DevT) {
        let mut state = self.state.lock();
        let count = state
            .live
            .iter()
            .find_map(|r| match r {
                Registration::Cdev { devt: d, count } if *d == devt => Some(*count),
                _ => None,
            })
            .unwrap_or(1);
        state.release(Registration::Cdev { devt, count });
    }

    fn class_create(&self, _name: &str) -> Result<ClassId, Errno> {
        let mut state = self.state.lock();
        state.check_failpoint(RegistrationStep::Class)?;
        let class = ClassId(state.next_class);
        state.next_class += 1;
        state.acquire(Registration::Class(class));
        Ok(class)
    }

    fn class_destroy(&self, class: ClassId) {
        self.state.lock().release(Registration::Class(class));
    }

    fn device_create(&self, class: ClassId, devt: DevT, _name: &str) -> Result<(), Errno> {
        let mut state = self.state.lock();
        state.check_failpoint(RegistrationStep::Node)?;
        if !state.live.contains(&Registration::Class(class)) {
            return Err(Errno::EINVAL);
        }
        state.acquire(Registration::Node { class, devt });
        Ok(())
    }

    fn device_destroy(&self, class: ClassId, devt: DevT) {
        self.state.lock().release(Registration::Node { class, devt });
    }
}
