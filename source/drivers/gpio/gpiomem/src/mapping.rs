// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Mapping validator: decides whether an mmap request may reach the remap primitive
//! OWNERS: @runtime @security
//! INVARIANTS:
//!   - page offset -> physical address is `page_offset * PAGE_SIZE`, checked
//!   - first matching window in table order wins; no match means no memory-manager call
//!   - a request is mapped whole against one window, or not at all
//!   - resulting protection always carries USER|VALID and never EXECUTE
//!
//! The default containment test is the reference driver's: the *authorized window* must
//! lie inside the *requested range* (`region.start >= start && region.end <= end`).
//! [`ContainmentPolicy::RequestWithinRegion`] is the conventional access-control reading
//! (the request must lie inside a window) for deployments that need it.

use log::{debug, warn};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::mm::{MemoryManager, PageFlags, ProtectionPolicy, StandardProtection, VmArea, VmOps, PAGE_SIZE};
use crate::region::{Region, RegionTable};

static PASS_THROUGH: StandardProtection = StandardProtection::PassThrough;

/// Converts an mmap page offset into the physical address it names.
///
/// Returns `None` when the product does not fit the physical address width.
pub fn page_offset_to_phys(page_offset: u64) -> Option<u64> {
    page_offset.checked_mul(PAGE_SIZE)
}

/// How a requested range is compared against an authorized window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainmentPolicy {
    /// Window must lie within the requested range (reference driver containment).
    #[default]
    RegionWithinRequest,
    /// Requested range must lie within the window (window end inclusive).
    ///
    /// Requests start on a page boundary and span whole pages, so a window that is
    /// smaller than a page or not page aligned (e.g. `0x01c20800..=0x01c20bff`) can
    /// never be mapped under this policy. Windows are compared as declared, never
    /// rounded out to pages.
    RequestWithinRegion,
}

impl ContainmentPolicy {
    /// True when `region` authorizes the physical range `[start, end)`.
    pub fn admits(self, region: &Region, start: u64, end: u64) -> bool {
        match self {
            Self::RegionWithinRequest => region.start >= start && region.end <= end,
            Self::RequestWithinRegion => {
                end > start && start >= region.start && end - 1 <= region.end
            }
        }
    }
}

/// Physical range a caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingRequest {
    /// Page frame of the first byte.
    pub page_offset: u64,
    /// Length in bytes.
    pub length: u64,
}

impl MappingRequest {
    /// Creates a request.
    pub const fn new(page_offset: u64, length: u64) -> Self {
        Self { page_offset, length }
    }

    /// The request carried by a caller's VMA.
    pub fn from_vma(vma: &VmArea) -> Self {
        Self::new(vma.page_offset, vma.len())
    }

    /// Physical `[start, end)` of the request, or `None` on overflow.
    pub fn window(&self) -> Option<(u64, u64)> {
        let start = page_offset_to_phys(self.page_offset)?;
        let end = start.checked_add(self.length)?;
        Some((start, end))
    }

    fn saturated_window(&self) -> (u64, u64) {
        let start = self.page_offset.saturating_mul(PAGE_SIZE);
        (start, start.saturating_add(self.length))
    }
}

/// A request matched against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authorization {
    /// Index of the matching window in the table.
    pub region_index: usize,
    /// The matching window.
    pub region: Region,
    /// Requested physical start.
    pub start: u64,
    /// Requested physical end (exclusive).
    pub end: u64,
}

/// Checks `request` against `table` under `policy`.
///
/// Windows are scanned from index 0; the first one admitted wins.
pub fn authorize(
    table: &RegionTable,
    request: &MappingRequest,
    policy: ContainmentPolicy,
) -> Result<Authorization> {
    let Some((start, end)) = request.window() else {
        let (start, end) = request.saturated_window();
        warn!("gpiomem: mapping request overflows physical range (pgoff {:#x})", request.page_offset);
        return Err(Error::AccessDenied { start, end });
    };
    table
        .iter()
        .enumerate()
        .find(|(_, region)| policy.admits(region, start, end))
        .map(|(region_index, region)| Authorization { region_index, region: *region, start, end })
        .ok_or_else(|| {
            warn!("gpiomem: no authorized window for [{start:#x}, {end:#x})");
            Error::AccessDenied { start, end }
        })
}

/// What gets handed to the remap primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingPlan {
    /// Physical page frame of the first byte.
    pub page_offset: u64,
    /// Caller virtual address the mapping starts at.
    pub virtual_start: u64,
    /// Bytes to map.
    pub length: u64,
    /// Protection the mapping gets.
    pub protection: PageFlags,
    /// Fault-path capabilities registered with the mapping.
    pub ops: VmOps,
    /// Window that authorized the mapping.
    pub region_index: usize,
}

/// Validates caller VMAs against a region table and installs accepted ones.
#[derive(Clone, Copy)]
pub struct Validator<'a> {
    table: &'a RegionTable,
    containment: ContainmentPolicy,
    protection: &'a dyn ProtectionPolicy,
    byte_access: bool,
}

impl<'a> Validator<'a> {
    /// Validator with the default containment, pass-through protection and byte access on.
    pub fn new(table: &'a RegionTable) -> Self {
        Self {
            table,
            containment: ContainmentPolicy::default(),
            protection: &PASS_THROUGH,
            byte_access: true,
        }
    }

    /// Selects the containment policy.
    pub fn containment(mut self, containment: ContainmentPolicy) -> Self {
        self.containment = containment;
        self
    }

    /// Selects the protection hook.
    pub fn protection(mut self, protection: &'a dyn ProtectionPolicy) -> Self {
        self.protection = protection;
        self
    }

    /// Enables or disables byte-granular physical access on the mapping.
    pub fn byte_access(mut self, enabled: bool) -> Self {
        self.byte_access = enabled;
        self
    }

    /// Decides whether `vma` may be mapped for the session with identity `minor`.
    pub fn validate(&self, minor: u32, vma: &VmArea) -> Result<MappingPlan> {
        let request = MappingRequest::from_vma(vma);
        let auth = authorize(self.table, &request, self.containment)?;
        let protection = self
            .protection
            .phys_mem_access_prot(minor, vma.page_offset, request.length, vma.prot)
            .union(PageFlags::USER | PageFlags::VALID)
            .difference(PageFlags::EXECUTE);
        Ok(MappingPlan {
            page_offset: vma.page_offset,
            virtual_start: vma.start,
            length: request.length,
            protection,
            ops: VmOps { access_phys: self.byte_access },
            region_index: auth.region_index,
        })
    }

    /// Validates `vma` and, if accepted, asks `mm` to install it.
    ///
    /// A denied request never reaches `mm`. A refusal from `mm` is reported as
    /// [`Error::TransientMap`].
    pub fn map<M: MemoryManager + ?Sized>(
        &self,
        minor: u32,
        vma: &VmArea,
        mm: &mut M,
    ) -> Result<MappingPlan> {
        let plan = self.validate(minor, vma)?;
        mm.remap_pfn_range(plan.virtual_start, plan.page_offset, plan.length, plan.protection, plan.ops)
            .map_err(|err| {
                warn!("gpiomem: remap of pgoff {:#x} failed: {err}", plan.page_offset);
                Error::TransientMap(err)
            })?;
        debug!(
            "gpiomem: mapped pgoff {:#x} len {:#x} at {:#x} (window {})",
            plan.page_offset, plan.length, plan.virtual_start, plan.region_index
        );
        Ok(plan)
    }
}
