// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Table of authorized physical register windows.
//!
//! INVARIANTS: `0 < len <= capacity <= MAX_REGIONS`; entries are copied verbatim from
//! the platform resources and never change after population.

use core::fmt;

use log::error;

use crate::error::{Error, Result};
use crate::platform::ResourceSource;
use crate::MAX_REGIONS;

/// One authorized physical window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    /// Inclusive lower physical bound.
    pub start: u64,
    /// Upper bound used by the containment check (inclusive resource end).
    pub end: u64,
}

impl Region {
    /// Creates a region from raw bounds.
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Size as reported in diagnostics (`end - start`).
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "start:{:#010x} end:{:#010x} size:{:#010x}", self.start, self.end, self.size())
    }
}

/// Immutable, bounded sequence of authorized windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionTable {
    regions: Vec<Region>,
}

impl RegionTable {
    /// Builds the table from the platform's declared windows.
    ///
    /// The declared count must be in `1..=capacity`. Every declared index must resolve;
    /// the first one that does not fails the whole population and nothing built so far
    /// survives.
    pub fn populate<S: ResourceSource + ?Sized>(resources: &S, capacity: usize) -> Result<Self> {
        let count = checked_count(resources.declared_count(), capacity)?;
        let mut regions = Vec::with_capacity(count);
        for index in 0..count {
            let Some(res) = resources.resource(index) else {
                error!("gpiomem: failed to get IO resource area {index}");
                return Err(Error::Resource { index });
            };
            regions.push(Region::new(res.start, res.end));
        }
        Ok(Self { regions })
    }

    /// Builds a table directly from regions, enforcing the same length invariant.
    pub fn from_regions(regions: Vec<Region>, capacity: usize) -> Result<Self> {
        checked_count(regions.len() as i64, capacity)?;
        Ok(Self { regions })
    }

    /// Number of windows (always at least one).
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Returns the `index`-th window.
    pub fn get(&self, index: usize) -> Option<&Region> {
        self.regions.get(index)
    }

    /// Windows in table order.
    pub fn iter(&self) -> core::slice::Iter<'_, Region> {
        self.regions.iter()
    }

    /// Windows as a slice.
    pub fn as_slice(&self) -> &[Region] {
        &self.regions
    }
}

impl<'a> IntoIterator for &'a RegionTable {
    type Item = &'a Region;
    type IntoIter = core::slice::Iter<'a, Region>;

    fn into_iter(self) -> Self::IntoIter {
        self.regions.iter()
    }
}

fn checked_count(declared: i64, capacity: usize) -> Result<usize> {
    let capacity = capacity.min(MAX_REGIONS);
    if declared <= 0 {
        error!("gpiomem: failed to get gpio register area (declared {declared})");
        return Err(Error::NoWindows { declared });
    }
    match usize::try_from(declared) {
        Ok(count) if count <= capacity => Ok(count),
        _ => {
            error!("gpiomem: too many gpio register areas (declared {declared}, max {capacity})");
            Err(Error::TooManyWindows { declared, capacity })
        }
    }
}
