// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Platform description: the firmware node the driver binds to and its memory resources.
//!
//! A node describes its register windows in a `reg` property with two address cells
//! and two size cells per window. The declared count is the number of 32-bit cells
//! divided by four; a window resolves to an inclusive `[base, base + size - 1]`
//! memory resource.

use crate::error::Errno;

/// One physical memory resource, inclusive at both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemResource {
    /// First physical address.
    pub start: u64,
    /// Last physical address.
    pub end: u64,
}

/// Supplier of the register windows declared for a device.
pub trait ResourceSource {
    /// Number of windows the platform declares. Zero or negative when the description is
    /// absent or malformed.
    fn declared_count(&self) -> i64;

    /// Resolves the `index`-th memory resource, if present.
    fn resource(&self, index: usize) -> Option<MemResource>;
}

impl<T: ResourceSource + ?Sized> ResourceSource for &T {
    fn declared_count(&self) -> i64 {
        (**self).declared_count()
    }

    fn resource(&self, index: usize) -> Option<MemResource> {
        (**self).resource(index)
    }
}

/// A firmware node: its `compatible` list and its resources.
#[derive(Debug, Clone)]
pub struct PlatformDevice<S> {
    compatible: Vec<String>,
    resources: S,
}

impl<S: ResourceSource> PlatformDevice<S> {
    /// Creates a node description.
    pub fn new<I, C>(compatible: I, resources: S) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        Self { compatible: compatible.into_iter().map(Into::into).collect(), resources }
    }

    /// Compatible strings carried by the node, most specific first.
    pub fn compatible(&self) -> &[String] {
        &self.compatible
    }

    /// True when any of the node's compatible strings is in `accepted`.
    pub fn matches_compatible(&self, accepted: &[String]) -> bool {
        self.compatible.iter().any(|c| accepted.iter().any(|a| a == c))
    }

    /// Memory resources of the node.
    pub fn resources(&self) -> &S {
        &self.resources
    }
}

/// Raw `reg` property of a node (big-endian cells).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegProperty {
    cells: Result<Vec<u32>, Errno>,
}

impl RegProperty {
    /// Address cells per window.
    pub const ADDRESS_CELLS: usize = 2;
    /// Size cells per window.
    pub const SIZE_CELLS: usize = 2;
    /// Cells making up one window.
    pub const CELLS_PER_WINDOW: usize = Self::ADDRESS_CELLS + Self::SIZE_CELLS;

    /// Decodes a raw property value.
    ///
    /// An empty value carries no data; a length that is not a multiple of the cell size
    /// is malformed. Both leave the declared count negative.
    pub fn from_be_bytes(raw: &[u8]) -> Self {
        const ENODATA: Errno = Errno(61);
        if raw.is_empty() {
            return Self { cells: Err(ENODATA) };
        }
        if raw.len() % 4 != 0 {
            return Self { cells: Err(Errno::EINVAL) };
        }
        let cells = raw
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self { cells: Ok(cells) }
    }

    /// A node without a `reg` property.
    pub fn missing() -> Self {
        Self { cells: Err(Errno::EINVAL) }
    }

    /// Encodes `(base, size)` windows as a well-formed property.
    pub fn from_windows(windows: &[(u64, u64)]) -> Self {
        let mut cells = Vec::with_capacity(windows.len() * Self::CELLS_PER_WINDOW);
        for &(base, size) in windows {
            cells.extend_from_slice(&[(base >> 32) as u32, base as u32]);
            cells.extend_from_slice(&[(size >> 32) as u32, size as u32]);
        }
        Self { cells: Ok(cells) }
    }

    /// Number of 32-bit cells, or the negative errno of the lookup.
    pub fn cell_count(&self) -> i64 {
        match &self.cells {
            Ok(cells) => cells.len() as i64,
            Err(errno) => i64::from(errno.to_negative()),
        }
    }

    fn cell_pair(cells: &[u32], at: usize) -> u64 {
        (u64::from(cells[at]) << 32) | u64::from(cells[at + 1])
    }
}

impl ResourceSource for RegProperty {
    fn declared_count(&self) -> i64 {
        self.cell_count() / Self::CELLS_PER_WINDOW as i64
    }

    fn resource(&self, index: usize) -> Option<MemResource> {
        let cells = self.cells.as_ref().ok()?;
        let first = index.checked_mul(Self::CELLS_PER_WINDOW)?;
        if first.checked_add(Self::CELLS_PER_WINDOW)? > cells.len() {
            return None;
        }
        let base = Self::cell_pair(cells, first);
        let size = Self::cell_pair(cells, first + Self::ADDRESS_CELLS);
        let end = base.checked_add(size.checked_sub(1)?)?;
        Some(MemResource { start: base, end })
    }
}

/// Resources listed up front, with an explicitly declared count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticResources {
    declared: i64,
    slots: Vec<Option<MemResource>>,
}

impl StaticResources {
    /// One resolvable resource per `(start, end)` pair; the declared count matches.
    pub fn from_windows(windows: &[(u64, u64)]) -> Self {
        let slots: Vec<_> =
            windows.iter().map(|&(start, end)| Some(MemResource { start, end })).collect();
        Self { declared: slots.len() as i64, slots }
    }

    /// Arbitrary declared count over arbitrary slots; `None` slots are unresolvable.
    pub fn with_declared(declared: i64, slots: Vec<Option<MemResource>>) -> Self {
        Self { declared, slots }
    }
}

impl ResourceSource for StaticResources {
    fn declared_count(&self) -> i64 {
        self.declared
    }

    fn resource(&self, index: usize) -> Option<MemResource> {
        self.slots.get(index).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn be(cells: &[u32]) -> Vec<u8> {
        cells.iter().flat_map(|c| c.to_be_bytes()).collect()
    }

    #[test]
    fn reg_property_counts_windows_by_four_cells() {
        let reg = RegProperty::from_be_bytes(&be(&[0, 0x01c2_0800, 0, 0x400, 0, 0x01f0_2c00, 0, 0x400]));
        assert_eq!(reg.cell_count(), 8);
        assert_eq!(reg.declared_count(), 2);
        assert_eq!(reg.resource(0), Some(MemResource { start: 0x01c2_0800, end: 0x01c2_0bff }));
        assert_eq!(reg.resource(1), Some(MemResource { start: 0x01f0_2c00, end: 0x01f0_2fff }));
        assert_eq!(reg.resource(2), None);
    }

    #[test]
    fn trailing_partial_window_is_not_declared() {
        let reg = RegProperty::from_be_bytes(&be(&[0, 0x1000, 0, 0x1000, 0, 0x2000]));
        assert_eq!(reg.declared_count(), 1);
        assert_eq!(reg.resource(1), None);
    }

    #[test]
    fn malformed_and_missing_properties_declare_nothing() {
        assert!(RegProperty::from_be_bytes(&[]).declared_count() <= 0);
        assert!(RegProperty::from_be_bytes(&[0, 0, 0]).declared_count() <= 0);
        assert!(RegProperty::missing().declared_count() <= 0);
        assert_eq!(RegProperty::missing().cell_count(), -22);
    }

    #[test]
    fn zero_sized_or_wrapping_window_is_unresolvable() {
        let reg = RegProperty::from_windows(&[(0x1000, 0), (u64::MAX, 2)]);
        assert_eq!(reg.declared_count(), 2);
        assert_eq!(reg.resource(0), None);
        assert_eq!(reg.resource(1), None);
    }

    #[test]
    fn high_addresses_use_both_address_cells() {
        let reg = RegProperty::from_windows(&[(0x1_0000_0000, 0x1000)]);
        assert_eq!(reg.resource(0), Some(MemResource { start: 0x1_0000_0000, end: 0x1_0000_0fff }));
    }

    #[test]
    fn compatible_matching() {
        let node = PlatformDevice::new(["vendor,board-gpio", "allwinner, gpiomem"], StaticResources::default());
        assert_eq!(node.compatible(), ["vendor,board-gpio", "allwinner, gpiomem"]);
        assert!(node.matches_compatible(&["allwinner, gpiomem".to_string()]));
        assert!(!node.matches_compatible(&["brcm,bcm2835-gpiomem".to_string()]));
    }

    #[test]
    fn static_resources_report_missing_slots() {
        let res = StaticResources::with_declared(3, vec![Some(MemResource { start: 1, end: 2 }), None]);
        assert_eq!(res.declared_count(), 3);
        assert!(res.resource(0).is_some());
        assert!(res.resource(1).is_none());
        assert!(res.resource(2).is_none());
    }
}
