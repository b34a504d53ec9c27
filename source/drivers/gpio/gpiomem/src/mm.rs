// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Memory-manager seam: protection flags, the caller's VMA, and the remap primitive.
//!
//! The driver never touches page tables itself. It hands a validated plan to a
//! [`MemoryManager`] and asks a [`ProtectionPolicy`] which attributes the mapping gets.

use bitflags::bitflags;
use serde::Deserialize;
use thiserror::Error;

/// log2 of the platform page size.
pub const PAGE_SHIFT: u32 = 12;
/// Size of a page in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
    /// Protection attributes of a user mapping (Sv39 PTE layout plus a device bit).
    pub struct PageFlags: u64 {
        /// Entry is present.
        const VALID = 1 << 0;
        /// Readable.
        const READ = 1 << 1;
        /// Writable.
        const WRITE = 1 << 2;
        /// Executable.
        const EXECUTE = 1 << 3;
        /// Accessible from user mode.
        const USER = 1 << 4;
        /// Device memory: uncached, strongly ordered.
        const UNCACHED = 1 << 5;
    }
}

const LEAF_PERMS: PageFlags = PageFlags::READ.union(PageFlags::WRITE).union(PageFlags::EXECUTE);

impl PageFlags {
    /// Read/write user data protection requested by a typical `mmap(PROT_READ | PROT_WRITE)`.
    pub const fn user_rw() -> Self {
        Self::VALID.union(Self::READ).union(Self::WRITE).union(Self::USER)
    }

    /// True when the flags describe an installable leaf entry.
    pub fn is_leaf(self) -> bool {
        self.contains(Self::VALID) && self.intersects(LEAF_PERMS)
    }
}

/// Error returned by the remap primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MapError {
    /// Virtual address is not page aligned.
    #[error("unaligned address")]
    Unaligned,
    /// Mapping would exceed the addressable range.
    #[error("address out of range")]
    OutOfRange,
    /// Mapping violates W^X or was refused by the memory manager.
    #[error("permission denied")]
    PermissionDenied,
    /// Mapping overlaps an existing entry.
    #[error("overlaps an existing mapping")]
    Overlap,
    /// Provided flags are not suitable for installing a mapping.
    #[error("invalid flags")]
    InvalidFlags,
}

/// The caller's virtual memory area as handed to the mmap entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmArea {
    /// First virtual address of the area.
    pub start: u64,
    /// One past the last virtual address of the area.
    pub end: u64,
    /// Page offset supplied to mmap; interpreted as a physical page frame.
    pub page_offset: u64,
    /// Protection the caller asked for.
    pub prot: PageFlags,
}

impl VmArea {
    /// Describes a `len`-byte area at `start` backed by page frame `page_offset`, read/write.
    ///
    /// Returns `None` when the area would end past the top of the address space.
    pub fn new(start: u64, len: u64, page_offset: u64) -> Option<Self> {
        let end = start.checked_add(len)?;
        Some(Self { start, end, page_offset, prot: PageFlags::user_rw() })
    }

    /// Overrides the requested protection.
    pub fn with_prot(mut self, prot: PageFlags) -> Self {
        self.prot = prot;
        self
    }

    /// Length of the area in bytes.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// True when the area spans no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fault-path capabilities registered alongside a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VmOps {
    /// Byte-granular access to the underlying physical page (debugger/ptrace style access).
    pub access_phys: bool,
}

/// Physical-memory access protection hook.
///
/// Given the session's minor identity, the requested page frame, the length and the
/// protection the caller asked for, returns the protection the mapping gets.
pub trait ProtectionPolicy {
    /// Derives the protection for a physical mapping.
    fn phys_mem_access_prot(
        &self,
        minor: u32,
        page_offset: u64,
        len: u64,
        requested: PageFlags,
    ) -> PageFlags;
}

/// Built-in protection policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StandardProtection {
    /// Keep the requested protection (minus execute). Used where the architecture has no hook.
    #[default]
    PassThrough,
    /// Mark the mapping as device memory, as architectures that specialize the hook do for non-RAM.
    Uncached,
}

impl ProtectionPolicy for StandardProtection {
    fn phys_mem_access_prot(
        &self,
        _minor: u32,
        _page_offset: u64,
        _len: u64,
        requested: PageFlags,
    ) -> PageFlags {
        let prot = requested.difference(PageFlags::EXECUTE);
        match self {
            Self::PassThrough => prot,
            Self::Uncached => prot | PageFlags::UNCACHED,
        }
    }
}

/// The OS remap primitive.
pub trait MemoryManager {
    /// Maps `len` bytes of physical memory starting at page frame `pfn` at `virt_start`.
    ///
    /// Implementations install all pages or none.
    fn remap_pfn_range(
        &mut self,
        virt_start: u64,
        pfn: u64,
        len: u64,
        prot: PageFlags,
        ops: VmOps,
    ) -> Result<(), MapError>;
}

impl<T: MemoryManager + ?Sized> MemoryManager for &mut T {
    fn remap_pfn_range(
        &mut self,
        virt_start: u64,
        pfn: u64,
        len: u64,
        prot: PageFlags,
        ops: VmOps,
    ) -> Result<(), MapError> {
        (**self).remap_pfn_range(virt_start, pfn, len, prot, ops)
    }
}
