// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: GPIO memory device (gpiomem): maps GPIO controller register windows for unprivileged callers
//! OWNERS: @runtime @security
//! STATUS: Functional (host backend)
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests per module + integration tests (attach/detach, mmap gating, config)
//!
//! PUBLIC API: GpioMem::{attach, detach, open, release}, Session::{mmap, close},
//!             RegionTable::populate, Validator, GpioMemConfig
//! DEPENDS_ON: platform::ResourceSource, mm::{MemoryManager, ProtectionPolicy},
//!             lifecycle::DeviceRegistrar
//!
//! SECURITY INVARIANTS:
//!   - Only windows listed in the RegionTable can ever reach the remap primitive
//!   - Page-frame and length arithmetic is checked; overflow is a denial
//!   - Mappings are USER and never EXEC, whatever the protection policy returns
//!   - A denied request never calls into the memory manager
//!
//! The physical windows come from the platform description at attach time and are
//! immutable afterwards. Every `open`/`mmap` borrows the attached device, so `detach`
//! (which consumes it) cannot race an in-flight request.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod config;
pub mod error;
#[cfg(feature = "backend-host")]
pub mod host;
pub mod lifecycle;
pub mod mapping;
pub mod mm;
pub mod platform;
pub mod region;
pub mod session;

pub use config::{ConfigError, GpioMemConfig};
pub use error::{Errno, Error, Result};
pub use lifecycle::{ClassId, DevT, DeviceRegistrar, GpioMem, Registration, RegistrationStep};
pub use mapping::{
    page_offset_to_phys, Authorization, ContainmentPolicy, MappingPlan, MappingRequest, Validator,
};
pub use mm::{
    MapError, MemoryManager, PageFlags, ProtectionPolicy, StandardProtection, VmArea, VmOps,
    PAGE_SHIFT, PAGE_SIZE,
};
pub use platform::{MemResource, PlatformDevice, RegProperty, ResourceSource, StaticResources};
pub use region::{Region, RegionTable};
pub use session::Session;

/// Class name registered for the device (also the identity-range name).
pub const DEVICE_NAME: &str = "sunxi-gpiomem";
/// Name of the device node exposed to callers.
pub const NODE_NAME: &str = "gpiomem";
/// The only minor identity the device answers to.
pub const DEVICE_MINOR: u32 = 0;
/// Firmware `compatible` string the driver binds to.
pub const OF_COMPATIBLE: &str = "allwinner, gpiomem";
/// Upper bound on register windows a single device may declare.
pub const MAX_REGIONS: usize = 32;
