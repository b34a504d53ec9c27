// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Attach/detach of the gpiomem device
//! OWNERS: @runtime
//! INVARIANTS:
//!   - the region table is built before anything is registered
//!   - registrations are released exactly once, in reverse order of acquisition,
//!     whether attach fails midway, `detach` is called, or the device is dropped
//!   - no partially attached device is ever returned
//!
//! Registration steps, in order: identity range, character device, class, node.

use core::fmt;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::config::GpioMemConfig;
use crate::error::{Errno, Error, Result};
use crate::mm::ProtectionPolicy;
use crate::platform::{PlatformDevice, ResourceSource};
use crate::region::RegionTable;
use crate::session::{DeviceState, Session};

/// Device number (major, minor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevT {
    /// Major number assigned by the registrar.
    pub major: u32,
    /// Minor number.
    pub minor: u32,
}

/// Opaque handle to a registered class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

/// Registration steps performed by attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationStep {
    /// Identity-number range allocation.
    ChrdevRegion,
    /// Character device entry points.
    Cdev,
    /// Class (visibility) entry.
    Class,
    /// Device node.
    Node,
}

impl fmt::Display for RegistrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ChrdevRegion => "alloc_chrdev_region",
            Self::Cdev => "cdev_add",
            Self::Class => "class_create",
            Self::Node => "device_create",
        })
    }
}

/// A resource held with the registrar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Registration {
    /// Allocated identity range.
    ChrdevRegion {
        /// First device number of the range.
        first: DevT,
        /// Number of minors.
        count: u32,
    },
    /// Registered character device.
    Cdev {
        /// Device number the entry points answer to.
        devt: DevT,
        /// Number of minors.
        count: u32,
    },
    /// Created class.
    Class(ClassId),
    /// Created node.
    Node {
        /// Class the node belongs to.
        class: ClassId,
        /// Device number of the node.
        devt: DevT,
    },
}

impl Registration {
    /// Step that acquired this resource.
    pub fn step(&self) -> RegistrationStep {
        match self {
            Self::ChrdevRegion { .. } => RegistrationStep::ChrdevRegion,
            Self::Cdev { .. } => RegistrationStep::Cdev,
            Self::Class(_) => RegistrationStep::Class,
            Self::Node { .. } => RegistrationStep::Node,
        }
    }
}

/// OS device-registration primitives.
pub trait DeviceRegistrar {
    /// Allocates `count` device numbers starting at `first_minor`.
    fn alloc_chrdev_region(&self, first_minor: u32, count: u32, name: &str) -> core::result::Result<DevT, Errno>;
    /// Releases an identity range.
    fn unregister_chrdev_region(&self, first: DevT, count: u32);
    /// Registers the open/release/mmap entry points for `devt`.
    fn cdev_add(&self, devt: DevT, count: u32) -> core::result::Result<(), Errno>;
    /// Removes the entry points.
    fn cdev_del(&self, devt: DevT);
    /// Creates a class.
    fn class_create(&self, name: &str) -> core::result::Result<ClassId, Errno>;
    /// Destroys a class.
    fn class_destroy(&self, class: ClassId);
    /// Creates the device node `name` under `class`.
    fn device_create(&self, class: ClassId, devt: DevT, name: &str) -> core::result::Result<(), Errno>;
    /// Destroys the node.
    fn device_destroy(&self, class: ClassId, devt: DevT);
}

impl<T: DeviceRegistrar + ?Sized> DeviceRegistrar for &T {
    fn alloc_chrdev_region(&self, first_minor: u32, count: u32, name: &str) -> core::result::Result<DevT, Errno> {
        (**self).alloc_chrdev_region(first_minor, count, name)
    }
    fn unregister_chrdev_region(&self, first: DevT, count: u32) {
        (**self).unregister_chrdev_region(first, count)
    }
    fn cdev_add(&self, devt: DevT, count: u32) -> core::result::Result<(), Errno> {
        (**self).cdev_add(devt, count)
    }
    fn cdev_del(&self, devt: DevT) {
        (**self).cdev_del(devt)
    }
    fn class_create(&self, name: &str) -> core::result::Result<ClassId, Errno> {
        (**self).class_create(name)
    }
    fn class_destroy(&self, class: ClassId) {
        (**self).class_destroy(class)
    }
    fn device_create(&self, class: ClassId, devt: DevT, name: &str) -> core::result::Result<(), Errno> {
        (**self).device_create(class, devt, name)
    }
    fn device_destroy(&self, class: ClassId, devt: DevT) {
        (**self).device_destroy(class, devt)
    }
}

impl<T: DeviceRegistrar + ?Sized> DeviceRegistrar for Arc<T> {
    fn alloc_chrdev_region(&self, first_minor: u32, count: u32, name: &str) -> core::result::Result<DevT, Errno> {
        (**self).alloc_chrdev_region(first_minor, count, name)
    }
    fn unregister_chrdev_region(&self, first: DevT, count: u32) {
        (**self).unregister_chrdev_region(first, count)
    }
    fn cdev_add(&self, devt: DevT, count: u32) -> core::result::Result<(), Errno> {
        (**self).cdev_add(devt, count)
    }
    fn cdev_del(&self, devt: DevT) {
        (**self).cdev_del(devt)
    }
    fn class_create(&self, name: &str) -> core::result::Result<ClassId, Errno> {
        (**self).class_create(name)
    }
    fn class_destroy(&self, class: ClassId) {
        (**self).class_destroy(class)
    }
    fn device_create(&self, class: ClassId, devt: DevT, name: &str) -> core::result::Result<(), Errno> {
        (**self).device_create(class, devt, name)
    }
    fn device_destroy(&self, class: ClassId, devt: DevT) {
        (**self).device_destroy(class, devt)
    }
}

/// Registrations held so far; dropping releases them newest first.
struct Registrations<R: DeviceRegistrar> {
    registrar: R,
    held: Vec<Registration>,
}

impl<R: DeviceRegistrar> Registrations<R> {
    fn new(registrar: R) -> Self {
        Self { registrar, held: Vec::with_capacity(4) }
    }

    /// Runs one registration step; on success the resource is owned by `self`.
    fn acquire<T>(
        &mut self,
        step: RegistrationStep,
        register: impl FnOnce(&R) -> core::result::Result<(T, Registration), Errno>,
    ) -> Result<T> {
        match register(&self.registrar) {
            Ok((value, registration)) => {
                debug!("gpiomem: {step} ok: {registration:?}");
                self.held.push(registration);
                Ok(value)
            }
            Err(errno) => {
                error!("gpiomem: {step} failed ({errno})");
                Err(Error::Registration { step, errno })
            }
        }
    }
}

impl<R: DeviceRegistrar> Drop for Registrations<R> {
    fn drop(&mut self) {
        while let Some(registration) = self.held.pop() {
            match registration {
                Registration::Node { class, devt } => self.registrar.device_destroy(class, devt),
                Registration::Class(class) => self.registrar.class_destroy(class),
                Registration::Cdev { devt, .. } => self.registrar.cdev_del(devt),
                Registration::ChrdevRegion { first, count } => {
                    self.registrar.unregister_chrdev_region(first, count)
                }
            }
            debug!("gpiomem: released {registration:?}");
        }
    }
}

/// An attached gpiomem device.
///
/// Field order is teardown order: the region table goes first, then the
/// registrations, newest first.
pub struct GpioMem<R: DeviceRegistrar> {
    state: DeviceState,
    devt: DevT,
    registrations: Registrations<R>,
}

impl<R: DeviceRegistrar> GpioMem<R> {
    /// Attaches to `platform`: builds the region table, then registers the device.
    ///
    /// Any failure releases everything acquired so far, in reverse order.
    pub fn attach<S: ResourceSource>(
        config: GpioMemConfig,
        platform: &PlatformDevice<S>,
        registrar: R,
    ) -> Result<Self> {
        let name = config.device_name.clone();
        Self::try_attach(config, platform, registrar).map_err(|err| {
            error!("{name}: could not load gpiomem: {err}");
            err
        })
    }

    fn try_attach<S: ResourceSource>(
        config: GpioMemConfig,
        platform: &PlatformDevice<S>,
        registrar: R,
    ) -> Result<Self> {
        config.validate()?;
        if !platform.matches_compatible(&config.compatible) {
            warn!(
                "{}: node compatible {:?} matches none of {:?}",
                config.device_name,
                platform.compatible(),
                config.compatible
            );
            return Err(Error::Incompatible { expected: config.compatible });
        }

        let table = RegionTable::populate(platform.resources(), config.max_regions)?;
        info!("{}: initialised: GPIO register area is {}", config.device_name, table.len());

        let mut registrations = Registrations::new(registrar);
        let minor = config.minor;
        let devt = registrations.acquire(RegistrationStep::ChrdevRegion, |r| {
            let first = r.alloc_chrdev_region(minor, 1, &config.device_name)?;
            Ok((first, Registration::ChrdevRegion { first, count: 1 }))
        })?;
        registrations.acquire(RegistrationStep::Cdev, |r| {
            r.cdev_add(devt, 1)?;
            Ok(((), Registration::Cdev { devt, count: 1 }))
        })?;
        let class = registrations.acquire(RegistrationStep::Class, |r| {
            let class = r.class_create(&config.device_name)?;
            Ok((class, Registration::Class(class)))
        })?;
        registrations.acquire(RegistrationStep::Node, |r| {
            r.device_create(class, devt, &config.node_name)?;
            Ok(((), Registration::Node { class, devt }))
        })?;

        for region in &table {
            info!("{}: initialised: registers at {region}", config.device_name);
        }

        let protection: Box<dyn ProtectionPolicy + Send + Sync> = Box::new(config.protection);
        Ok(Self { state: DeviceState { table, config, protection }, devt, registrations })
    }

    /// Replaces the protection hook (e.g. an architecture-specific one).
    pub fn with_protection_policy<P>(mut self, policy: P) -> Self
    where
        P: ProtectionPolicy + Send + Sync + 'static,
    {
        self.state.protection = Box::new(policy);
        self
    }

    /// Tears the device down: region table, node, class, character device, identity range.
    pub fn detach(self) {
        let name = self.state.config.device_name.clone();
        let Self { state, devt, registrations } = self;
        drop(state);
        drop(registrations);
        info!("{name}: GPIO mem driver removed ({}:{}) - OK", devt.major, devt.minor);
    }

    /// Opens a session on minor identity `minor`.
    pub fn open(&self, minor: u32) -> Result<Session<'_>> {
        self.state.open(minor)
    }

    /// Releases a handle on minor identity `minor`.
    pub fn release(&self, minor: u32) -> Result<()> {
        self.state.release(minor)
    }

    /// Authorized windows.
    pub fn regions(&self) -> &RegionTable {
        &self.state.table
    }

    /// Configuration in effect.
    pub fn config(&self) -> &GpioMemConfig {
        &self.state.config
    }

    /// Device number of the node.
    pub fn devt(&self) -> DevT {
        self.devt
    }

    /// Resources currently held with the registrar, oldest first.
    pub fn registrations(&self) -> &[Registration] {
        &self.registrations.held
    }
}

impl<R: DeviceRegistrar> fmt::Debug for GpioMem<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpioMem")
            .field("devt", &self.devt)
            .field("regions", &self.state.table)
            .field("registrations", &self.registrations.held)
            .finish()
    }
}
