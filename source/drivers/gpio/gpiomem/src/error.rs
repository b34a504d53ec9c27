// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy shared by attach, open/release and mmap.
//!
//! Attach-time failures (`NoWindows`, `TooManyWindows`, `Resource`, `Registration`,
//! `Config`, `Incompatible`) abort the whole attach. Per-request failures
//! (`NoSuchDevice`, `AccessDenied`, `TransientMap`) only reach the caller that issued
//! the request.

use core::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::lifecycle::RegistrationStep;
use crate::mm::MapError;

/// Result alias for gpiomem operations.
pub type Result<T> = core::result::Result<T, Error>;

/// POSIX error number as reported through the device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub i32);

impl Errno {
    /// No such file or directory.
    pub const ENOENT: Self = Self(2);
    /// No such device or address.
    pub const ENXIO: Self = Self(6);
    /// Try again.
    pub const EAGAIN: Self = Self(11);
    /// Out of memory.
    pub const ENOMEM: Self = Self(12);
    /// Permission denied.
    pub const EACCES: Self = Self(13);
    /// Device or resource busy.
    pub const EBUSY: Self = Self(16);
    /// Invalid argument.
    pub const EINVAL: Self = Self(22);

    /// Kernel-style negative return value.
    pub fn to_negative(self) -> i32 {
        -self.0
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "errno {}", self.0)
    }
}

/// Errors produced by the gpiomem device.
#[derive(Debug, Error)]
pub enum Error {
    /// The platform declared zero (or a negative number of) register windows.
    #[error("no usable register window declared (declared {declared})")]
    NoWindows {
        /// Raw count reported by the platform description.
        declared: i64,
    },
    /// The platform declared more windows than the table can hold.
    #[error("too many windows declared ({declared}, capacity {capacity})")]
    TooManyWindows {
        /// Raw count reported by the platform description.
        declared: i64,
        /// Table capacity in effect.
        capacity: usize,
    },
    /// A declared window could not be resolved to a memory resource.
    #[error("failed to get IO resource area {index}")]
    Resource {
        /// Index of the unresolvable window.
        index: usize,
    },
    /// An OS registration step failed; all earlier steps were undone.
    #[error("{step} failed: {errno}")]
    Registration {
        /// Step that failed.
        step: RegistrationStep,
        /// Error reported by the registrar.
        errno: Errno,
    },
    /// Open/release against a minor identity the device does not serve.
    #[error("unknown minor device {minor}")]
    NoSuchDevice {
        /// Minor identity that was requested.
        minor: u32,
    },
    /// The mapping request matched no authorized window.
    #[error("mapping [{start:#x}, {end:#x}) matches no authorized window")]
    AccessDenied {
        /// Requested physical start (saturated on overflow).
        start: u64,
        /// Requested physical end (saturated on overflow).
        end: u64,
    },
    /// The memory manager refused the validated mapping; the caller may retry.
    #[error("remap failed: {0}")]
    TransientMap(#[source] MapError),
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The platform node does not carry a compatible string this driver binds to.
    #[error("platform device is not compatible with {expected:?}")]
    Incompatible {
        /// Compatible strings the driver accepts.
        expected: Vec<String>,
    },
}

impl Error {
    /// Returns the errno reported to callers of the device node.
    pub fn errno(&self) -> Errno {
        match self {
            Self::NoWindows { .. }
            | Self::TooManyWindows { .. }
            | Self::Config(_)
            | Self::Incompatible { .. } => Errno::EINVAL,
            Self::Resource { .. } => Errno::ENOENT,
            Self::Registration { errno, .. } => *errno,
            Self::NoSuchDevice { .. } => Errno::ENXIO,
            Self::AccessDenied { .. } => Errno::EACCES,
            Self::TransientMap(_) => Errno::EAGAIN,
        }
    }

    /// True for failures caused by the platform description or configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NoWindows { .. }
                | Self::TooManyWindows { .. }
                | Self::Config(_)
                | Self::Incompatible { .. }
        )
    }

    /// True when repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientMap(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_follows_node_contract() {
        assert_eq!(Error::NoWindows { declared: 0 }.errno(), Errno::EINVAL);
        assert_eq!(Error::Resource { index: 3 }.errno(), Errno::ENOENT);
        assert_eq!(Error::NoSuchDevice { minor: 1 }.errno(), Errno::ENXIO);
        assert_eq!(Error::AccessDenied { start: 0, end: 0x1000 }.errno(), Errno::EACCES);
        assert_eq!(Error::TransientMap(MapError::Overlap).errno(), Errno::EAGAIN);
        let reg = Error::Registration { step: RegistrationStep::Class, errno: Errno::ENOMEM };
        assert_eq!(reg.errno(), Errno::ENOMEM);
        assert_eq!(reg.errno().to_negative(), -12);
    }

    #[test]
    fn only_remap_failures_are_retryable() {
        assert!(Error::TransientMap(MapError::Overlap).is_retryable());
        assert!(!Error::AccessDenied { start: 0, end: 1 }.is_retryable());
        assert!(!Error::NoSuchDevice { minor: 2 }.is_retryable());
    }

    #[test]
    fn messages_name_the_window() {
        let msg = Error::Resource { index: 4 }.to_string();
        assert_eq!(msg, "failed to get IO resource area 4");
        let msg = Error::AccessDenied { start: 0x1000, end: 0x1800 }.to_string();
        assert!(msg.contains("0x1000") && msg.contains("0x1800"));
    }
}
