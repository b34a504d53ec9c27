// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Device configuration (TOML).
//!
//! Every key is optional; omitted keys take the reference driver's values.
//!
//! ```toml
//! device_name = "sunxi-gpiomem"
//! node_name = "gpiomem"
//! minor = 0
//! max_regions = 32
//! containment = "region-within-request"   # or "request-within-region"
//! protection = "pass-through"             # or "uncached"
//! byte_access = true
//! compatible = ["allwinner, gpiomem"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::mapping::ContainmentPolicy;
use crate::mm::StandardProtection;
use crate::{DEVICE_MINOR, DEVICE_NAME, MAX_REGIONS, NODE_NAME, OF_COMPATIBLE};

/// Errors raised while loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The document is not valid TOML or has unknown keys.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid `{field}`: {reason}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Configuration of one gpiomem device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GpioMemConfig {
    /// Name of the identity range and the class.
    pub device_name: String,
    /// Name of the device node.
    pub node_name: String,
    /// The only minor identity served.
    pub minor: u32,
    /// Register window capacity (`1..=32`).
    pub max_regions: usize,
    /// How requests are compared against windows.
    pub containment: ContainmentPolicy,
    /// Protection hook applied to accepted mappings.
    pub protection: StandardProtection,
    /// Register byte-granular physical access on mappings.
    pub byte_access: bool,
    /// Firmware compatible strings the driver binds to.
    pub compatible: Vec<String>,
}

impl Default for GpioMemConfig {
    fn default() -> Self {
        Self {
            device_name: DEVICE_NAME.to_string(),
            node_name: NODE_NAME.to_string(),
            minor: DEVICE_MINOR,
            max_regions: MAX_REGIONS,
            containment: ContainmentPolicy::default(),
            protection: StandardProtection::default(),
            byte_access: true,
            compatible: vec![OF_COMPATIBLE.to_string()],
        }
    }
}

impl GpioMemConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(data: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&data)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_regions == 0 || self.max_regions > MAX_REGIONS {
            return Err(ConfigError::Invalid {
                field: "max_regions",
                reason: format!("{} not in 1..={MAX_REGIONS}", self.max_regions),
            });
        }
        if self.device_name.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "device_name", reason: "empty".into() });
        }
        if self.node_name.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "node_name", reason: "empty".into() });
        }
        if self.compatible.is_empty() {
            return Err(ConfigError::Invalid {
                field: "compatible",
                reason: "at least one compatible string required".into(),
            });
        }
        Ok(())
    }
}
