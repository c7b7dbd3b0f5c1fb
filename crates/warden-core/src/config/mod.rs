//! Configuration types for Warden audit devices.
//!
//! A `warden.yaml` file maps mount paths to device options:
//!
//! ```yaml
//! devices:
//!   file/:
//!     file_path: /var/log/warden/audit.log
//!     mode: "0600"
//!     filter: mount_type == kv
//!   catchall/:
//!     file_path: stdout
//!     fallback: true
//! ```

pub mod audit;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

pub use audit::{
    parse_bool, parse_file_mode, DeviceOptions, OutputFormat, SinkTarget, DEFAULT_FILE_MODE,
    DISCARD, STDOUT,
};

/// Complete Warden configuration loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Audit devices keyed by mount path.
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceOptions>,
}

impl WardenConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }
}
