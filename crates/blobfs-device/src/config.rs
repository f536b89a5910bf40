use std::fs;
use std::path::Path;

use blobfs_blobstore::{NodeLayout, DEFAULT_BLOCK_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, DeviceResult};

/// Name of the configuration file inside a device directory.
pub const CONFIG_FILE: &str = "blobfs.toml";

/// Persistent device settings.
///
/// ```toml
/// block_size = 32768
/// root_blob = "3f2a...c9"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Size of every block in bytes. Fixed once the device holds data.
    pub block_size: u32,
    /// Hex key of the root blob; unset until the device is first opened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_blob: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE as u32,
            root_blob: None,
        }
    }
}

impl DeviceConfig {
    pub fn with_block_size(block_size: u32) -> Self {
        Self {
            block_size,
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> DeviceResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DeviceError::Toml(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> DeviceResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DeviceError::Toml(format!("{}: {e}", path.display())))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check that the block size can hold the node layout.
    pub fn validate(&self) -> DeviceResult<()> {
        NodeLayout::new(self.block_size as usize)
            .map_err(|e| DeviceError::Config(e.to_string()))?;
        Ok(())
    }
}
