//! Device layer for blobfs.
//!
//! A device ties a block store to a configuration file. The configuration
//! fixes the block size and records the key of the root blob, which the
//! device creates on first open. Everything above this layer addresses
//! blobs by key through the [`Device`].

pub mod config;
pub mod device;
pub mod error;

pub use config::{DeviceConfig, CONFIG_FILE};
pub use device::{Device, DeviceStats, BLOCKS_DIR};
pub use error::{DeviceError, DeviceResult};
