use std::fs;
use std::path::Path;
use std::sync::Arc;

use blobfs_blobstore::{Blob, BlobStore};
use blobfs_blockstore::{BlockStore, OnDiskBlockStore};
use blobfs_types::BlockId;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{DeviceConfig, CONFIG_FILE};
use crate::error::{DeviceError, DeviceResult};

/// Name of the block directory inside a device directory.
pub const BLOCKS_DIR: &str = "blocks";

/// Space usage of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceStats {
    pub block_size: usize,
    pub num_blocks: u64,
    pub total_bytes: u64,
}

/// A blob store with a designated root blob.
pub struct Device {
    blobs: BlobStore,
    root_key: BlockId,
}

impl Device {
    /// Open a device on `blocks`.
    ///
    /// If the configuration has no root blob yet, an empty one is created
    /// and its key is recorded in `config`; the caller persists the config.
    /// Otherwise the recorded root blob must load.
    pub fn open(config: &mut DeviceConfig, blocks: Arc<dyn BlockStore>) -> DeviceResult<Self> {
        config.validate()?;
        let expected = config.block_size as usize;
        if blocks.block_size() != expected {
            return Err(DeviceError::BlockSizeMismatch {
                config: expected,
                store: blocks.block_size(),
            });
        }

        let blobs = BlobStore::new(blocks)?;
        let root_key = match &config.root_blob {
            None => {
                let mut root = blobs.create()?;
                root.flush()?;
                let key = root.key();
                config.root_blob = Some(key.to_hex());
                info!(root = %key, block_size = expected, "created root blob");
                key
            }
            Some(hex) => {
                let key = BlockId::from_hex(hex).map_err(|source| DeviceError::InvalidRootKey {
                    key: hex.clone(),
                    source,
                })?;
                blobs.load(&key)?;
                debug!(root = %key.short_hex(), "opened device");
                key
            }
        };

        Ok(Self { blobs, root_key })
    }

    /// Initialize a device directory: `blobfs.toml` plus an on-disk block store under `blocks/`.
    pub fn init_dir(path: &Path, block_size: u32) -> DeviceResult<Self> {
        let config_path = path.join(CONFIG_FILE);
        if config_path.exists() {
            return Err(DeviceError::AlreadyInitialized(path.to_path_buf()));
        }

        let mut config = DeviceConfig::with_block_size(block_size);
        config.validate()?;
        let blocks_dir = path.join(BLOCKS_DIR);
        fs::create_dir_all(&blocks_dir)?;
        let blocks = OnDiskBlockStore::open(&blocks_dir, block_size as usize)?;

        let device = Self::open(&mut config, Arc::new(blocks))?;
        config.save(&config_path)?;
        info!(path = %path.display(), block_size, "initialized device");
        Ok(device)
    }

    /// Open a device directory created by [`init_dir`](Self::init_dir).
    pub fn open_dir(path: &Path) -> DeviceResult<Self> {
        let config_path = path.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(DeviceError::NotInitialized(path.to_path_buf()));
        }

        let mut config = DeviceConfig::load(&config_path)?;
        let had_root = config.root_blob.is_some();
        let blocks = OnDiskBlockStore::open(&path.join(BLOCKS_DIR), config.block_size as usize)?;
        let device = Self::open(&mut config, Arc::new(blocks))?;
        if !had_root {
            config.save(&config_path)?;
        }
        Ok(device)
    }

    pub fn root_key(&self) -> BlockId {
        self.root_key
    }

    pub fn load_root(&self) -> DeviceResult<Blob> {
        self.load_blob(&self.root_key)
    }

    pub fn create_blob(&self) -> DeviceResult<Blob> {
        Ok(self.blobs.create()?)
    }

    pub fn load_blob(&self, key: &BlockId) -> DeviceResult<Blob> {
        Ok(self.blobs.load(key)?)
    }

    /// Remove a blob and free its blocks. The root blob is refused.
    pub fn remove_blob(&self, blob: Blob) -> DeviceResult<u64> {
        if blob.key() == self.root_key {
            return Err(DeviceError::RootBlobRemoval);
        }
        Ok(self.blobs.remove(blob)?)
    }

    pub fn blob_store(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn statfs(&self) -> DeviceResult<DeviceStats> {
        let block_size = self.blobs.layout().block_size();
        let num_blocks = self.blobs.num_blocks()?;
        Ok(DeviceStats {
            block_size,
            num_blocks,
            total_bytes: num_blocks.saturating_mul(block_size as u64),
        })
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("root_key", &self.root_key)
            .field("layout", self.blobs.layout())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use blobfs_blobstore::BlobError;
    use blobfs_blockstore::InMemoryBlockStore;

    use super::*;

    fn memory_blocks(block_size: usize) -> Arc<dyn BlockStore> {
        Arc::new(InMemoryBlockStore::new(block_size))
    }

    // -----------------------------------------------------------------------
    // Root blob bootstrapping
    // -----------------------------------------------------------------------

    #[test]
    fn first_open_creates_root_blob() {
        let blocks = memory_blocks(64);
        let mut config = DeviceConfig::with_block_size(64);
        let device = Device::open(&mut config, blocks.clone()).unwrap();

        assert_eq!(config.root_blob, Some(device.root_key().to_hex()));
        assert_eq!(blocks.num_blocks().unwrap(), 1);
        assert_eq!(device.load_root().unwrap().size().unwrap(), 0);
    }

    #[test]
    fn reopen_keeps_root_blob() {
        let blocks = memory_blocks(64);
        let mut config = DeviceConfig::with_block_size(64);
        let root = Device::open(&mut config, blocks.clone()).unwrap().root_key();

        let saved = config.clone();
        let device = Device::open(&mut config, blocks.clone()).unwrap();
        assert_eq!(device.root_key(), root);
        assert_eq!(config, saved);
        assert_eq!(blocks.num_blocks().unwrap(), 1);
    }

    #[test]
    fn rejects_block_size_mismatch() {
        let mut config = DeviceConfig::with_block_size(128);
        let err = Device::open(&mut config, memory_blocks(64)).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::BlockSizeMismatch {
                config: 128,
                store: 64
            }
        ));
    }

    #[test]
    fn rejects_malformed_root_key() {
        let mut config = DeviceConfig {
            block_size: 64,
            root_blob: Some("not-a-key".into()),
        };
        let err = Device::open(&mut config, memory_blocks(64)).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidRootKey { .. }));
    }

    #[test]
    fn missing_root_blob_is_not_found() {
        let mut config = DeviceConfig {
            block_size: 64,
            root_blob: Some(BlockId::random().to_hex()),
        };
        let err = Device::open(&mut config, memory_blocks(64)).unwrap_err();
        assert!(matches!(err, DeviceError::Blob(BlobError::NotFound(_))));
    }

    // -----------------------------------------------------------------------
    // Blob access
    // -----------------------------------------------------------------------

    #[test]
    fn create_load_remove_blob() {
        let mut config = DeviceConfig::with_block_size(64);
        let device = Device::open(&mut config, memory_blocks(64)).unwrap();

        let key = {
            let mut blob = device.create_blob().unwrap();
            blob.resize(200).unwrap();
            blob.write(10, b"hello").unwrap();
            blob.key()
        };
        let mut blob = device.load_blob(&key).unwrap();
        assert_eq!(blob.read_vec(10, 5).unwrap(), b"hello");

        device.remove_blob(blob).unwrap();
        assert_eq!(device.statfs().unwrap().num_blocks, 1);
    }

    #[test]
    fn root_blob_cannot_be_removed() {
        let mut config = DeviceConfig::with_block_size(64);
        let device = Device::open(&mut config, memory_blocks(64)).unwrap();
        let root = device.load_root().unwrap();
        assert!(matches!(
            device.remove_blob(root),
            Err(DeviceError::RootBlobRemoval)
        ));
    }

    #[test]
    fn statfs_counts_blocks() {
        let mut config = DeviceConfig::with_block_size(64);
        let device = Device::open(&mut config, memory_blocks(64)).unwrap();
        let mut blob = device.create_blob().unwrap();
        blob.resize(56).unwrap();
        blob.flush().unwrap();

        let stats = device.statfs().unwrap();
        assert_eq!(stats.block_size, 64);
        assert_eq!(stats.num_blocks, 4);
        assert_eq!(stats.total_bytes, 256);
    }

    // -----------------------------------------------------------------------
    // Device directories
    // -----------------------------------------------------------------------

    #[test]
    fn init_then_open_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = Device::init_dir(dir.path(), 4096).unwrap().root_key();
        assert!(dir.path().join(CONFIG_FILE).exists());
        assert!(dir.path().join(BLOCKS_DIR).is_dir());

        let device = Device::open_dir(dir.path()).unwrap();
        assert_eq!(device.root_key(), root);
        assert_eq!(device.statfs().unwrap().block_size, 4096);
    }

    #[test]
    fn init_refuses_existing_device() {
        let dir = tempfile::tempdir().unwrap();
        Device::init_dir(dir.path(), 4096).unwrap();
        assert!(matches!(
            Device::init_dir(dir.path(), 4096),
            Err(DeviceError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn open_uninitialized_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Device::open_dir(dir.path()),
            Err(DeviceError::NotInitialized(_))
        ));
    }

    #[test]
    fn open_dir_persists_new_root() {
        let dir = tempfile::tempdir().unwrap();
        DeviceConfig::with_block_size(1024)
            .save(&dir.path().join(CONFIG_FILE))
            .unwrap();

        let root = Device::open_dir(dir.path()).unwrap().root_key();
        let config = DeviceConfig::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.root_blob, Some(root.to_hex()));
    }
}
