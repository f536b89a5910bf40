use std::path::PathBuf;

use blobfs_blobstore::BlobError;
use blobfs_blockstore::StoreError;
use blobfs_types::TypeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("configuration file: {0}")]
    Toml(String),

    #[error("invalid root blob key {key:?}: {source}")]
    InvalidRootKey {
        key: String,
        #[source]
        source: TypeError,
    },

    #[error("block store uses {store}-byte blocks, configuration says {config}")]
    BlockSizeMismatch { config: usize, store: usize },

    #[error("device not initialized at {0}")]
    NotInitialized(PathBuf),

    #[error("device already initialized at {0}")]
    AlreadyInitialized(PathBuf),

    #[error("the root blob cannot be removed")]
    RootBlobRemoval,

    #[error("blob error: {0}")]
    Blob(#[from] BlobError),

    #[error("block store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DeviceResult<T> = Result<T, DeviceError>;
