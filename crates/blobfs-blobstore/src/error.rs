use blobfs_blockstore::StoreError;
use blobfs_types::BlockId;
use thiserror::Error;

/// Errors from the blob engine.
#[derive(Debug, Error)]
pub enum BlobError {
    /// A referenced block is absent from the block store.
    #[error("block not found: {0}")]
    NotFound(BlockId),

    /// A node's tag, child count or size field is inconsistent with the layout.
    #[error("corrupt node {id}: {reason}")]
    CorruptData { id: BlockId, reason: String },

    /// A traversal or byte range exceeds the current size or leaf count.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// The caller broke an API contract, e.g. writing past the end without resizing first.
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    /// The block size cannot hold a usable node layout.
    #[error("invalid block size {block_size}: {reason}")]
    InvalidBlockSize { block_size: usize, reason: String },

    /// Any other failure of the underlying block store.
    #[error("block store error: {0}")]
    Store(StoreError),
}

impl BlobError {
    pub(crate) fn corrupt(id: BlockId, reason: impl Into<String>) -> Self {
        Self::CorruptData {
            id,
            reason: reason.into(),
        }
    }
}

impl From<StoreError> for BlobError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::Corrupt { id, reason } => Self::CorruptData { id, reason },
            other => Self::Store(other),
        }
    }
}

/// Result alias for blob engine operations.
pub type BlobResult<T> = Result<T, BlobError>;
