use blobfs_types::BlockId;

/// Errors from block store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested block was not found.
    #[error("block not found: {0}")]
    NotFound(BlockId),

    /// A block write did not match the store's fixed block size.
    #[error("wrong block size: expected {expected} bytes, got {actual}")]
    WrongBlockSize { expected: usize, actual: usize },

    /// The stored block failed its integrity check.
    #[error("corrupt block {id}: {reason}")]
    Corrupt { id: BlockId, reason: String },

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
