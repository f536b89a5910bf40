use std::sync::Arc;

use blobfs_types::BlockId;

use crate::block::Block;
use crate::error::{StoreError, StoreResult};

/// Key-addressed store of fixed-size blocks.
///
/// All implementations must satisfy these invariants:
/// - Every stored block is exactly `block_size()` bytes long.
/// - `create` hands out an id that is not currently in use.
/// - A single `create`, `store` or `remove` is atomic. No guarantee is made
///   across several blocks.
/// - The store never interprets block contents.
/// - All I/O errors are propagated, never silently ignored.
pub trait BlockStore: Send + Sync {
    /// Size in bytes of every block in this store. Fixed for the store's lifetime.
    fn block_size(&self) -> usize;

    /// Allocate a fresh block and write `data` into it in a single access.
    ///
    /// Returns `Err(WrongBlockSize)` if `data` is not exactly `block_size()` bytes.
    fn create(&self, data: &[u8]) -> StoreResult<BlockId>;

    /// Load a block by id.
    ///
    /// Returns `Err(NotFound)` if the block does not exist.
    fn load(&self, id: &BlockId) -> StoreResult<Block>;

    /// Overwrite an existing block.
    ///
    /// Returns `Err(NotFound)` if the block does not exist. Each block is
    /// assumed to have a single writer: a `store` racing a concurrent
    /// `remove` of the same block may leave the block present.
    fn store(&self, block: &Block) -> StoreResult<()>;

    /// Remove a block by id. Returns `true` if the block existed.
    fn remove(&self, id: &BlockId) -> StoreResult<bool>;

    /// Check whether a block exists in the store.
    fn exists(&self, id: &BlockId) -> StoreResult<bool>;

    /// Number of blocks currently stored.
    fn num_blocks(&self) -> StoreResult<u64>;

    /// Ids of all stored blocks, sorted.
    fn block_ids(&self) -> StoreResult<Vec<BlockId>>;

    /// Validate that `len` matches this store's block size.
    fn check_block_size(&self, len: usize) -> StoreResult<()> {
        let expected = self.block_size();
        if len == expected {
            Ok(())
        } else {
            Err(StoreError::WrongBlockSize {
                expected,
                actual: len,
            })
        }
    }
}

impl<S: BlockStore + ?Sized> BlockStore for Arc<S> {
    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    fn create(&self, data: &[u8]) -> StoreResult<BlockId> {
        (**self).create(data)
    }

    fn load(&self, id: &BlockId) -> StoreResult<Block> {
        (**self).load(id)
    }

    fn store(&self, block: &Block) -> StoreResult<()> {
        (**self).store(block)
    }

    fn remove(&self, id: &BlockId) -> StoreResult<bool> {
        (**self).remove(id)
    }

    fn exists(&self, id: &BlockId) -> StoreResult<bool> {
        (**self).exists(id)
    }

    fn num_blocks(&self) -> StoreResult<u64> {
        (**self).num_blocks()
    }

    fn block_ids(&self) -> StoreResult<Vec<BlockId>> {
        (**self).block_ids()
    }
}
