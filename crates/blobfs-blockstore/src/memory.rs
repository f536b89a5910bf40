use std::collections::HashMap;
use std::sync::RwLock;

use blobfs_types::BlockId;

use crate::block::Block;
use crate::error::{StoreError, StoreResult};
use crate::traits::BlockStore;

/// In-memory, HashMap-based block store.
///
/// Intended for tests and embedding. All blocks are held in memory behind a
/// `RwLock` for safe concurrent access. Blocks are cloned on load/store.
pub struct InMemoryBlockStore {
    block_size: usize,
    blocks: RwLock<HashMap<BlockId, Vec<u8>>>,
}

impl InMemoryBlockStore {
    /// Create a new empty in-memory store with the given block size.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            blocks: RwLock::new(HashMap::new()),
        }
    }

    /// Number of blocks currently stored.
    pub fn len(&self) -> usize {
        self.blocks.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.read().expect("lock poisoned").is_empty()
    }

    /// Remove all blocks from the store.
    pub fn clear(&self) {
        self.blocks.write().expect("lock poisoned").clear();
    }

    /// Overwrite a block's raw bytes without any size check.
    ///
    /// Only useful for simulating on-media corruption in tests of the
    /// layers above.
    pub fn overwrite_raw(&self, id: &BlockId, data: Vec<u8>) -> StoreResult<()> {
        let mut map = self.blocks.write().expect("lock poisoned");
        match map.get_mut(id) {
            Some(slot) => {
                *slot = data;
                Ok(())
            }
            None => Err(StoreError::NotFound(*id)),
        }
    }
}

impl BlockStore for InMemoryBlockStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn create(&self, data: &[u8]) -> StoreResult<BlockId> {
        self.check_block_size(data.len())?;
        let mut map = self.blocks.write().expect("lock poisoned");
        let mut id = BlockId::random();
        while map.contains_key(&id) {
            id = BlockId::random();
        }
        map.insert(id, data.to_vec());
        Ok(id)
    }

    fn load(&self, id: &BlockId) -> StoreResult<Block> {
        let map = self.blocks.read().expect("lock poisoned");
        map.get(id)
            .map(|data| Block::new(*id, data.clone()))
            .ok_or(StoreError::NotFound(*id))
    }

    fn store(&self, block: &Block) -> StoreResult<()> {
        self.check_block_size(block.len())?;
        let mut map = self.blocks.write().expect("lock poisoned");
        match map.get_mut(&block.id) {
            Some(slot) => {
                slot.copy_from_slice(&block.data);
                Ok(())
            }
            None => Err(StoreError::NotFound(block.id)),
        }
    }

    fn remove(&self, id: &BlockId) -> StoreResult<bool> {
        let mut map = self.blocks.write().expect("lock poisoned");
        Ok(map.remove(id).is_some())
    }

    fn exists(&self, id: &BlockId) -> StoreResult<bool> {
        let map = self.blocks.read().expect("lock poisoned");
        Ok(map.contains_key(id))
    }

    fn num_blocks(&self) -> StoreResult<u64> {
        Ok(self.len() as u64)
    }

    fn block_ids(&self) -> StoreResult<Vec<BlockId>> {
        let map = self.blocks.read().expect("lock poisoned");
        let mut ids: Vec<BlockId> = map.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

impl std::fmt::Debug for InMemoryBlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlockStore")
            .field("block_size", &self.block_size)
            .field("block_count", &self.len())
            .finish()
    }
}
