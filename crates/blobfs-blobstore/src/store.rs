use std::sync::Arc;

use blobfs_blockstore::BlockStore;
use blobfs_types::BlockId;
use tracing::debug;

use crate::blob::Blob;
use crate::error::BlobResult;
use crate::layout::NodeLayout;
use crate::node_store::NodeStore;
use crate::tree::DataTree;

/// Creates, loads and removes blobs on one block store.
///
/// Cloning is cheap; clones share the block store.
#[derive(Clone, Debug)]
pub struct BlobStore {
    nodes: NodeStore,
}

impl BlobStore {
    /// Open a blob store on `blocks`. Fails if the block size cannot hold a node layout.
    pub fn new(blocks: Arc<dyn BlockStore>) -> BlobResult<Self> {
        Ok(Self {
            nodes: NodeStore::new(blocks)?,
        })
    }

    /// Create a new, empty blob. Its key is available via [`Blob::key`].
    pub fn create(&self) -> BlobResult<Blob> {
        let tree = DataTree::create(self.nodes.clone())?;
        debug!(key = %tree.root_id().short_hex(), "created blob");
        Ok(Blob::new(tree))
    }

    /// Load the blob with the given key.
    pub fn load(&self, key: &BlockId) -> BlobResult<Blob> {
        Ok(Blob::new(DataTree::open(self.nodes.clone(), *key)?))
    }

    /// Free every block of `blob`. Returns the number of blocks freed.
    pub fn remove(&self, blob: Blob) -> BlobResult<u64> {
        let key = blob.key();
        let freed = blob.remove()?;
        debug!(key = %key.short_hex(), freed, "removed blob");
        Ok(freed)
    }

    /// Load and remove the blob with the given key.
    pub fn remove_by_key(&self, key: &BlockId) -> BlobResult<u64> {
        let blob = self.load(key)?;
        self.remove(blob)
    }

    pub fn layout(&self) -> &NodeLayout {
        self.nodes.layout()
    }

    /// Number of blocks in the underlying store, across all blobs.
    pub fn num_blocks(&self) -> BlobResult<u64> {
        self.nodes.num_blocks()
    }

    pub fn block_store(&self) -> &Arc<dyn BlockStore> {
        self.nodes.block_store()
    }
}
