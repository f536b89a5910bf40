use std::sync::Arc;

use blobfs_blockstore::{Block, BlockStore};
use blobfs_types::BlockId;

use crate::error::{BlobError, BlobResult};
use crate::layout::{NodeLayout, MAX_DEPTH};
use crate::node::{DataNode, InnerNode, LeafNode};

/// Typed access to data tree nodes stored in a block store.
///
/// Every `create_*`, `load` and `store` call is exactly one block store
/// access. Caching is left to [`DataTree`](crate::DataTree).
#[derive(Clone)]
pub struct NodeStore {
    blocks: Arc<dyn BlockStore>,
    layout: NodeLayout,
}

impl NodeStore {
    /// Wrap a block store, deriving the node layout from its block size.
    pub fn new(blocks: Arc<dyn BlockStore>) -> BlobResult<Self> {
        let layout = NodeLayout::new(blocks.block_size())?;
        Ok(Self { blocks, layout })
    }

    /// The node layout for this store's block size.
    pub fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    /// The underlying block store.
    pub fn block_store(&self) -> &Arc<dyn BlockStore> {
        &self.blocks
    }

    /// Payload capacity of one leaf.
    pub fn max_bytes_per_leaf(&self) -> u64 {
        self.layout.max_bytes_per_leaf()
    }

    /// Maximum number of children per inner node.
    pub fn max_children_per_inner(&self) -> usize {
        self.layout.max_children_per_inner()
    }

    /// Allocate an empty leaf.
    pub fn create_leaf(&self) -> BlobResult<(BlockId, DataNode)> {
        let node = DataNode::Leaf(LeafNode::empty(&self.layout));
        let id = self.create_node(&node)?;
        Ok((id, node))
    }

    /// Allocate an inner node of `depth` with the given children.
    pub fn create_inner(&self, depth: u8, children: Vec<BlockId>) -> BlobResult<(BlockId, DataNode)> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(BlobError::PreconditionViolation(format!(
                "inner node depth must be in 1..={MAX_DEPTH}, got {depth}"
            )));
        }
        if children.is_empty() || children.len() > self.max_children_per_inner() {
            return Err(BlobError::PreconditionViolation(format!(
                "inner node needs 1..={} children, got {}",
                self.max_children_per_inner(),
                children.len()
            )));
        }
        let node = DataNode::Inner(InnerNode::new(depth, children));
        let id = self.create_node(&node)?;
        Ok((id, node))
    }

    /// Allocate a new block holding a copy of `node`.
    pub fn create_node(&self, node: &DataNode) -> BlobResult<BlockId> {
        Ok(self.blocks.create(&node.encode(&self.layout))?)
    }

    /// Load and decode a node.
    ///
    /// Fails with [`BlobError::NotFound`] if the block is absent and with
    /// [`BlobError::CorruptData`] if its header does not fit the layout.
    pub fn load(&self, id: &BlockId) -> BlobResult<DataNode> {
        let block = self.blocks.load(id)?;
        DataNode::decode(id, &block.data, &self.layout)
    }

    /// Write a node back over its existing block.
    pub fn store(&self, id: &BlockId, node: &DataNode) -> BlobResult<()> {
        Ok(self.blocks.store(&Block::new(*id, node.encode(&self.layout)))?)
    }

    /// Free a node's block. Returns `true` if it existed.
    pub fn remove(&self, id: &BlockId) -> BlobResult<bool> {
        Ok(self.blocks.remove(id)?)
    }

    /// Number of blocks in the underlying store.
    pub fn num_blocks(&self) -> BlobResult<u64> {
        Ok(self.blocks.num_blocks()?)
    }
}

impl std::fmt::Debug for NodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStore")
            .field("layout", &self.layout)
            .finish()
    }
}
