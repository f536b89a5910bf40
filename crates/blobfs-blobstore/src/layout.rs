use blobfs_types::BlockId;

use crate::error::{BlobError, BlobResult};

/// Block size used when nothing else is configured (32 KiB).
pub const DEFAULT_BLOCK_SIZE: usize = 32 * 1024;

/// Tag byte of a leaf node. Inner nodes store their depth in the tag byte.
pub const LEAF_TAG: u8 = 0;

/// Deepest inner node that can be stored. Any tag above this is unrecognized.
///
/// With at least two children per inner node, 64 levels already address
/// more leaves than fit in a `u64`.
pub const MAX_DEPTH: u8 = 64;

/// Tag byte + 8-byte logical size.
pub const LEAF_HEADER_SIZE: usize = 1 + 8;

/// Tag byte + 4-byte child count.
pub const INNER_HEADER_SIZE: usize = 1 + 4;

/// Binary layout of nodes for one fixed block size.
///
/// ```text
/// leaf:  [tag = 0 : u8][num_bytes : u64 LE][payload : B - 9 bytes]
/// inner: [tag = depth : u8][num_children : u32 LE][child ids : 16 bytes each][zero padding]
/// ```
///
/// The layout is passed to every component explicitly and must not change
/// for the lifetime of a block store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeLayout {
    block_size: usize,
}

impl NodeLayout {
    /// Build the layout for `block_size`, rejecting sizes too small to hold
    /// at least two children per inner node.
    pub fn new(block_size: usize) -> BlobResult<Self> {
        let children = block_size.saturating_sub(INNER_HEADER_SIZE) / BlockId::LEN;
        if children < 2 {
            return Err(BlobError::InvalidBlockSize {
                block_size,
                reason: format!(
                    "inner nodes need room for at least 2 children, minimum block size is {}",
                    INNER_HEADER_SIZE + 2 * BlockId::LEN
                ),
            });
        }
        if u32::try_from(children).is_err() {
            return Err(BlobError::InvalidBlockSize {
                block_size,
                reason: "child count does not fit the 4-byte header field".into(),
            });
        }
        Ok(Self { block_size })
    }

    /// Size of every block in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Payload capacity `L` of a single leaf.
    pub fn max_bytes_per_leaf(&self) -> u64 {
        (self.block_size - LEAF_HEADER_SIZE) as u64
    }

    /// Maximum number of children of an inner node (the branching factor).
    pub fn max_children_per_inner(&self) -> usize {
        (self.block_size - INNER_HEADER_SIZE) / BlockId::LEN
    }

    /// Number of leaves a full subtree of the given depth holds.
    pub fn leaves_per_subtree(&self, depth: u8) -> u64 {
        (self.max_children_per_inner() as u64).saturating_pow(u32::from(depth))
    }

    /// Number of payload bytes a full subtree of the given depth holds.
    pub fn bytes_per_subtree(&self, depth: u8) -> u64 {
        self.max_bytes_per_leaf()
            .saturating_mul(self.leaves_per_subtree(depth))
    }

    /// Number of leaves a right-dense tree needs to hold `num_bytes`.
    ///
    /// An empty tree still consists of one (empty) leaf.
    pub fn leaves_for_bytes(&self, num_bytes: u64) -> u64 {
        num_bytes.div_ceil(self.max_bytes_per_leaf()).max(1)
    }

    /// Logical size of the last leaf of a right-dense tree holding `num_bytes`.
    pub fn last_leaf_bytes(&self, num_bytes: u64) -> u64 {
        num_bytes - (self.leaves_for_bytes(num_bytes) - 1) * self.max_bytes_per_leaf()
    }
}

impl Default for NodeLayout {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}
