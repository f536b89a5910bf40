use blobfs_types::BlockId;

use crate::error::{BlobError, BlobResult};
use crate::layout::{NodeLayout, INNER_HEADER_SIZE, LEAF_HEADER_SIZE, LEAF_TAG, MAX_DEPTH};

/// Decoded contents of one block of a data tree.
///
/// The variant is decided once, from the tag byte, when the block is
/// decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataNode {
    /// Depth 0: payload bytes.
    Leaf(LeafNode),
    /// Depth >= 1: ordered child ids.
    Inner(InnerNode),
}

impl DataNode {
    /// Depth of the node: 0 for leaves, one more than the children for inner nodes.
    pub fn depth(&self) -> u8 {
        match self {
            Self::Leaf(_) => 0,
            Self::Inner(inner) => inner.depth,
        }
    }

    /// Serialize into exactly `layout.block_size()` bytes.
    pub fn encode(&self, layout: &NodeLayout) -> Vec<u8> {
        let mut out = vec![0u8; layout.block_size()];
        match self {
            Self::Leaf(leaf) => {
                out[0] = LEAF_TAG;
                out[1..LEAF_HEADER_SIZE].copy_from_slice(&leaf.num_bytes.to_le_bytes());
                out[LEAF_HEADER_SIZE..LEAF_HEADER_SIZE + leaf.data.len()].copy_from_slice(&leaf.data);
            }
            Self::Inner(inner) => {
                out[0] = inner.depth;
                // Fits: the layout guarantees max children fits in a u32.
                let count = inner.children.len() as u32;
                out[1..INNER_HEADER_SIZE].copy_from_slice(&count.to_le_bytes());
                for (i, child) in inner.children.iter().enumerate() {
                    let at = INNER_HEADER_SIZE + i * BlockId::LEN;
                    out[at..at + BlockId::LEN].copy_from_slice(child.as_bytes());
                }
            }
        }
        out
    }

    /// Parse a block, validating every header field against the layout.
    pub fn decode(id: &BlockId, data: &[u8], layout: &NodeLayout) -> BlobResult<Self> {
        if data.len() != layout.block_size() {
            return Err(BlobError::corrupt(
                *id,
                format!(
                    "block holds {} bytes, layout expects {}",
                    data.len(),
                    layout.block_size()
                ),
            ));
        }

        match data[0] {
            LEAF_TAG => {
                let num_bytes = read_u64(&data[1..LEAF_HEADER_SIZE]);
                if num_bytes > layout.max_bytes_per_leaf() {
                    return Err(BlobError::corrupt(
                        *id,
                        format!(
                            "leaf claims {num_bytes} bytes, capacity is {}",
                            layout.max_bytes_per_leaf()
                        ),
                    ));
                }
                Ok(Self::Leaf(LeafNode {
                    num_bytes,
                    data: data[LEAF_HEADER_SIZE..].to_vec(),
                }))
            }
            depth if depth <= MAX_DEPTH => {
                let count = read_u32(&data[1..INNER_HEADER_SIZE]) as usize;
                if count == 0 || count > layout.max_children_per_inner() {
                    return Err(BlobError::corrupt(
                        *id,
                        format!(
                            "inner node claims {count} children, allowed 1..={}",
                            layout.max_children_per_inner()
                        ),
                    ));
                }
                let children = data[INNER_HEADER_SIZE..INNER_HEADER_SIZE + count * BlockId::LEN]
                    .chunks_exact(BlockId::LEN)
                    .map(|chunk| {
                        BlockId::from_slice(chunk).map_err(|e| BlobError::corrupt(*id, e.to_string()))
                    })
                    .collect::<BlobResult<Vec<_>>>()?;
                Ok(Self::Inner(InnerNode { depth, children }))
            }
            tag => Err(BlobError::corrupt(*id, format!("unrecognized node tag {tag}"))),
        }
    }
}

/// Payload node.
///
/// The buffer always spans the full leaf capacity; only the first
/// `num_bytes` of it are part of the blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafNode {
    num_bytes: u64,
    data: Vec<u8>,
}

impl LeafNode {
    /// An empty, zero-filled leaf for the given layout.
    pub fn empty(layout: &NodeLayout) -> Self {
        Self {
            num_bytes: 0,
            data: vec![0u8; layout.max_bytes_per_leaf() as usize],
        }
    }

    /// Number of payload bytes in use.
    pub fn num_bytes(&self) -> u64 {
        self.num_bytes
    }

    /// Payload capacity of this leaf.
    pub fn max_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    /// The bytes in use.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.num_bytes as usize]
    }

    /// The bytes in use, mutably.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.num_bytes as usize]
    }

    /// Change the number of bytes in use.
    ///
    /// Growing zero-fills the newly exposed range, whatever the buffer held
    /// there before. Shrinking leaves the tail of the buffer untouched.
    pub fn resize(&mut self, num_bytes: u64) {
        debug_assert!(num_bytes <= self.max_bytes());
        if num_bytes > self.num_bytes {
            self.data[self.num_bytes as usize..num_bytes as usize].fill(0);
        }
        self.num_bytes = num_bytes;
    }
}

/// Node listing the ids of its children, left to right.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InnerNode {
    depth: u8,
    children: Vec<BlockId>,
}

impl InnerNode {
    /// Create an inner node of the given depth.
    pub fn new(depth: u8, children: Vec<BlockId>) -> Self {
        Self { depth, children }
    }

    /// Depth of this node (always >= 1).
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Child ids, left to right.
    pub fn children(&self) -> &[BlockId] {
        &self.children
    }

    /// Child ids, mutably.
    pub fn children_mut(&mut self) -> &mut Vec<BlockId> {
        &mut self.children
    }

    /// Number of children.
    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    /// The rightmost child, if any.
    pub fn last_child(&self) -> Option<BlockId> {
        self.children.last().copied()
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}
