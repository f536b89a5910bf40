use blobfs_types::BlockId;

/// One fixed-size block together with its id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// The id the block is stored under.
    pub id: BlockId,
    /// The block's bytes. Always exactly the store's block size.
    pub data: Vec<u8>,
}

impl Block {
    /// Create a new block value.
    pub fn new(id: BlockId, data: Vec<u8>) -> Self {
        Self { id, data }
    }

    /// Size of the block in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the block holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
