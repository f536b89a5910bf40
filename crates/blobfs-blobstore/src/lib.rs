//! Blob storage engine for blobfs.
//!
//! A blob is a variable-length byte sequence stored as a tree of fixed-size
//! blocks. Leaves hold payload bytes; inner nodes hold the ids of their
//! children. The tree is kept right-dense: every leaf except the last one is
//! full, so the byte range of any leaf follows from its index alone and the
//! blob's size can be computed by walking the rightmost path.
//!
//! # Layers
//!
//! - [`NodeLayout`] -- binary layout of leaf and inner nodes for a block size
//! - [`NodeStore`] -- typed node access on top of a [`BlockStore`](blobfs_blockstore::BlockStore)
//! - [`DataTree`] -- one tree: size, resize, leaf traversal, write-back cache
//! - [`Blob`] -- byte-addressed read/write/resize on a data tree
//! - [`BlobStore`] -- creates, loads and removes blobs
//!
//! All operations are synchronous. A blob has exactly one owner; nothing in
//! this crate takes locks. Changes reach the block store on [`Blob::flush`]
//! (or when the blob is dropped).

pub mod blob;
pub mod error;
pub mod layout;
pub mod node;
pub mod node_store;
pub mod store;
pub mod tree;

#[cfg(test)]
mod testutils;

pub use blob::Blob;
pub use error::{BlobError, BlobResult};
pub use layout::{NodeLayout, DEFAULT_BLOCK_SIZE};
pub use node::{DataNode, InnerNode, LeafNode};
pub use node_store::NodeStore;
pub use store::BlobStore;
pub use tree::{DataTree, LeafHandle, TreeShape};
