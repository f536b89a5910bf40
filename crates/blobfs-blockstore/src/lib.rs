//! Fixed-size block storage for blobfs.
//!
//! A block store is a flat key-value store: every value is a block of
//! exactly [`BlockStore::block_size`] bytes, and every key is a random
//! [`BlockId`](blobfs_types::BlockId) assigned when the block is created.
//! The blob engine builds its node trees on top of this interface and never
//! looks at how a backend lays blocks out.
//!
//! # Storage Backends
//!
//! All backends implement the [`BlockStore`] trait:
//!
//! - [`InMemoryBlockStore`] -- `HashMap`-based store for tests and embedding
//! - [`OnDiskBlockStore`] -- one checksummed file per block under a directory
//!
//! # Design Rules
//!
//! 1. Every block has exactly the store's block size; writes of any other size are rejected.
//! 2. Writing a single block is atomic. Nothing spans multiple blocks.
//! 3. Ids are never reused while the block exists.
//! 4. The store never interprets block contents.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod block;
pub mod error;
pub mod memory;
pub mod ondisk;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use block::Block;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryBlockStore;
pub use ondisk::OnDiskBlockStore;
pub use traits::BlockStore;
