//! Foundation types for blobfs.
//!
//! Every other blobfs crate depends on `blobfs-types`. The block store, the
//! blob engine and the device layer share one piece of vocabulary: the
//! identifier of a block.
//!
//! # Key Types
//!
//! - [`BlockId`] -- Fixed-width random identifier assigned to a block when it is created
//! - [`TypeError`] -- Parse failures for textual identifiers

pub mod block_id;
pub mod error;

pub use block_id::BlockId;
pub use error::TypeError;
