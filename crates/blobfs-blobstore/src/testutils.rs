use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use blobfs_blockstore::{Block, BlockStore, InMemoryBlockStore, StoreError, StoreResult};
use blobfs_types::BlockId;

use crate::store::BlobStore;

/// Block size used by most engine tests: leaves hold 55 bytes, inner nodes 3 children.
pub(crate) const SMALL_BLOCK_SIZE: usize = 64;

/// An in-memory block store, both as the trait object handed to the engine
/// and as the concrete type for inspection and corruption.
pub(crate) fn memory_store(block_size: usize) -> (Arc<dyn BlockStore>, Arc<InMemoryBlockStore>) {
    let raw = Arc::new(InMemoryBlockStore::new(block_size));
    let blocks: Arc<dyn BlockStore> = raw.clone();
    (blocks, raw)
}

/// A blob store on tiny blocks, so a few hundred bytes already span several tree levels.
pub(crate) fn small_blob_store() -> (BlobStore, Arc<InMemoryBlockStore>) {
    let (blocks, raw) = memory_store(SMALL_BLOCK_SIZE);
    let store = BlobStore::new(blocks).unwrap();
    (store, raw)
}

/// Deterministic non-zero test data.
pub(crate) fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) | 1)
        .collect()
}

/// In-memory block store that counts block accesses and can be told to fail.
pub(crate) struct InstrumentedStore {
    pub(crate) inner: InMemoryBlockStore,
    creates_left: Mutex<Option<usize>>,
    failing_removes: AtomicBool,
    loads: AtomicUsize,
    accesses: AtomicUsize,
}

impl InstrumentedStore {
    pub(crate) fn new(block_size: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryBlockStore::new(block_size),
            creates_left: Mutex::new(None),
            failing_removes: AtomicBool::new(false),
            loads: AtomicUsize::new(0),
            accesses: AtomicUsize::new(0),
        })
    }

    /// Fail every `create` after the next `n`.
    pub(crate) fn limit_creates(&self, n: usize) {
        *self.creates_left.lock().unwrap() = Some(n);
    }

    pub(crate) fn fail_removes(&self, fail: bool) {
        self.failing_removes.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of `create`, `load`, `store` and `remove` calls.
    pub(crate) fn accesses(&self) -> usize {
        self.accesses.load(Ordering::SeqCst)
    }

    pub(crate) fn reset_counts(&self) {
        self.loads.store(0, Ordering::SeqCst);
        self.accesses.store(0, Ordering::SeqCst);
    }

    pub(crate) fn as_block_store(self: &Arc<Self>) -> Arc<dyn BlockStore> {
        self.clone()
    }

    fn count(&self) {
        self.accesses.fetch_add(1, Ordering::SeqCst);
    }
}

fn injected(what: &str) -> StoreError {
    StoreError::Io(std::io::Error::other(format!("injected {what} failure")))
}

impl BlockStore for InstrumentedStore {
    fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    fn create(&self, data: &[u8]) -> StoreResult<BlockId> {
        self.count();
        if let Some(left) = self.creates_left.lock().unwrap().as_mut() {
            if *left == 0 {
                return Err(injected("create"));
            }
            *left -= 1;
        }
        self.inner.create(data)
    }

    fn load(&self, id: &BlockId) -> StoreResult<Block> {
        self.count();
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(id)
    }

    fn store(&self, block: &Block) -> StoreResult<()> {
        self.count();
        self.inner.store(block)
    }

    fn remove(&self, id: &BlockId) -> StoreResult<bool> {
        self.count();
        if self.failing_removes.load(Ordering::SeqCst) {
            return Err(injected("remove"));
        }
        self.inner.remove(id)
    }

    fn exists(&self, id: &BlockId) -> StoreResult<bool> {
        self.inner.exists(id)
    }

    fn num_blocks(&self) -> StoreResult<u64> {
        self.inner.num_blocks()
    }

    fn block_ids(&self) -> StoreResult<Vec<BlockId>> {
        self.inner.block_ids()
    }
}
