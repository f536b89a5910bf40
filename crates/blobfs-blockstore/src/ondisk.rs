use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use blobfs_types::BlockId;
use tracing::{debug, warn};

use crate::block::Block;
use crate::error::{StoreError, StoreResult};
use crate::traits::BlockStore;

/// Checksum prefix: 4 bytes CRC32 of the payload.
const CHECKSUM_SIZE: usize = 4;

/// Suffix of in-flight writes that have not been renamed into place yet.
const TEMP_SUFFIX: &str = ".tmp";

/// Directory-backed block store: one file per block.
///
/// Blocks are fanned out into 256 sub-directories by the first byte of
/// their id, similar to a git object directory:
///
/// ```text
/// <root>/ab/abcdef0123456789abcdef0123456789
/// ```
///
/// On-disk format of a block file:
/// ```text
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [block_size bytes: payload]
/// ```
///
/// Every write goes to a temporary sibling file which is then renamed over
/// the target, so a crash leaves either the old or the new block, never a
/// torn one. A block that fails its length or CRC check on load is reported
/// as [`StoreError::Corrupt`].
pub struct OnDiskBlockStore {
    root: PathBuf,
    block_size: usize,
}

impl OnDiskBlockStore {
    /// Open (or create) a block store rooted at `root`.
    pub fn open(root: &Path, block_size: usize) -> StoreResult<Self> {
        fs::create_dir_all(root)?;
        debug!(root = %root.display(), block_size, "opened on-disk block store");
        Ok(Self {
            root: root.to_path_buf(),
            block_size,
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn block_path(&self, id: &BlockId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join(&hex[..2]).join(hex)
    }

    fn write_block_file(&self, path: &Path, data: &[u8]) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut contents = Vec::with_capacity(CHECKSUM_SIZE + data.len());
        contents.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
        contents.extend_from_slice(data);

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(TEMP_SUFFIX);
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, &contents)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn decode_block_file(&self, id: &BlockId, contents: Vec<u8>) -> StoreResult<Block> {
        if contents.len() != CHECKSUM_SIZE + self.block_size {
            return Err(StoreError::Corrupt {
                id: *id,
                reason: format!(
                    "file holds {} bytes, expected {}",
                    contents.len(),
                    CHECKSUM_SIZE + self.block_size
                ),
            });
        }
        let expected_crc = u32::from_le_bytes([contents[0], contents[1], contents[2], contents[3]]);
        let data = contents[CHECKSUM_SIZE..].to_vec();
        let actual_crc = crc32fast::hash(&data);
        if actual_crc != expected_crc {
            return Err(StoreError::Corrupt {
                id: *id,
                reason: format!("checksum mismatch: stored {expected_crc:08x}, computed {actual_crc:08x}"),
            });
        }
        Ok(Block::new(*id, data))
    }

    fn fanout_dirs(&self) -> StoreResult<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }
}

impl BlockStore for OnDiskBlockStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn create(&self, data: &[u8]) -> StoreResult<BlockId> {
        self.check_block_size(data.len())?;
        let mut id = BlockId::random();
        while self.block_path(&id).exists() {
            id = BlockId::random();
        }
        self.write_block_file(&self.block_path(&id), data)?;
        Ok(id)
    }

    fn load(&self, id: &BlockId) -> StoreResult<Block> {
        match fs::read(self.block_path(id)) {
            Ok(contents) => self.decode_block_file(id, contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(*id)),
            Err(e) => Err(e.into()),
        }
    }

    // The existence check and the rename are separate steps. A remove that
    // lands between them is undone by the rename.
    fn store(&self, block: &Block) -> StoreResult<()> {
        self.check_block_size(block.len())?;
        let path = self.block_path(&block.id);
        if !path.exists() {
            return Err(StoreError::NotFound(block.id));
        }
        self.write_block_file(&path, &block.data)
    }

    fn remove(&self, id: &BlockId) -> StoreResult<bool> {
        match fs::remove_file(self.block_path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, id: &BlockId) -> StoreResult<bool> {
        Ok(self.block_path(id).is_file())
    }

    fn num_blocks(&self) -> StoreResult<u64> {
        Ok(self.block_ids()?.len() as u64)
    }

    fn block_ids(&self) -> StoreResult<Vec<BlockId>> {
        let mut ids = Vec::new();
        for dir in self.fanout_dirs()? {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };
                if name.ends_with(TEMP_SUFFIX) {
                    continue;
                }
                match BlockId::from_hex(name) {
                    Ok(id) => ids.push(id),
                    Err(e) => {
                        warn!(path = %entry.path().display(), error = %e, "skipping foreign file in block store");
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl std::fmt::Debug for OnDiskBlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnDiskBlockStore")
            .field("root", &self.root)
            .field("block_size", &self.block_size)
            .finish()
    }
}
