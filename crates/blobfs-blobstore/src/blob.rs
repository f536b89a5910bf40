use blobfs_types::BlockId;

use crate::error::{BlobError, BlobResult};
use crate::tree::{DataTree, LeafHandle, TreeShape};

/// A resizable byte sequence stored in a data tree.
///
/// Reads and writes are confined to `0..size()`. Writing past the end is a
/// caller error: grow the blob with [`resize`](Self::resize) first.
#[derive(Debug)]
pub struct Blob {
    tree: DataTree,
}

impl Blob {
    pub(crate) fn new(tree: DataTree) -> Self {
        Self { tree }
    }

    /// The blob's key: the block id of its root node. Stable for the blob's lifetime.
    pub fn key(&self) -> BlockId {
        self.tree.root_id()
    }

    /// Number of bytes in the blob.
    pub fn size(&mut self) -> BlobResult<u64> {
        self.tree.num_stored_bytes()
    }

    /// Grow or shrink to `new_size` bytes. Grown bytes read as zero.
    pub fn resize(&mut self, new_size: u64) -> BlobResult<()> {
        self.tree.resize_num_bytes(new_size)
    }

    /// Write all pending changes to the block store.
    pub fn flush(&mut self) -> BlobResult<()> {
        self.tree.flush()
    }

    /// Depth, leaf count and size of the underlying tree.
    pub fn shape(&mut self) -> BlobResult<TreeShape> {
        self.tree.shape()
    }

    /// Number of leaves; an empty blob still has one.
    pub fn num_leaves(&mut self) -> BlobResult<u64> {
        self.tree.num_leaves()
    }

    /// Depth of the root node, 0 when the root is a leaf.
    pub fn depth(&mut self) -> BlobResult<u8> {
        self.tree.depth()
    }

    /// Payload capacity of one leaf block.
    pub fn max_bytes_per_leaf(&self) -> u64 {
        self.tree.max_bytes_per_leaf()
    }

    /// Visit every leaf overlapping the byte range `offset..offset + size`.
    ///
    /// For each leaf the visitor receives the leaf, the blob offset of the
    /// leaf's first byte, and the start and length of the overlapping slice
    /// within the leaf. Leaves are visited in increasing order.
    pub fn traverse_leaves<F>(&mut self, offset: u64, size: u64, mut visit: F) -> BlobResult<()>
    where
        F: FnMut(&mut LeafHandle<'_>, u64, usize, usize) -> BlobResult<()>,
    {
        if size == 0 {
            return Ok(());
        }
        let end = self.checked_range(offset, size)?;

        let leaf_bytes = self.max_bytes_per_leaf();
        let first_leaf = offset / leaf_bytes;
        let end_leaf = end.div_ceil(leaf_bytes);
        self.tree.traverse_leaves(first_leaf, end_leaf, |leaf| {
            let leaf_start = leaf.index() * leaf_bytes;
            let data_begin = offset.saturating_sub(leaf_start);
            let data_end = leaf_bytes.min(end - leaf_start);
            if data_end > leaf.num_bytes() {
                return Err(BlobError::corrupt(
                    leaf.id(),
                    format!(
                        "leaf {} holds {} bytes, tree shape requires {data_end}",
                        leaf.index(),
                        leaf.num_bytes()
                    ),
                ));
            }
            visit(
                leaf,
                leaf_start,
                data_begin as usize,
                (data_end - data_begin) as usize,
            )
        })
    }

    /// Fill `target` with the bytes starting at `offset`.
    pub fn read(&mut self, offset: u64, target: &mut [u8]) -> BlobResult<()> {
        self.traverse_leaves(offset, target.len() as u64, |leaf, leaf_start, begin, len| {
            let pos = (leaf_start + begin as u64 - offset) as usize;
            target[pos..pos + len].copy_from_slice(&leaf.data()[begin..begin + len]);
            Ok(())
        })
    }

    /// Overwrite the bytes starting at `offset` with `source`.
    ///
    /// Fails with [`BlobError::PreconditionViolation`] if the range extends
    /// past the current size; the blob is never grown implicitly.
    pub fn write(&mut self, offset: u64, source: &[u8]) -> BlobResult<()> {
        if source.is_empty() {
            return Ok(());
        }
        let end = self.checked_end(offset, source.len() as u64)?;
        let current = self.size()?;
        if end > current {
            return Err(BlobError::PreconditionViolation(format!(
                "write of {offset}..{end} past blob size {current}, resize first"
            )));
        }
        self.traverse_leaves(offset, source.len() as u64, |leaf, leaf_start, begin, len| {
            let pos = (leaf_start + begin as u64 - offset) as usize;
            leaf.data_mut()[begin..begin + len].copy_from_slice(&source[pos..pos + len]);
            Ok(())
        })
    }

    /// Read `len` bytes starting at `offset` into a new buffer.
    pub fn read_vec(&mut self, offset: u64, len: usize) -> BlobResult<Vec<u8>> {
        self.checked_range(offset, len as u64)?;
        let mut buf = vec![0u8; len];
        self.read(offset, &mut buf)?;
        Ok(buf)
    }

    /// Read the whole blob.
    pub fn read_all(&mut self) -> BlobResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| {
            BlobError::OutOfRange(format!("blob of {size} bytes does not fit in memory"))
        })?;
        self.read_vec(0, len)
    }

    pub(crate) fn remove(self) -> BlobResult<u64> {
        self.tree.remove()
    }

    fn checked_end(&self, offset: u64, size: u64) -> BlobResult<u64> {
        offset.checked_add(size).ok_or_else(|| {
            BlobError::OutOfRange(format!("range at {offset} of {size} bytes overflows"))
        })
    }

    /// End of `offset..offset + size`, which must lie within the blob.
    fn checked_range(&mut self, offset: u64, size: u64) -> BlobResult<u64> {
        let end = self.checked_end(offset, size)?;
        let current = self.size()?;
        if end > current {
            return Err(BlobError::OutOfRange(format!(
                "range {offset}..{end} exceeds blob size {current}"
            )));
        }
        Ok(end)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::testutils::{pattern, small_blob_store};

    const L: u64 = 55;

    // -----------------------------------------------------------------------
    // Scenarios
    // -----------------------------------------------------------------------

    #[test]
    fn write_spanning_two_leaves_reads_back() {
        let (store, _) = small_blob_store();
        let mut blob = store.create().unwrap();
        let data = pattern(100, 7);

        blob.resize(100).unwrap();
        blob.write(0, &data).unwrap();

        assert_eq!(blob.size().unwrap(), 100);
        assert_eq!(blob.num_leaves().unwrap(), 2);
        assert_eq!(blob.read_vec(0, 100).unwrap(), data);
    }

    #[test]
    fn empty_blob_stays_single_leaf() {
        let (store, raw) = small_blob_store();
        let mut blob = store.create().unwrap();
        blob.resize(0).unwrap();
        assert_eq!(blob.size().unwrap(), 0);
        assert_eq!(blob.depth().unwrap(), 0);
        assert_eq!(blob.num_leaves().unwrap(), 1);
        assert_eq!(blob.read_all().unwrap(), Vec::<u8>::new());
        assert_eq!(raw.len(), 1);
    }

    #[test]
    fn contents_survive_flush_and_reload() {
        let (store, _) = small_blob_store();
        let data = pattern(1000, 3);
        let key = {
            let mut blob = store.create().unwrap();
            blob.resize(1000).unwrap();
            blob.write(0, &data).unwrap();
            blob.flush().unwrap();
            blob.key()
        };

        let mut blob = store.load(&key).unwrap();
        assert_eq!(blob.key(), key);
        assert_eq!(blob.read_all().unwrap(), data);
    }

    #[test]
    fn unaligned_write_touches_only_its_range() {
        let (store, _) = small_blob_store();
        let mut blob = store.create().unwrap();
        blob.resize(5 * L).unwrap();
        let patch = pattern(70, 9);
        blob.write(50, &patch).unwrap();

        let all = blob.read_all().unwrap();
        assert!(all[..50].iter().all(|&b| b == 0));
        assert_eq!(&all[50..120], &patch[..]);
        assert!(all[120..].iter().all(|&b| b == 0));
    }

    // -----------------------------------------------------------------------
    // Range checks
    // -----------------------------------------------------------------------

    #[test]
    fn write_past_end_is_precondition_violation() {
        let (store, _) = small_blob_store();
        let mut blob = store.create().unwrap();
        blob.resize(10).unwrap();
        let err = blob.write(5, &[1; 6]).unwrap_err();
        assert!(matches!(err, BlobError::PreconditionViolation(_)));
        assert_eq!(blob.size().unwrap(), 10);
    }

    #[test]
    fn read_vec_checks_range_before_allocating() {
        let (store, _) = small_blob_store();
        let mut blob = store.create().unwrap();
        blob.resize(10).unwrap();
        assert!(matches!(blob.read_vec(0, usize::MAX), Err(BlobError::OutOfRange(_))));
        assert!(matches!(blob.read_vec(u64::MAX, 2), Err(BlobError::OutOfRange(_))));
        assert!(matches!(blob.read_vec(5, 6), Err(BlobError::OutOfRange(_))));
        assert_eq!(blob.read_vec(10, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn read_past_end_is_out_of_range() {
        let (store, _) = small_blob_store();
        let mut blob = store.create().unwrap();
        blob.resize(10).unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(blob.read(8, &mut buf), Err(BlobError::OutOfRange(_))));
        assert!(matches!(
            blob.read(u64::MAX, &mut buf),
            Err(BlobError::OutOfRange(_))
        ));
    }

    #[test]
    fn zero_length_access_is_noop() {
        let (store, _) = small_blob_store();
        let mut blob = store.create().unwrap();
        blob.write(0, &[]).unwrap();
        blob.read(0, &mut []).unwrap();
        blob.traverse_leaves(0, 0, |_, _, _, _| panic!("no leaf expected"))
            .unwrap();
    }

    // -----------------------------------------------------------------------
    // Leaf traversal
    // -----------------------------------------------------------------------

    #[test]
    fn traversal_reports_leaf_slices() {
        let (store, _) = small_blob_store();
        let mut blob = store.create().unwrap();
        blob.resize(4 * L).unwrap();

        let mut seen = Vec::new();
        blob.traverse_leaves(50, 100, |leaf, leaf_start, begin, len| {
            seen.push((leaf.index(), leaf_start, begin, len));
            Ok(())
        })
        .unwrap();

        assert_eq!(
            seen,
            vec![(0, 0, 50, 5), (1, L, 0, 55), (2, 2 * L, 0, 40)]
        );
    }

    // -----------------------------------------------------------------------
    // Zero fill
    // -----------------------------------------------------------------------

    #[test]
    fn shrink_then_grow_never_exposes_old_bytes() {
        let (store, _) = small_blob_store();
        let mut blob = store.create().unwrap();
        blob.resize(600).unwrap();
        blob.write(0, &pattern(600, 1)).unwrap();
        blob.flush().unwrap();

        blob.resize(130).unwrap();
        blob.flush().unwrap();
        blob.resize(600).unwrap();

        assert!(blob.read_vec(130, 470).unwrap().iter().all(|&b| b == 0));
        assert_eq!(blob.read_vec(0, 130).unwrap(), pattern(600, 1)[..130].to_vec());
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn write_then_read_returns_written_bytes(
            size in 1u64..1500,
            offset_frac in 0.0f64..1.0,
            len_frac in 0.0f64..1.0,
            seed in any::<u8>(),
        ) {
            let (store, _) = small_blob_store();
            let mut blob = store.create().unwrap();
            blob.resize(size).unwrap();

            let offset = ((size as f64) * offset_frac) as u64;
            let len = (((size - offset) as f64) * len_frac) as usize;
            let data = pattern(len, seed);
            blob.write(offset, &data).unwrap();
            prop_assert_eq!(blob.read_vec(offset, len).unwrap(), data);
        }

        #[test]
        fn resize_then_size_agrees(sizes in prop::collection::vec(0u64..3000, 1..10)) {
            let (store, _) = small_blob_store();
            let mut blob = store.create().unwrap();
            for size in sizes {
                blob.resize(size).unwrap();
                prop_assert_eq!(blob.size().unwrap(), size);
            }
        }

        #[test]
        fn grown_range_reads_zero(s1 in 0u64..1000, extra in 1u64..1000) {
            let (store, _) = small_blob_store();
            let mut blob = store.create().unwrap();
            blob.resize(s1).unwrap();
            blob.write(0, &pattern(s1 as usize, 5)).unwrap();

            let s2 = s1 + extra;
            blob.resize(s2).unwrap();
            let grown = blob.read_vec(s1, extra as usize).unwrap();
            prop_assert!(grown.iter().all(|&b| b == 0));
        }

        #[test]
        fn traversal_covers_expected_leaves(size in 1u64..1500, a in 0u64..1500, b in 0u64..1500) {
            let (store, _) = small_blob_store();
            let mut blob = store.create().unwrap();
            blob.resize(size).unwrap();

            let begin = a.min(b).min(size);
            let end = a.max(b).min(size);
            let mut visited = Vec::new();
            blob.traverse_leaves(begin, end - begin, |leaf, _, _, _| {
                visited.push(leaf.index());
                Ok(())
            }).unwrap();

            let expected: Vec<u64> = if end == begin {
                Vec::new()
            } else {
                (begin / L..end.div_ceil(L)).collect()
            };
            prop_assert_eq!(visited, expected);
        }
    }
}
