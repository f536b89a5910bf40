use std::collections::HashMap;

use blobfs_types::BlockId;
use tracing::{debug, warn};

use crate::error::{BlobError, BlobResult};
use crate::layout::{NodeLayout, MAX_DEPTH};
use crate::node::{DataNode, InnerNode, LeafNode};
use crate::node_store::NodeStore;

/// Size and height of a data tree, as seen from its rightmost path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeShape {
    /// Depth of the root (0 when the root is a leaf).
    pub depth: u8,
    /// Number of leaves.
    pub num_leaves: u64,
    /// Number of payload bytes.
    pub num_bytes: u64,
}

#[derive(Clone, Debug)]
struct CachedNode {
    node: DataNode,
    dirty: bool,
}

/// Undo information for one resize.
///
/// Blocks are only freed once the whole resize succeeded, and every cached
/// node is saved before its first modification, so a failed resize can put
/// the in-memory tree back exactly as it was.
#[derive(Default)]
struct Journal {
    saved: HashMap<BlockId, Option<CachedNode>>,
    created: Vec<BlockId>,
    to_free: Vec<BlockId>,
}

impl Journal {
    fn save(&mut self, id: BlockId, current: Option<&CachedNode>) {
        self.saved.entry(id).or_insert_with(|| current.cloned());
    }
}

/// One leaf, handed to the visitor of [`DataTree::traverse_leaves`].
pub struct LeafHandle<'a> {
    id: BlockId,
    index: u64,
    leaf: &'a mut LeafNode,
    dirty: &'a mut bool,
}

impl LeafHandle<'_> {
    /// Id of the leaf's block.
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Zero-based position of the leaf among all leaves of the tree.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Payload bytes in use.
    pub fn num_bytes(&self) -> u64 {
        self.leaf.num_bytes()
    }

    /// Payload capacity.
    pub fn max_bytes(&self) -> u64 {
        self.leaf.max_bytes()
    }

    /// The payload bytes in use.
    pub fn data(&self) -> &[u8] {
        self.leaf.data()
    }

    /// The payload bytes in use, mutably. Marks the leaf for write-back.
    pub fn data_mut(&mut self) -> &mut [u8] {
        *self.dirty = true;
        self.leaf.data_mut()
    }
}

/// A tree of nodes holding the bytes of one blob.
///
/// The root's block id never changes, so it can serve as the blob's key:
/// when the tree grows a level, the old root's contents move to a new block
/// and the root block becomes their parent; when it shrinks a level, the
/// only child's contents move up into the root block.
///
/// Loaded nodes live in a cache keyed by block id. Modified nodes are
/// written back by [`flush`](Self::flush), or best-effort when the tree is
/// dropped. All walks recurse at most as deep as the tree is high.
///
/// Blocks a resize could not free stay queued and are freed again on the
/// next [`flush`](Self::flush) or [`remove`](Self::remove).
pub struct DataTree {
    store: NodeStore,
    root_id: BlockId,
    nodes: HashMap<BlockId, CachedNode>,
    pending_free: Vec<BlockId>,
}

impl DataTree {
    /// Create a new tree consisting of a single empty leaf.
    pub fn create(store: NodeStore) -> BlobResult<Self> {
        let (root_id, node) = store.create_leaf()?;
        let mut nodes = HashMap::new();
        nodes.insert(root_id, CachedNode { node, dirty: false });
        debug!(root = %root_id.short_hex(), "created data tree");
        Ok(Self {
            store,
            root_id,
            nodes,
            pending_free: Vec::new(),
        })
    }

    /// Open the tree rooted at `root_id`, loading the root node.
    pub fn open(store: NodeStore, root_id: BlockId) -> BlobResult<Self> {
        let node = store.load(&root_id)?;
        let mut nodes = HashMap::new();
        nodes.insert(root_id, CachedNode { node, dirty: false });
        Ok(Self {
            store,
            root_id,
            nodes,
            pending_free: Vec::new(),
        })
    }

    /// Block id of the root node.
    pub fn root_id(&self) -> BlockId {
        self.root_id
    }

    /// Node layout of the underlying store.
    pub fn layout(&self) -> &NodeLayout {
        self.store.layout()
    }

    /// Payload capacity of one leaf.
    pub fn max_bytes_per_leaf(&self) -> u64 {
        self.store.max_bytes_per_leaf()
    }

    /// Depth, leaf count and byte count, from one walk down the rightmost path.
    ///
    /// Every child left of the path is full, so it contributes the capacity
    /// of a full subtree of its depth.
    pub fn shape(&mut self) -> BlobResult<TreeShape> {
        let layout = *self.layout();
        let mut id = self.root_id;
        let mut expected_depth = None;
        let mut root_depth = None;
        let mut num_leaves = 0u64;
        let mut num_bytes = 0u64;

        loop {
            let current = id;
            let node = self.node_at(current, expected_depth)?;
            let depth = *root_depth.get_or_insert(node.depth());
            match node {
                DataNode::Leaf(leaf) => {
                    return Ok(TreeShape {
                        depth,
                        num_leaves: num_leaves.saturating_add(1),
                        num_bytes: num_bytes.saturating_add(leaf.num_bytes()),
                    });
                }
                DataNode::Inner(inner) => {
                    let child_depth = inner.depth() - 1;
                    let full_children = inner.num_children() as u64 - 1;
                    num_leaves = num_leaves.saturating_add(
                        full_children.saturating_mul(layout.leaves_per_subtree(child_depth)),
                    );
                    num_bytes = num_bytes.saturating_add(
                        full_children.saturating_mul(layout.bytes_per_subtree(child_depth)),
                    );
                    id = inner
                        .last_child()
                        .ok_or_else(|| BlobError::corrupt(current, "inner node without children"))?;
                    expected_depth = Some(child_depth);
                }
            }
        }
    }

    /// Number of payload bytes stored in the tree.
    pub fn num_stored_bytes(&mut self) -> BlobResult<u64> {
        Ok(self.shape()?.num_bytes)
    }

    /// Number of leaves in the tree.
    pub fn num_leaves(&mut self) -> BlobResult<u64> {
        Ok(self.shape()?.num_leaves)
    }

    /// Depth of the root node.
    pub fn depth(&mut self) -> BlobResult<u8> {
        Ok(self.node_at(self.root_id, None)?.depth())
    }

    /// Grow or shrink the tree to hold exactly `new_size` bytes.
    ///
    /// Bytes exposed by growing read as zero. Blocks no longer needed after
    /// shrinking are freed. If any block store access fails, the in-memory
    /// tree is restored to its previous state and blocks allocated so far
    /// are released again.
    pub fn resize_num_bytes(&mut self, new_size: u64) -> BlobResult<()> {
        let shape = self.shape()?;
        if new_size == shape.num_bytes {
            return Ok(());
        }

        let mut tx = Journal::default();
        let result = if new_size > shape.num_bytes {
            self.grow(&mut tx, shape, new_size)
        } else {
            self.shrink(&mut tx, shape, new_size)
        };

        match result {
            Ok(()) => {
                debug!(
                    root = %self.root_id.short_hex(),
                    from = shape.num_bytes,
                    to = new_size,
                    created = tx.created.len(),
                    freed = tx.to_free.len(),
                    "resized data tree"
                );
                self.commit(tx);
                Ok(())
            }
            Err(e) => {
                self.rollback(tx);
                Err(e)
            }
        }
    }

    /// Visit the leaves with index in `begin_leaf..end_leaf`, left to right.
    ///
    /// Subtrees outside the range are not loaded. Leaves that had to be
    /// loaded for the visit are only kept in the cache if the visitor
    /// modified them.
    pub fn traverse_leaves<F>(&mut self, begin_leaf: u64, end_leaf: u64, mut visit: F) -> BlobResult<()>
    where
        F: FnMut(&mut LeafHandle<'_>) -> BlobResult<()>,
    {
        let shape = self.shape()?;
        if begin_leaf > end_leaf || end_leaf > shape.num_leaves {
            return Err(BlobError::OutOfRange(format!(
                "leaf range {begin_leaf}..{end_leaf} exceeds leaf count {}",
                shape.num_leaves
            )));
        }
        if begin_leaf == end_leaf {
            return Ok(());
        }
        self.traverse_subtree(self.root_id, shape.depth, 0, begin_leaf, end_leaf, &mut visit)
    }

    /// Write every modified node back to the block store.
    ///
    /// Cached leaves are dropped afterwards; inner nodes stay cached. Blocks
    /// an earlier resize failed to free are freed again.
    pub fn flush(&mut self) -> BlobResult<()> {
        let mut written = 0usize;
        for (id, cached) in &mut self.nodes {
            if cached.dirty {
                self.store.store(id, &cached.node)?;
                cached.dirty = false;
                written += 1;
            }
        }
        self.nodes
            .retain(|_, cached| matches!(cached.node, DataNode::Inner(_)));
        if written > 0 {
            debug!(root = %self.root_id.short_hex(), written, "flushed data tree");
        }
        self.free_pending()?;
        Ok(())
    }

    /// Free every block of the tree, children before parents.
    ///
    /// Returns the number of blocks freed, including blocks an earlier
    /// resize failed to free.
    pub fn remove(mut self) -> BlobResult<u64> {
        let pending = self.free_pending()?;
        let depth = self.depth()?;
        let freed = self.free_subtree(self.root_id, depth)? + pending;
        self.nodes.clear();
        debug!(root = %self.root_id.short_hex(), freed, "removed data tree");
        Ok(freed)
    }

    // -----------------------------------------------------------------------
    // Node cache
    // -----------------------------------------------------------------------

    fn node_at(&mut self, id: BlockId, expected_depth: Option<u8>) -> BlobResult<&DataNode> {
        if !self.nodes.contains_key(&id) {
            let node = self.store.load(&id)?;
            self.nodes.insert(id, CachedNode { node, dirty: false });
        }
        let node = &self.nodes.get(&id).ok_or(BlobError::NotFound(id))?.node;
        if let Some(expected) = expected_depth {
            if node.depth() != expected {
                return Err(BlobError::corrupt(
                    id,
                    format!("node has depth {}, parent expects {expected}", node.depth()),
                ));
            }
        }
        Ok(node)
    }

    fn inner_at(&mut self, id: BlockId, depth: u8) -> BlobResult<&InnerNode> {
        match self.node_at(id, Some(depth))? {
            DataNode::Inner(inner) => Ok(inner),
            DataNode::Leaf(_) => Err(BlobError::corrupt(id, "expected an inner node")),
        }
    }

    fn node_mut(&mut self, tx: &mut Journal, id: BlockId, depth: u8) -> BlobResult<&mut DataNode> {
        self.node_at(id, Some(depth))?;
        tx.save(id, self.nodes.get(&id));
        let cached = self.nodes.get_mut(&id).ok_or(BlobError::NotFound(id))?;
        cached.dirty = true;
        Ok(&mut cached.node)
    }

    fn leaf_mut(&mut self, tx: &mut Journal, id: BlockId) -> BlobResult<&mut LeafNode> {
        match self.node_mut(tx, id, 0)? {
            DataNode::Leaf(leaf) => Ok(leaf),
            DataNode::Inner(_) => Err(BlobError::corrupt(id, "expected a leaf")),
        }
    }

    fn inner_mut(&mut self, tx: &mut Journal, id: BlockId, depth: u8) -> BlobResult<&mut InnerNode> {
        match self.node_mut(tx, id, depth)? {
            DataNode::Inner(inner) => Ok(inner),
            DataNode::Leaf(_) => Err(BlobError::corrupt(id, "expected an inner node")),
        }
    }

    fn replace_node(&mut self, tx: &mut Journal, id: BlockId, node: DataNode) {
        tx.save(id, self.nodes.get(&id));
        self.nodes.insert(id, CachedNode { node, dirty: true });
    }

    // -----------------------------------------------------------------------
    // Growing
    // -----------------------------------------------------------------------

    fn grow(&mut self, tx: &mut Journal, shape: TreeShape, new_size: u64) -> BlobResult<()> {
        let layout = *self.layout();
        let target_leaves = layout.leaves_for_bytes(new_size);

        let mut depth = shape.depth;
        while layout.leaves_per_subtree(depth) < target_leaves {
            if depth >= MAX_DEPTH {
                return Err(BlobError::OutOfRange(format!(
                    "{new_size} bytes exceed the capacity of a tree of depth {MAX_DEPTH}"
                )));
            }
            self.increase_depth(tx, depth)?;
            depth += 1;
        }

        self.grow_subtree(tx, self.root_id, depth, target_leaves, layout.last_leaf_bytes(new_size))
    }

    /// Move the root's contents into a new block and make the root its parent.
    fn increase_depth(&mut self, tx: &mut Journal, depth: u8) -> BlobResult<()> {
        let root = self.node_at(self.root_id, Some(depth))?.clone();
        let child_id = self.store.create_node(&root)?;
        tx.created.push(child_id);
        self.nodes.insert(
            child_id,
            CachedNode {
                node: root,
                dirty: false,
            },
        );
        self.replace_node(
            tx,
            self.root_id,
            DataNode::Inner(InnerNode::new(depth + 1, vec![child_id])),
        );
        debug!(root = %self.root_id.short_hex(), depth = depth + 1, "increased tree depth");
        Ok(())
    }

    /// Extend the subtree at `id` along its right edge until it has
    /// `target_leaves` leaves, the last of which holds `last_bytes`.
    fn grow_subtree(
        &mut self,
        tx: &mut Journal,
        id: BlockId,
        depth: u8,
        target_leaves: u64,
        last_bytes: u64,
    ) -> BlobResult<()> {
        if depth == 0 {
            self.leaf_mut(tx, id)?.resize(last_bytes);
            return Ok(());
        }

        let layout = *self.layout();
        let per_child = layout.leaves_per_subtree(depth - 1);
        let (existing, last_child) = {
            let inner = self.inner_at(id, depth)?;
            let last = inner
                .last_child()
                .ok_or_else(|| BlobError::corrupt(id, "inner node without children"))?;
            (inner.num_children(), last)
        };
        let needed = target_leaves.div_ceil(per_child) as usize;
        debug_assert!(needed >= existing);

        // The current last child is either the new last child or gets filled up.
        if needed == existing {
            let before = (existing as u64 - 1) * per_child;
            self.grow_subtree(tx, last_child, depth - 1, target_leaves - before, last_bytes)?;
        } else {
            self.grow_subtree(tx, last_child, depth - 1, per_child, layout.max_bytes_per_leaf())?;
        }

        let mut new_children = Vec::with_capacity(needed.saturating_sub(existing));
        for index in existing..needed {
            let before = index as u64 * per_child;
            let child = if index + 1 == needed {
                self.create_subtree(tx, depth - 1, target_leaves - before, last_bytes)?
            } else {
                self.create_subtree(tx, depth - 1, per_child, layout.max_bytes_per_leaf())?
            };
            new_children.push(child);
        }
        if !new_children.is_empty() {
            self.inner_mut(tx, id, depth)?
                .children_mut()
                .extend(new_children);
        }
        Ok(())
    }

    /// Allocate a right-dense subtree of `depth` with `num_leaves` zero-filled
    /// leaves, the last of which holds `last_bytes`.
    ///
    /// New nodes are written straight to the block store and not cached.
    fn create_subtree(
        &mut self,
        tx: &mut Journal,
        depth: u8,
        num_leaves: u64,
        last_bytes: u64,
    ) -> BlobResult<BlockId> {
        let layout = *self.layout();
        if depth == 0 {
            let mut leaf = LeafNode::empty(&layout);
            leaf.resize(last_bytes);
            let id = self.store.create_node(&DataNode::Leaf(leaf))?;
            tx.created.push(id);
            return Ok(id);
        }

        let per_child = layout.leaves_per_subtree(depth - 1);
        let count = num_leaves.div_ceil(per_child);
        let mut children = Vec::with_capacity(count as usize);
        for index in 0..count {
            let before = index * per_child;
            let child = if index + 1 == count {
                self.create_subtree(tx, depth - 1, num_leaves - before, last_bytes)?
            } else {
                self.create_subtree(tx, depth - 1, per_child, layout.max_bytes_per_leaf())?
            };
            children.push(child);
        }
        let (id, _) = self.store.create_inner(depth, children)?;
        tx.created.push(id);
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Shrinking
    // -----------------------------------------------------------------------

    fn shrink(&mut self, tx: &mut Journal, shape: TreeShape, new_size: u64) -> BlobResult<()> {
        let layout = *self.layout();
        self.shrink_subtree(
            tx,
            self.root_id,
            shape.depth,
            layout.leaves_for_bytes(new_size),
            layout.last_leaf_bytes(new_size),
        )?;
        self.collapse_root(tx)
    }

    /// Cut the subtree at `id` from the right down to `target_leaves` leaves,
    /// the last of which keeps `last_bytes`.
    fn shrink_subtree(
        &mut self,
        tx: &mut Journal,
        id: BlockId,
        depth: u8,
        target_leaves: u64,
        last_bytes: u64,
    ) -> BlobResult<()> {
        if depth == 0 {
            self.leaf_mut(tx, id)?.resize(last_bytes);
            return Ok(());
        }

        let per_child = self.layout().leaves_per_subtree(depth - 1);
        let keep = target_leaves.div_ceil(per_child) as usize;
        let dropped = self
            .inner_at(id, depth)?
            .children()
            .get(keep..)
            .map(<[BlockId]>::to_vec)
            .unwrap_or_default();
        for child in &dropped {
            self.collect_subtree(*child, depth - 1, &mut tx.to_free)?;
        }
        if !dropped.is_empty() {
            self.inner_mut(tx, id, depth)?.children_mut().truncate(keep);
        }

        let last_child = self
            .inner_at(id, depth)?
            .last_child()
            .ok_or_else(|| BlobError::corrupt(id, "inner node without children"))?;
        let before = (keep as u64 - 1) * per_child;
        self.shrink_subtree(tx, last_child, depth - 1, target_leaves - before, last_bytes)
    }

    /// While the root has a single child, pull that child's contents up into
    /// the root block and free the child's block.
    fn collapse_root(&mut self, tx: &mut Journal) -> BlobResult<()> {
        loop {
            let (depth, only_child) = match self.node_at(self.root_id, None)? {
                DataNode::Inner(inner) if inner.num_children() == 1 => {
                    (inner.depth(), inner.children()[0])
                }
                _ => return Ok(()),
            };
            let child = self.node_at(only_child, Some(depth - 1))?.clone();
            self.replace_node(tx, self.root_id, child);
            tx.to_free.push(only_child);
            debug!(root = %self.root_id.short_hex(), depth = depth - 1, "decreased tree depth");
        }
    }

    /// Append the ids of the subtree at `id` to `out` in post-order.
    fn collect_subtree(&mut self, id: BlockId, depth: u8, out: &mut Vec<BlockId>) -> BlobResult<()> {
        if depth > 0 {
            let children = self.inner_at(id, depth)?.children().to_vec();
            for child in children {
                self.collect_subtree(child, depth - 1, out)?;
            }
        }
        out.push(id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Resize bookkeeping
    // -----------------------------------------------------------------------

    /// Free the blocks a successful resize cut off.
    ///
    /// The resize is already in effect, so a failing remove does not undo
    /// it. The block is queued in `pending_free` instead.
    fn commit(&mut self, tx: Journal) {
        for id in &tx.to_free {
            self.nodes.remove(id);
        }
        for id in tx.to_free {
            match self.store.remove(&id) {
                Ok(true) => {}
                Ok(false) => warn!(block = %id.short_hex(), "block to free was already gone"),
                Err(e) => {
                    warn!(block = %id.short_hex(), error = %e, "failed to free block, will retry");
                    self.pending_free.push(id);
                }
            }
        }
    }

    /// Retry removing blocks queued by [`commit`](Self::commit).
    ///
    /// Blocks that still fail stay queued and the first error is returned.
    fn free_pending(&mut self) -> BlobResult<u64> {
        if self.pending_free.is_empty() {
            return Ok(0);
        }
        let mut freed = 0u64;
        let mut first_err = None;
        for id in std::mem::take(&mut self.pending_free) {
            match self.store.remove(&id) {
                Ok(removed) => freed += u64::from(removed),
                Err(e) => {
                    self.pending_free.push(id);
                    first_err.get_or_insert(e);
                }
            }
        }
        debug!(
            root = %self.root_id.short_hex(),
            freed,
            still_pending = self.pending_free.len(),
            "retried pending frees"
        );
        match first_err {
            Some(e) => Err(e),
            None => Ok(freed),
        }
    }

    fn rollback(&mut self, tx: Journal) {
        for (id, saved) in tx.saved {
            match saved {
                Some(cached) => {
                    self.nodes.insert(id, cached);
                }
                None => {
                    self.nodes.remove(&id);
                }
            }
        }
        for id in &tx.created {
            self.nodes.remove(id);
            if let Err(e) = self.store.remove(id) {
                warn!(block = %id.short_hex(), error = %e, "failed to release block of aborted resize");
            }
        }
        debug!(root = %self.root_id.short_hex(), released = tx.created.len(), "rolled back resize");
    }

    // -----------------------------------------------------------------------
    // Traversal and removal
    // -----------------------------------------------------------------------

    fn traverse_subtree<F>(
        &mut self,
        id: BlockId,
        depth: u8,
        first_leaf: u64,
        begin: u64,
        end: u64,
        visit: &mut F,
    ) -> BlobResult<()>
    where
        F: FnMut(&mut LeafHandle<'_>) -> BlobResult<()>,
    {
        if depth == 0 {
            return self.visit_leaf(id, first_leaf, visit);
        }

        let per_child = self.layout().leaves_per_subtree(depth - 1);
        let first_child = (begin.saturating_sub(first_leaf) / per_child) as usize;
        let end_child = (end - first_leaf).div_ceil(per_child) as usize;
        let children = {
            let inner = self.inner_at(id, depth)?;
            let end_child = end_child.min(inner.num_children());
            inner
                .children()
                .get(first_child..end_child)
                .map(<[BlockId]>::to_vec)
                .unwrap_or_default()
        };

        for (offset, child) in children.into_iter().enumerate() {
            let child_first_leaf = first_leaf + (first_child + offset) as u64 * per_child;
            self.traverse_subtree(child, depth - 1, child_first_leaf, begin, end, visit)?;
        }
        Ok(())
    }

    fn visit_leaf<F>(&mut self, id: BlockId, index: u64, visit: &mut F) -> BlobResult<()>
    where
        F: FnMut(&mut LeafHandle<'_>) -> BlobResult<()>,
    {
        let (mut cached, was_cached) = match self.nodes.remove(&id) {
            Some(cached) => (cached, true),
            None => {
                let node = self.store.load(&id)?;
                (CachedNode { node, dirty: false }, false)
            }
        };

        let result = match &mut cached.node {
            DataNode::Leaf(leaf) => {
                let mut handle = LeafHandle {
                    id,
                    index,
                    leaf,
                    dirty: &mut cached.dirty,
                };
                visit(&mut handle)
            }
            DataNode::Inner(_) => Err(BlobError::corrupt(id, "expected a leaf")),
        };

        if was_cached || cached.dirty {
            self.nodes.insert(id, cached);
        }
        result
    }

    fn free_subtree(&mut self, id: BlockId, depth: u8) -> BlobResult<u64> {
        let mut freed = 0;
        if depth > 0 {
            let children = self.inner_at(id, depth)?.children().to_vec();
            for child in children {
                freed += self.free_subtree(child, depth - 1)?;
            }
        }
        self.nodes.remove(&id);
        if self.store.remove(&id)? {
            freed += 1;
        }
        Ok(freed)
    }
}

impl Drop for DataTree {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(root = %self.root_id.short_hex(), error = %e, "failed to flush data tree on drop");
        }
    }
}

impl std::fmt::Debug for DataTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataTree")
            .field("root", &self.root_id)
            .field("cached_nodes", &self.nodes.len())
            .field("pending_free", &self.pending_free.len())
            .finish()
    }
}
