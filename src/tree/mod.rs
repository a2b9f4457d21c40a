//! In-memory B+ tree with multimap leaves
//!
//! A standard B+ tree of configurable order `m`:
//! - Internal nodes hold separator keys and only route search
//! - Leaves map each key to a non-empty bucket of values (duplicate
//!   inserts of a key accumulate values in insertion order)
//! - Leaves are doubly linked in ascending key order, so external
//!   range scans and visualization can walk the chain without touching
//!   internal nodes
//!
//! Nodes live in an arena indexed by `NodeId`; parent and leaf-chain
//! links are plain ids, never owning references.

mod error;
mod node;

pub use error::{BPlusTreeError, BPlusTreeResult};
pub use node::{InternalNode, LeafNode, Node, NodeId};

/// Key type for the tree (i64, matching the integer keys the drivers feed in)
pub type Key = i64;

/// Default tree order when none is configured (small fan-out keeps
/// splits frequent, which suits demos and visualization)
pub const DEFAULT_ORDER: usize = 5;

/// B+ tree data structure
///
/// Order `m` means:
/// - Internal nodes have at most `m` children and at least `ceil(m/2)`
///   children (except the root)
/// - Leaf nodes have at most `m-1` keys; a node transiently reaches `m`
///   keys right before it is split
#[derive(Debug)]
pub struct BPlusTree<V> {
    /// Root node ID; the root of an empty tree is a single empty leaf
    root: NodeId,

    /// Tree order (max children per internal node)
    order: usize,

    /// Node storage
    nodes: Vec<Option<Node<V>>>,

    /// Free list for recycling merged-away nodes
    free_list: Vec<NodeId>,

    /// Total number of values stored across all buckets
    entry_count: usize,
}

impl<V> BPlusTree<V> {
    /// Create a new empty tree with the given order
    ///
    /// The order must be >= 3; anything smaller cannot define a
    /// meaningful split point.
    pub fn new(order: usize) -> BPlusTreeResult<Self> {
        if order < 3 {
            return Err(BPlusTreeError::InvalidOrder(order));
        }

        let mut tree = Self {
            root: 0,
            order,
            nodes: Vec::new(),
            free_list: Vec::new(),
            entry_count: 0,
        };
        tree.root = tree.allocate_node(Node::Leaf(LeafNode::new()));
        Ok(tree)
    }

    /// Get the tree order
    pub fn order(&self) -> usize {
        self.order
    }

    /// Total number of stored values (duplicates counted)
    pub fn len(&self) -> usize {
        self.entry_count
    }

    /// Check if the tree holds no values
    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// Tree height: 1 for a lone leaf root, growing by one per level
    /// of internal nodes
    pub fn height(&self) -> usize {
        let mut height = 1;
        let mut current = self.root;

        while let Some(Node::Internal(node)) = self.get_node(current) {
            match node.children.first() {
                Some(&child_id) => {
                    current = child_id;
                    height += 1;
                }
                None => break,
            }
        }

        height
    }

    // ========== Node Management ==========

    /// Allocate a new node, returning its ID
    fn allocate_node(&mut self, node: Node<V>) -> NodeId {
        if let Some(id) = self.free_list.pop() {
            self.nodes[id] = Some(node);
            id
        } else {
            let id = self.nodes.len();
            self.nodes.push(Some(node));
            id
        }
    }

    /// Get a reference to a node by ID (public for the visualizer)
    pub fn get_node(&self, id: NodeId) -> Option<&Node<V>> {
        self.nodes.get(id).and_then(|n| n.as_ref())
    }

    /// Get the root node ID
    pub fn root_node_id(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free_list.len()
    }

    /// Free a node, adding it to the free list
    fn free_node(&mut self, id: NodeId) {
        if id < self.nodes.len() && self.nodes[id].is_some() {
            self.nodes[id] = None;
            self.free_list.push(id);
        }
    }

    /// Remove a node from storage and return it, recycling its slot
    fn take_node(&mut self, id: NodeId) -> BPlusTreeResult<Node<V>> {
        let node = self
            .nodes
            .get_mut(id)
            .and_then(Option::take)
            .ok_or_else(|| BPlusTreeError::InvariantViolation(format!("missing node {id}")))?;
        self.free_list.push(id);
        Ok(node)
    }

    fn node(&self, id: NodeId) -> BPlusTreeResult<&Node<V>> {
        self.get_node(id)
            .ok_or_else(|| BPlusTreeError::InvariantViolation(format!("missing node {id}")))
    }

    fn node_mut(&mut self, id: NodeId) -> BPlusTreeResult<&mut Node<V>> {
        self.nodes
            .get_mut(id)
            .and_then(|n| n.as_mut())
            .ok_or_else(|| BPlusTreeError::InvariantViolation(format!("missing node {id}")))
    }

    fn internal(&self, id: NodeId) -> BPlusTreeResult<&InternalNode> {
        self.node(id)?
            .as_internal()
            .ok_or_else(|| BPlusTreeError::InvariantViolation(format!("node {id} is not internal")))
    }

    fn internal_mut(&mut self, id: NodeId) -> BPlusTreeResult<&mut InternalNode> {
        self.node_mut(id)?
            .as_internal_mut()
            .ok_or_else(|| BPlusTreeError::InvariantViolation(format!("node {id} is not internal")))
    }

    fn leaf_mut(&mut self, id: NodeId) -> BPlusTreeResult<&mut LeafNode<V>> {
        self.node_mut(id)?
            .as_leaf_mut()
            .ok_or_else(|| BPlusTreeError::InvariantViolation(format!("node {id} is not a leaf")))
    }

    // ========== Search ==========

    /// Find the leaf whose key range covers the given key
    fn find_leaf(&self, key: Key) -> Option<NodeId> {
        let mut current = self.root;

        loop {
            match self.get_node(current)? {
                Node::Leaf(_) => return Some(current),
                Node::Internal(node) => {
                    current = *node.children.get(node.find_child_index(key))?;
                }
            }
        }
    }

    /// Locate a child's position among its parent's children
    ///
    /// Position is matched by node ID rather than by re-routing the
    /// child's first key, so a leaf emptied by deletion can still be
    /// found for rebalancing.
    fn child_index(&self, parent_id: NodeId, child_id: NodeId) -> BPlusTreeResult<usize> {
        self.internal(parent_id)?
            .children
            .iter()
            .position(|&c| c == child_id)
            .ok_or_else(|| {
                BPlusTreeError::InvariantViolation(format!(
                    "node {child_id} not found under parent {parent_id}"
                ))
            })
    }

    /// Retrieve the bucket of values stored under a key, in insertion
    /// order, or `None` if the key is absent
    pub fn retrieve(&self, key: Key) -> Option<&[V]> {
        let leaf_id = self.find_leaf(key)?;
        self.get_node(leaf_id)?.as_leaf()?.get(key)
    }

    // ========== Insert ==========

    /// Insert a key-value pair
    ///
    /// Duplicate keys accumulate values in their bucket; new keys keep
    /// the leaf sorted. Overflowing nodes are split and the split
    /// propagates upward, possibly growing a new root.
    pub fn insert(&mut self, key: Key, value: V) -> BPlusTreeResult<()> {
        let leaf_id = self.find_leaf(key).ok_or_else(|| {
            BPlusTreeError::InvariantViolation("descent reached no leaf".to_string())
        })?;

        self.leaf_mut(leaf_id)?.add(key, value);
        self.entry_count += 1;

        // A node holding exactly `order` keys is one past capacity;
        // that is the split trigger.
        let mut current = leaf_id;
        while self.node(current)?.key_count() == self.order {
            if current == self.root {
                let top_id = self.split(current)?;
                self.root = top_id;
                current = top_id;
            } else {
                let parent_id = self.node(current)?.parent().ok_or_else(|| {
                    BPlusTreeError::InvariantViolation(format!(
                        "non-root node {current} has no parent"
                    ))
                })?;
                let index = self.child_index(parent_id, current)?;
                let top_id = self.split(current)?;
                self.merge_up(parent_id, top_id, index)?;
                current = parent_id;
            }
        }

        Ok(())
    }

    /// Split an overflowing node, returning the one-key top node that
    /// now stands over the two halves
    ///
    /// A leaf split creates a brand-new top node (a leaf has no key it
    /// could promote without data loss) and relinks the leaf chain. An
    /// internal split promotes the middle key: the node itself mutates
    /// in place into `keys = [pivot], children = [left, right]`.
    fn split(&mut self, node_id: NodeId) -> BPlusTreeResult<NodeId> {
        let mid = self.order / 2;

        if self.node(node_id)?.is_leaf() {
            let (right_keys, right_buckets, old_next) = {
                let leaf = self.leaf_mut(node_id)?;
                (
                    leaf.keys.split_off(mid),
                    leaf.buckets.split_off(mid),
                    leaf.next,
                )
            };
            let pivot = *right_keys.first().ok_or_else(|| {
                BPlusTreeError::InvariantViolation(format!("split of leaf {node_id} left no keys"))
            })?;

            let right_id = self.allocate_node(Node::Leaf(LeafNode {
                keys: right_keys,
                buckets: right_buckets,
                parent: None,
                prev: Some(node_id),
                next: old_next,
            }));
            let top_id = self.allocate_node(Node::Internal(InternalNode::new(
                vec![pivot],
                vec![node_id, right_id],
                None,
            )));

            {
                let leaf = self.leaf_mut(node_id)?;
                leaf.next = Some(right_id);
                leaf.parent = Some(top_id);
            }
            self.node_mut(right_id)?.set_parent(Some(top_id));
            if let Some(next_id) = old_next {
                self.leaf_mut(next_id)?.prev = Some(right_id);
            }

            Ok(top_id)
        } else {
            let (left_keys, pivot, right_keys, left_children, right_children) = {
                let node = self.internal_mut(node_id)?;
                let right_keys = node.keys.split_off(mid + 1);
                let pivot = node.keys.pop().ok_or_else(|| {
                    BPlusTreeError::InvariantViolation(format!("split of node {node_id} found no pivot"))
                })?;
                let right_children = node.children.split_off(mid + 1);
                (
                    std::mem::take(&mut node.keys),
                    pivot,
                    right_keys,
                    std::mem::take(&mut node.children),
                    right_children,
                )
            };

            let left_id = self.allocate_node(Node::Internal(InternalNode::new(
                left_keys,
                left_children.clone(),
                Some(node_id),
            )));
            let right_id = self.allocate_node(Node::Internal(InternalNode::new(
                right_keys,
                right_children.clone(),
                Some(node_id),
            )));

            for child_id in left_children {
                self.node_mut(child_id)?.set_parent(Some(left_id));
            }
            for child_id in right_children {
                self.node_mut(child_id)?.set_parent(Some(right_id));
            }

            {
                let node = self.internal_mut(node_id)?;
                node.keys = vec![pivot];
                node.children = vec![left_id, right_id];
            }

            Ok(node_id)
        }
    }

    /// Absorb a freshly split child into its parent
    ///
    /// The top node packs `[left, right]` under a single pivot key; the
    /// placeholder child slot is replaced by the pivot spliced into the
    /// parent's keys and the two halves spliced into its children.
    fn merge_up(&mut self, parent_id: NodeId, top_id: NodeId, index: usize) -> BPlusTreeResult<()> {
        let top = match self.take_node(top_id)? {
            Node::Internal(node) => node,
            Node::Leaf(_) => {
                return Err(BPlusTreeError::InvariantViolation(format!(
                    "split of node {top_id} produced a leaf top"
                )));
            }
        };
        let pivot = *top.keys.first().ok_or_else(|| {
            BPlusTreeError::InvariantViolation(format!("top node {top_id} holds no pivot"))
        })?;

        {
            let parent = self.internal_mut(parent_id)?;
            if index >= parent.children.len() {
                return Err(BPlusTreeError::InvariantViolation(format!(
                    "child index {index} out of range in parent {parent_id}"
                )));
            }
            parent.children.remove(index);

            let pos = parent
                .keys
                .iter()
                .position(|&k| pivot < k)
                .unwrap_or(parent.keys.len());
            parent.keys.insert(pos, pivot);
            for (offset, &child_id) in top.children.iter().enumerate() {
                parent.children.insert(pos + offset, child_id);
            }
        }

        for &child_id in &top.children {
            self.node_mut(child_id)?.set_parent(Some(parent_id));
        }

        Ok(())
    }

    // ========== Delete ==========

    /// Delete a key and its entire bucket, returning the removed values
    ///
    /// Fails with `KeyNotFound` (leaving the tree untouched) if the key
    /// is absent. Underflowing nodes borrow from a sibling when one has
    /// a key to spare, otherwise merge with one; the cascade may climb
    /// to the root and shrink the tree by one level.
    pub fn delete(&mut self, key: Key) -> BPlusTreeResult<Vec<V>> {
        let leaf_id = self.find_leaf(key).ok_or_else(|| {
            BPlusTreeError::InvariantViolation("descent reached no leaf".to_string())
        })?;

        let removed = self
            .leaf_mut(leaf_id)?
            .remove(key)
            .ok_or(BPlusTreeError::KeyNotFound(key))?;
        self.entry_count -= removed.len();

        let mut current = leaf_id;
        while current != self.root && self.node(current)?.is_underflow(self.order) {
            let parent_id = self.node(current)?.parent().ok_or_else(|| {
                BPlusTreeError::InvariantViolation(format!("non-root node {current} has no parent"))
            })?;
            let index = self.child_index(parent_id, current)?;

            let (left, right) = {
                let parent = self.internal(parent_id)?;
                (
                    index.checked_sub(1).map(|i| parent.children[i]),
                    parent.children.get(index + 1).copied(),
                )
            };
            let left_can_lend = match left {
                Some(id) => self.node(id)?.can_lend(self.order),
                None => false,
            };
            let right_can_lend = match right {
                Some(id) => self.node(id)?.can_lend(self.order),
                None => false,
            };

            match (left, right) {
                (Some(sibling_id), _) if left_can_lend => {
                    self.borrow_left(current, sibling_id, parent_id, index)?;
                }
                (_, Some(sibling_id)) if right_can_lend => {
                    self.borrow_right(current, sibling_id, parent_id, index)?;
                }
                (Some(sibling_id), _) => {
                    self.merge_nodes(sibling_id, current, parent_id, index - 1)?;
                }
                (_, Some(sibling_id)) => {
                    self.merge_nodes(current, sibling_id, parent_id, index)?;
                }
                (None, None) => {
                    return Err(BPlusTreeError::InvariantViolation(format!(
                        "node {current} has no sibling to rebalance with"
                    )));
                }
            }

            current = parent_id;
        }

        // A root left with a single child is discarded; the child is
        // promoted and the tree loses one level.
        let promoted = match self.node(self.root)? {
            Node::Internal(node) if node.children.len() == 1 => node.children.first().copied(),
            _ => None,
        };
        if let Some(child_id) = promoted {
            self.free_node(self.root);
            self.root = child_id;
            self.node_mut(child_id)?.set_parent(None);
        }

        Ok(removed)
    }

    /// Borrow one entry from the left sibling into an underflowing node
    ///
    /// For leaves the sibling's last key and bucket move over and the
    /// separator in the parent becomes the node's new first key. For
    /// internal nodes the rotation goes through the parent: separator
    /// down into the node, sibling's last key up into the parent, and
    /// the sibling's last child across (reparented).
    fn borrow_left(
        &mut self,
        node_id: NodeId,
        sibling_id: NodeId,
        parent_id: NodeId,
        index: usize,
    ) -> BPlusTreeResult<()> {
        if self.node(node_id)?.is_leaf() {
            let (key, bucket) = {
                let sibling = self.leaf_mut(sibling_id)?;
                match (sibling.keys.pop(), sibling.buckets.pop()) {
                    (Some(key), Some(bucket)) => (key, bucket),
                    _ => {
                        return Err(BPlusTreeError::InvariantViolation(format!(
                            "leaf {sibling_id} has nothing to lend"
                        )));
                    }
                }
            };
            {
                let leaf = self.leaf_mut(node_id)?;
                leaf.keys.insert(0, key);
                leaf.buckets.insert(0, bucket);
            }
            self.internal_mut(parent_id)?.keys[index - 1] = key;
        } else {
            let (sibling_key, child_id) = {
                let sibling = self.internal_mut(sibling_id)?;
                match (sibling.keys.pop(), sibling.children.pop()) {
                    (Some(key), Some(child)) => (key, child),
                    _ => {
                        return Err(BPlusTreeError::InvariantViolation(format!(
                            "node {sibling_id} has nothing to lend"
                        )));
                    }
                }
            };
            let separator = {
                let parent = self.internal_mut(parent_id)?;
                std::mem::replace(&mut parent.keys[index - 1], sibling_key)
            };
            {
                let node = self.internal_mut(node_id)?;
                node.keys.insert(0, separator);
                node.children.insert(0, child_id);
            }
            self.node_mut(child_id)?.set_parent(Some(node_id));
        }

        Ok(())
    }

    /// Borrow one entry from the right sibling into an underflowing
    /// node; mirror image of `borrow_left`
    fn borrow_right(
        &mut self,
        node_id: NodeId,
        sibling_id: NodeId,
        parent_id: NodeId,
        index: usize,
    ) -> BPlusTreeResult<()> {
        if self.node(node_id)?.is_leaf() {
            let (key, bucket, sibling_first) = {
                let sibling = self.leaf_mut(sibling_id)?;
                if sibling.is_empty() {
                    return Err(BPlusTreeError::InvariantViolation(format!(
                        "leaf {sibling_id} has nothing to lend"
                    )));
                }
                let key = sibling.keys.remove(0);
                let bucket = sibling.buckets.remove(0);
                let sibling_first = sibling.keys.first().copied();
                (key, bucket, sibling_first)
            };
            {
                let leaf = self.leaf_mut(node_id)?;
                leaf.keys.push(key);
                leaf.buckets.push(bucket);
            }
            let sibling_first = sibling_first.ok_or_else(|| {
                BPlusTreeError::InvariantViolation(format!("leaf {sibling_id} lent its only key"))
            })?;
            self.internal_mut(parent_id)?.keys[index] = sibling_first;
        } else {
            let (sibling_key, child_id) = {
                let sibling = self.internal_mut(sibling_id)?;
                if sibling.keys.is_empty() || sibling.children.is_empty() {
                    return Err(BPlusTreeError::InvariantViolation(format!(
                        "node {sibling_id} has nothing to lend"
                    )));
                }
                (sibling.keys.remove(0), sibling.children.remove(0))
            };
            let separator = {
                let parent = self.internal_mut(parent_id)?;
                std::mem::replace(&mut parent.keys[index], sibling_key)
            };
            {
                let node = self.internal_mut(node_id)?;
                node.keys.push(separator);
                node.children.push(child_id);
            }
            self.node_mut(child_id)?.set_parent(Some(node_id));
        }

        Ok(())
    }

    /// Merge a right node into its left sibling
    ///
    /// Removes the separator at `sep_idx` and the right child slot from
    /// the parent. Leaves splice keys and buckets and relink the leaf
    /// chain; internal nodes take the separator back between the two
    /// child runs and reparent the absorbed children.
    fn merge_nodes(
        &mut self,
        left_id: NodeId,
        right_id: NodeId,
        parent_id: NodeId,
        sep_idx: usize,
    ) -> BPlusTreeResult<()> {
        let separator = {
            let parent = self.internal_mut(parent_id)?;
            if sep_idx >= parent.keys.len() {
                return Err(BPlusTreeError::InvariantViolation(format!(
                    "separator index {sep_idx} out of range in parent {parent_id}"
                )));
            }
            parent.children.remove(sep_idx + 1);
            parent.keys.remove(sep_idx)
        };

        match self.take_node(right_id)? {
            Node::Leaf(LeafNode {
                keys,
                buckets,
                next,
                ..
            }) => {
                {
                    let left = self.leaf_mut(left_id)?;
                    left.keys.extend(keys);
                    left.buckets.extend(buckets);
                    left.next = next;
                }
                if let Some(next_id) = next {
                    self.leaf_mut(next_id)?.prev = Some(left_id);
                }
            }
            Node::Internal(InternalNode { keys, children, .. }) => {
                {
                    let left = self.internal_mut(left_id)?;
                    left.keys.push(separator);
                    left.keys.extend(keys);
                    left.children.extend(children.iter().copied());
                }
                for child_id in children {
                    self.node_mut(child_id)?.set_parent(Some(left_id));
                }
            }
        }

        Ok(())
    }

    // ========== Leaf Chain Traversal ==========

    /// Leftmost leaf (start of the ascending key order)
    pub fn first_leaf(&self) -> Option<NodeId> {
        let mut current = self.root;

        loop {
            match self.get_node(current)? {
                Node::Leaf(_) => return Some(current),
                Node::Internal(node) => current = *node.children.first()?,
            }
        }
    }

    /// Rightmost leaf (end of the ascending key order)
    pub fn last_leaf(&self) -> Option<NodeId> {
        let mut current = self.root;

        loop {
            match self.get_node(current)? {
                Node::Leaf(_) => return Some(current),
                Node::Internal(node) => current = *node.children.last()?,
            }
        }
    }

    /// Access a leaf by ID
    pub fn leaf(&self, id: NodeId) -> Option<&LeafNode<V>> {
        self.get_node(id)?.as_leaf()
    }

    /// Next leaf in key order
    pub fn next_leaf(&self, id: NodeId) -> Option<NodeId> {
        self.leaf(id)?.next
    }

    /// Previous leaf in key order
    pub fn prev_leaf(&self, id: NodeId) -> Option<NodeId> {
        self.leaf(id)?.prev
    }

    /// Iterate over all (key, value) pairs in ascending key order,
    /// values of one key in insertion order
    pub fn iter(&self) -> BPlusTreeIter<'_, V> {
        BPlusTreeIter::new(self)
    }
}

/// Iterator over tree entries, walking the leaf chain
pub struct BPlusTreeIter<'a, V> {
    tree: &'a BPlusTree<V>,
    current_leaf: Option<NodeId>,
    key_idx: usize,
    val_idx: usize,
}

impl<'a, V> BPlusTreeIter<'a, V> {
    fn new(tree: &'a BPlusTree<V>) -> Self {
        Self {
            tree,
            current_leaf: tree.first_leaf(),
            key_idx: 0,
            val_idx: 0,
        }
    }
}

impl<'a, V> Iterator for BPlusTreeIter<'a, V> {
    type Item = (Key, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf_id = self.current_leaf?;
            let leaf = self.tree.get_node(leaf_id)?.as_leaf()?;

            if self.key_idx < leaf.len() {
                let bucket = &leaf.buckets[self.key_idx];
                if self.val_idx < bucket.len() {
                    let item = (leaf.keys[self.key_idx], &bucket[self.val_idx]);
                    self.val_idx += 1;
                    return Some(item);
                }
                self.key_idx += 1;
                self.val_idx = 0;
                continue;
            }

            self.current_leaf = leaf.next;
            self.key_idx = 0;
            self.val_idx = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// Full structural audit: parent links, separator bounds, arity,
    /// occupancy, uniform leaf depth, and leaf-chain consistency.
    fn audit<V>(tree: &BPlusTree<V>) {
        let root = tree.root_node_id();
        let mut leaf_depths = Vec::new();
        let mut leaves_in_order = Vec::new();

        walk(
            tree,
            root,
            1,
            None,
            None,
            None,
            &mut leaf_depths,
            &mut leaves_in_order,
        );

        let first_depth = leaf_depths[0];
        assert!(
            leaf_depths.iter().all(|&d| d == first_depth),
            "leaves at mixed depths: {leaf_depths:?}"
        );

        // Leaf chain must visit exactly the leaves of the tree, left to
        // right, with consistent back links and ascending keys.
        let mut chained = Vec::new();
        let mut all_keys = Vec::new();
        let mut prev: Option<NodeId> = None;
        let mut current = tree.first_leaf();
        while let Some(id) = current {
            let leaf = tree.leaf(id).expect("chain points at a non-leaf");
            assert_eq!(leaf.prev, prev, "bad prev link on leaf {id}");
            chained.push(id);
            all_keys.extend(leaf.keys.iter().copied());
            prev = Some(id);
            current = leaf.next;
        }
        assert_eq!(chained, leaves_in_order, "leaf chain disagrees with tree order");
        assert_eq!(Some(*chained.last().unwrap()), tree.last_leaf());
        assert!(
            all_keys.windows(2).all(|w| w[0] < w[1]),
            "leaf chain keys not strictly ascending: {all_keys:?}"
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn walk<V>(
        tree: &BPlusTree<V>,
        id: NodeId,
        depth: usize,
        expected_parent: Option<NodeId>,
        low: Option<Key>,
        high: Option<Key>,
        leaf_depths: &mut Vec<usize>,
        leaves_in_order: &mut Vec<NodeId>,
    ) {
        let node = tree.get_node(id).expect("dangling node id");
        assert_eq!(node.parent(), expected_parent, "bad parent link on node {id}");

        let root = tree.root_node_id();
        let order = tree.order();
        assert!(node.key_count() <= order - 1, "node {id} over capacity");

        match node {
            Node::Internal(internal) => {
                assert_eq!(
                    internal.children.len(),
                    internal.keys.len() + 1,
                    "node {id} child/key arity broken"
                );
                assert!(
                    internal.keys.windows(2).all(|w| w[0] < w[1]),
                    "node {id} separators not ascending"
                );
                if id != root {
                    assert!(
                        internal.children.len() >= order.div_ceil(2),
                        "internal node {id} under-occupied"
                    );
                }
                for &key in &internal.keys {
                    if let Some(lo) = low {
                        assert!(key >= lo, "separator {key} below subtree bound {lo}");
                    }
                    if let Some(hi) = high {
                        assert!(key < hi, "separator {key} above subtree bound {hi}");
                    }
                }
                for (i, &child) in internal.children.iter().enumerate() {
                    let child_low = if i == 0 { low } else { Some(internal.keys[i - 1]) };
                    let child_high = internal.keys.get(i).copied().or(high);
                    walk(
                        tree,
                        child,
                        depth + 1,
                        Some(id),
                        child_low,
                        child_high,
                        leaf_depths,
                        leaves_in_order,
                    );
                }
            }
            Node::Leaf(leaf) => {
                assert_eq!(leaf.keys.len(), leaf.buckets.len());
                assert!(
                    leaf.keys.windows(2).all(|w| w[0] < w[1]),
                    "leaf {id} keys not ascending"
                );
                assert!(
                    leaf.buckets.iter().all(|b| !b.is_empty()),
                    "leaf {id} holds an empty bucket"
                );
                if id != root {
                    assert!(
                        leaf.keys.len() >= order / 2,
                        "leaf {id} under-occupied: {} keys",
                        leaf.keys.len()
                    );
                }
                for &key in &leaf.keys {
                    if let Some(lo) = low {
                        assert!(key >= lo, "leaf key {key} below subtree bound {lo}");
                    }
                    if let Some(hi) = high {
                        assert!(key < hi, "leaf key {key} above subtree bound {hi}");
                    }
                }
                leaf_depths.push(depth);
                leaves_in_order.push(id);
            }
        }
    }

    fn chain_keys<V>(tree: &BPlusTree<V>) -> Vec<Key> {
        let mut keys = Vec::new();
        let mut current = tree.first_leaf();
        while let Some(id) = current {
            let leaf = tree.leaf(id).unwrap();
            keys.extend(leaf.keys.iter().copied());
            current = leaf.next;
        }
        keys
    }

    #[test]
    fn test_new_tree() {
        let tree: BPlusTree<i64> = BPlusTree::new(4).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.order(), 4);
        assert!(tree.get_node(tree.root_node_id()).unwrap().is_leaf());
    }

    #[test]
    fn test_invalid_order() {
        for order in [0, 1, 2] {
            assert!(matches!(
                BPlusTree::<i64>::new(order),
                Err(BPlusTreeError::InvalidOrder(o)) if o == order
            ));
        }
    }

    #[test]
    fn test_single_insert_and_retrieve() {
        let mut tree = BPlusTree::new(4).unwrap();

        tree.insert(42, 420).unwrap();

        assert_eq!(tree.len(), 1);
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.retrieve(42), Some(&[420][..]));
        assert_eq!(tree.retrieve(41), None);
    }

    #[test]
    fn test_multimap_bucket_preserves_insertion_order() {
        let mut tree = BPlusTree::new(4).unwrap();

        tree.insert(5, "a").unwrap();
        tree.insert(5, "b").unwrap();

        assert_eq!(tree.retrieve(5), Some(&["a", "b"][..]));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_root_leaf_split_creates_one_key_root() {
        let mut tree = BPlusTree::new(3).unwrap();

        tree.insert(10, 10).unwrap();
        tree.insert(20, 20).unwrap();
        assert_eq!(tree.height(), 1);

        // Third distinct key pushes the leaf to `order` keys and splits it.
        tree.insert(5, 5).unwrap();
        assert_eq!(tree.height(), 2);

        let root = tree
            .get_node(tree.root_node_id())
            .unwrap()
            .as_internal()
            .expect("root should be internal after the split");
        assert_eq!(root.keys.len(), 1);
        assert_eq!(root.children.len(), 2);
        audit(&tree);
    }

    #[test]
    fn test_order_three_insert_sequence() {
        let mut tree = BPlusTree::new(3).unwrap();

        for key in [10, 20, 5, 6, 12, 30, 7, 17] {
            tree.insert(key, key).unwrap();
            audit(&tree);
        }

        assert_eq!(tree.retrieve(12), Some(&[12][..]));
        assert_eq!(tree.retrieve(99), None);
        assert_eq!(chain_keys(&tree), vec![5, 6, 7, 10, 12, 17, 20, 30]);
    }

    #[test]
    fn test_cascading_splits_grow_height() {
        let mut tree = BPlusTree::new(3).unwrap();

        for key in 0..30 {
            tree.insert(key, key).unwrap();
            audit(&tree);
        }

        assert!(tree.height() >= 3);
        for key in 0..30 {
            assert_eq!(tree.retrieve(key), Some(&[key][..]));
        }
        assert_eq!(chain_keys(&tree), (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn test_interleaved_inserts_keep_chain_sorted() {
        let mut tree = BPlusTree::new(4).unwrap();

        // Deterministic scramble of 0..200
        let keys: Vec<Key> = (0..200).map(|i| (i * 67) % 200).collect();
        for &key in &keys {
            tree.insert(key, key * 2).unwrap();
        }
        audit(&tree);

        assert_eq!(chain_keys(&tree), (0..200).collect::<Vec<_>>());
        for key in 0..200 {
            assert_eq!(tree.retrieve(key), Some(&[key * 2][..]));
        }
    }

    #[test]
    fn test_iterator_sorted_with_duplicates() {
        let mut tree = BPlusTree::new(3).unwrap();

        for key in [8, 3, 5, 3, 9, 5, 3] {
            tree.insert(key, key * 10).unwrap();
        }

        let entries: Vec<(Key, i64)> = tree.iter().map(|(k, &v)| (k, v)).collect();
        assert_eq!(
            entries,
            vec![(3, 30), (3, 30), (3, 30), (5, 50), (5, 50), (8, 80), (9, 90)]
        );
    }

    #[test]
    fn test_delete_from_root_leaf() {
        let mut tree = BPlusTree::new(4).unwrap();

        tree.insert(1, "one").unwrap();
        tree.insert(2, "two").unwrap();

        assert_eq!(tree.delete(1).unwrap(), vec!["one"]);
        assert_eq!(tree.retrieve(1), None);
        assert_eq!(tree.retrieve(2), Some(&["two"][..]));

        // Root leaf has no minimum occupancy; it may empty out entirely.
        assert_eq!(tree.delete(2).unwrap(), vec!["two"]);
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 1);

        tree.insert(3, "three").unwrap();
        assert_eq!(tree.retrieve(3), Some(&["three"][..]));
    }

    #[test]
    fn test_delete_removes_entire_bucket() {
        let mut tree = BPlusTree::new(4).unwrap();

        tree.insert(5, "a").unwrap();
        tree.insert(5, "b").unwrap();
        tree.insert(7, "g").unwrap();

        assert_eq!(tree.delete(5).unwrap(), vec!["a", "b"]);
        assert_eq!(tree.retrieve(5), None);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_delete_not_found_leaves_tree_unchanged() {
        let mut tree = BPlusTree::new(3).unwrap();

        for key in [10, 20, 5, 6, 12] {
            tree.insert(key, key).unwrap();
        }
        let before = chain_keys(&tree);
        let len_before = tree.len();

        assert!(matches!(
            tree.delete(99),
            Err(BPlusTreeError::KeyNotFound(99))
        ));
        assert_eq!(chain_keys(&tree), before);
        assert_eq!(tree.len(), len_before);
        audit(&tree);
    }

    #[test]
    fn test_delete_four_from_seven_stays_balanced() {
        let mut tree = BPlusTree::new(3).unwrap();

        for key in 1..=7 {
            tree.insert(key, key).unwrap();
        }

        assert_eq!(tree.delete(4).unwrap(), vec![4]);
        audit(&tree);

        assert_eq!(tree.retrieve(4), None);
        for key in [1, 2, 3, 5, 6, 7] {
            assert_eq!(tree.retrieve(key), Some(&[key][..]));
        }
        assert_eq!(chain_keys(&tree), vec![1, 2, 3, 5, 6, 7]);
    }

    #[test]
    fn test_delete_borrows_from_right_sibling() {
        let mut tree = BPlusTree::new(3).unwrap();

        // Leaves [1] | [2,3] under root [2]; deleting 1 empties the left
        // leaf and the right sibling has a key to spare.
        for key in 1..=3 {
            tree.insert(key, key).unwrap();
        }

        tree.delete(1).unwrap();
        audit(&tree);
        assert_eq!(chain_keys(&tree), vec![2, 3]);
        assert_eq!(tree.height(), 2);
    }

    #[test]
    fn test_delete_borrows_from_left_sibling() {
        let mut tree = BPlusTree::new(3).unwrap();

        // Build leaves [0,1] | [3] | [4] under root [2,4], then empty the
        // middle leaf; only the left sibling can lend.
        for key in [1, 2, 3, 4] {
            tree.insert(key, key).unwrap();
        }
        tree.delete(2).unwrap();
        tree.insert(0, 0).unwrap();
        audit(&tree);

        tree.delete(3).unwrap();
        audit(&tree);
        assert_eq!(chain_keys(&tree), vec![0, 1, 4]);
        for key in [0, 1, 4] {
            assert_eq!(tree.retrieve(key), Some(&[key][..]));
        }
    }

    #[test]
    fn test_delete_merges_and_collapses_root() {
        let mut tree = BPlusTree::new(3).unwrap();

        for key in 1..=4 {
            tree.insert(key, key).unwrap();
        }
        assert_eq!(tree.height(), 2);

        for key in 1..=3 {
            tree.delete(key).unwrap();
            audit(&tree);
        }

        assert_eq!(tree.height(), 1);
        assert_eq!(tree.retrieve(4), Some(&[4][..]));
        assert_eq!(chain_keys(&tree), vec![4]);
    }

    #[test]
    fn test_delete_then_retrieve_absent() {
        let mut tree = BPlusTree::new(5).unwrap();

        for key in 0..50 {
            tree.insert(key, key).unwrap();
        }
        for key in (0..50).step_by(3) {
            assert_eq!(tree.delete(key).unwrap(), vec![key]);
            assert_eq!(tree.retrieve(key), None);
            audit(&tree);
        }
        for key in 0..50 {
            if key % 3 == 0 {
                assert_eq!(tree.retrieve(key), None);
            } else {
                assert_eq!(tree.retrieve(key), Some(&[key][..]));
            }
        }
    }

    #[test]
    fn test_sequential_fill_and_drain_even_order() {
        // Order 4 exercises the ceil(m/2) internal minimum.
        let mut tree = BPlusTree::new(4).unwrap();

        for key in 0..100 {
            tree.insert(key, key).unwrap();
        }
        audit(&tree);

        for key in 0..100 {
            tree.delete(key).unwrap();
            audit(&tree);
        }

        assert!(tree.is_empty());
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn test_reverse_drain() {
        let mut tree = BPlusTree::new(3).unwrap();

        for key in 0..60 {
            tree.insert(key, key).unwrap();
        }
        for key in (0..60).rev() {
            tree.delete(key).unwrap();
            audit(&tree);
        }
        assert!(tree.is_empty());
    }

    #[test]
    fn test_traversal_interface_round_trip() {
        let mut tree = BPlusTree::new(3).unwrap();

        for key in 0..20 {
            tree.insert(key, key).unwrap();
        }

        // Forward walk via next links
        let mut forward = Vec::new();
        let mut current = tree.first_leaf();
        while let Some(id) = current {
            forward.push(id);
            current = tree.next_leaf(id);
        }

        // Backward walk via prev links must mirror it
        let mut backward = Vec::new();
        let mut current = tree.last_leaf();
        while let Some(id) = current {
            backward.push(id);
            current = tree.prev_leaf(id);
        }
        backward.reverse();

        assert_eq!(forward, backward);
        assert!(forward.len() > 1);
    }

    #[test]
    fn test_mixed_workload_against_oracle() {
        let mut tree = BPlusTree::new(5).unwrap();
        let mut oracle: BTreeMap<Key, Vec<i64>> = BTreeMap::new();

        // Deterministic pseudo-random workload
        let mut state: u64 = 0x9E3779B97F4A7C15;
        let mut next = move || {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            state >> 33
        };

        for step in 0..2000 {
            let key = (next() % 120) as Key;
            if next() % 3 != 0 {
                let value = step as i64;
                tree.insert(key, value).unwrap();
                oracle.entry(key).or_default().push(value);
            } else {
                match tree.delete(key) {
                    Ok(removed) => {
                        let expected = oracle.remove(&key).expect("tree had a key the oracle lacks");
                        assert_eq!(removed, expected);
                    }
                    Err(BPlusTreeError::KeyNotFound(k)) => {
                        assert_eq!(k, key);
                        assert!(!oracle.contains_key(&key));
                    }
                    Err(e) => panic!("unexpected delete error: {e}"),
                }
            }

            if step % 50 == 0 {
                audit(&tree);
            }
        }
        audit(&tree);

        assert_eq!(chain_keys(&tree), oracle.keys().copied().collect::<Vec<_>>());
        for (&key, bucket) in &oracle {
            assert_eq!(tree.retrieve(key), Some(&bucket[..]));
        }
        assert_eq!(tree.len(), oracle.values().map(Vec::len).sum::<usize>());
    }
}
