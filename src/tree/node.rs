use super::Key;

/// Node identifier (index into the tree's node storage)
pub type NodeId = usize;

/// Internal node: routes search, never stores payload values
///
/// Classic separator layout:
/// - `children.len() == keys.len() + 1`
/// - all keys in `children[i]` are < `keys[i]`; the last child holds
///   keys >= the last separator
#[derive(Debug, Clone)]
pub struct InternalNode {
    /// Separator keys (strictly ascending)
    pub keys: Vec<Key>,
    /// Child node IDs, one more than keys
    pub children: Vec<NodeId>,
    /// Parent node ID (None only for the root)
    pub parent: Option<NodeId>,
}

impl InternalNode {
    /// Create a new internal node with given keys and children
    pub fn new(keys: Vec<Key>, children: Vec<NodeId>, parent: Option<NodeId>) -> Self {
        debug_assert_eq!(children.len(), keys.len() + 1);
        Self {
            keys,
            children,
            parent,
        }
    }

    /// Find the child index whose subtree may contain the key:
    /// the first index i with key < keys[i], or the last child if
    /// the key is >= all separators
    pub fn find_child_index(&self, key: Key) -> usize {
        self.keys
            .iter()
            .position(|&k| key < k)
            .unwrap_or(self.keys.len())
    }
}

/// Leaf node: stores keys mapped to non-empty value buckets,
/// doubly linked to sibling leaves in global key order
#[derive(Debug, Clone)]
pub struct LeafNode<V> {
    /// Keys (strictly ascending, no duplicates)
    pub keys: Vec<Key>,
    /// One bucket of values per key, in insertion order (multimap)
    pub buckets: Vec<Vec<V>>,
    /// Parent node ID (None only for the root)
    pub parent: Option<NodeId>,
    /// Previous leaf in key order
    pub prev: Option<NodeId>,
    /// Next leaf in key order
    pub next: Option<NodeId>,
}

impl<V> LeafNode<V> {
    /// Create a new empty leaf node
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            buckets: Vec::new(),
            parent: None,
            prev: None,
            next: None,
        }
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if leaf is empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Add a key-value pair, keeping keys strictly ascending
    ///
    /// An existing key accumulates the value at the end of its bucket;
    /// a new key gets a singleton bucket at the sorted position.
    /// Overflow is detected and handled by the caller.
    pub fn add(&mut self, key: Key, value: V) {
        match self.keys.iter().position(|&k| key <= k) {
            Some(i) if self.keys[i] == key => self.buckets[i].push(value),
            Some(i) => {
                self.keys.insert(i, key);
                self.buckets.insert(i, vec![value]);
            }
            None => {
                self.keys.push(key);
                self.buckets.push(vec![value]);
            }
        }
    }

    /// Get the bucket for an exact key match
    pub fn get(&self, key: Key) -> Option<&[V]> {
        let i = self.keys.iter().position(|&k| k == key)?;
        Some(&self.buckets[i])
    }

    /// Remove a key and its entire bucket, returning the bucket
    pub fn remove(&mut self, key: Key) -> Option<Vec<V>> {
        let i = self.keys.iter().position(|&k| k == key)?;
        self.keys.remove(i);
        Some(self.buckets.remove(i))
    }
}

impl<V> Default for LeafNode<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// B+ tree node (either internal or leaf)
#[derive(Debug, Clone)]
pub enum Node<V> {
    Internal(InternalNode),
    Leaf(LeafNode<V>),
}

impl<V> Node<V> {
    /// Check if this is a leaf node
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    /// Number of keys held by the node
    pub fn key_count(&self) -> usize {
        match self {
            Node::Internal(node) => node.keys.len(),
            Node::Leaf(node) => node.keys.len(),
        }
    }

    /// Parent node ID
    pub fn parent(&self) -> Option<NodeId> {
        match self {
            Node::Internal(node) => node.parent,
            Node::Leaf(node) => node.parent,
        }
    }

    /// Set the parent node ID
    pub fn set_parent(&mut self, parent: Option<NodeId>) {
        match self {
            Node::Internal(node) => node.parent = parent,
            Node::Leaf(node) => node.parent = parent,
        }
    }

    /// Check if the node holds too little for the given order: a leaf
    /// below floor(order / 2) keys, an internal node below ceil(order / 2)
    /// children. The root is exempt, but that exemption is the tree's
    /// to apply.
    pub fn is_underflow(&self, order: usize) -> bool {
        match self {
            Node::Leaf(node) => node.keys.len() < order / 2,
            Node::Internal(node) => node.children.len() < order.div_ceil(2),
        }
    }

    /// Check if the node can lend one entry to an underflowing sibling
    /// without dropping below its own minimum
    pub fn can_lend(&self, order: usize) -> bool {
        match self {
            Node::Leaf(node) => node.keys.len() > order / 2,
            Node::Internal(node) => node.children.len() > order.div_ceil(2),
        }
    }

    /// Get as internal node reference
    pub fn as_internal(&self) -> Option<&InternalNode> {
        match self {
            Node::Internal(node) => Some(node),
            Node::Leaf(_) => None,
        }
    }

    /// Get as internal node mutable reference
    pub fn as_internal_mut(&mut self) -> Option<&mut InternalNode> {
        match self {
            Node::Internal(node) => Some(node),
            Node::Leaf(_) => None,
        }
    }

    /// Get as leaf node reference
    pub fn as_leaf(&self) -> Option<&LeafNode<V>> {
        match self {
            Node::Internal(_) => None,
            Node::Leaf(node) => Some(node),
        }
    }

    /// Get as leaf node mutable reference
    pub fn as_leaf_mut(&mut self) -> Option<&mut LeafNode<V>> {
        match self {
            Node::Internal(_) => None,
            Node::Leaf(node) => Some(node),
        }
    }
}
