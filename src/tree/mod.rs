//! In-memory B+ tree index.
//!
//! The tree is the long-lived index that absorbs flushed memtable batches;
//! it is the authoritative source for every key not currently in the
//! memtable. A Bloom filter in front of it short-circuits lookups for keys
//! that were never inserted.
//!
//! ## Shape
//!
//! - All values live in leaves; internal nodes carry separators only.
//! - Leaves are chained left-to-right through sibling links.
//! - Insertion splits full nodes upward; deletion removes from the leaf
//!   only, so nodes may become under-filled but the ordering invariants
//!   always hold.
//! - Routing: in a node with separators k1..km, a key descends into child
//!   i with ki <= key < k(i+1); equality routes right, which pairs with
//!   the split rule that promotes the first key of the right half.

mod node;

use crate::error::{Error, Result};
use crate::filter::BloomFilter;
use node::{Node, NodeId};

/// B+ tree over string keys with a Bloom filter gate on lookups.
pub struct Tree {
    /// Node arena; ids are indices into this vector. Slots emptied by
    /// deletion are not reclaimed until the tree itself is dropped.
    nodes: Vec<Node>,
    root: Option<NodeId>,
    max_keys: usize,
    filter: BloomFilter,
    /// When set, `find` does not consult the filter. Held during WAL
    /// replay and memtable flushes.
    skip_filter: bool,
}

impl Tree {
    /// Creates an empty tree.
    ///
    /// `max_keys` bounds the number of keys per node; `filter_keys` and
    /// `filter_fp_rate` size the Bloom filter.
    pub fn new(max_keys: usize, filter_keys: usize, filter_fp_rate: f64) -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            max_keys,
            filter: BloomFilter::new(filter_keys, filter_fp_rate),
            skip_filter: false,
        }
    }

    /// Sets whether `find` bypasses the Bloom filter.
    pub fn set_skip_filter(&mut self, skip: bool) {
        self.skip_filter = skip;
    }

    /// Inserts a key-value pair, overwriting in place if the key exists.
    pub fn insert(&mut self, key: String, value: Vec<u8>) -> Result<()> {
        self.filter.add(&key);

        let Some(root) = self.root else {
            let id = self.alloc(Node::new_leaf());
            self.nodes[id].keys.push(key);
            self.nodes[id].values.push(value);
            self.root = Some(id);
            return Ok(());
        };

        let leaf = self.find_leaf(root, &key)?;
        match self.nodes[leaf].keys.binary_search(&key) {
            Ok(pos) => {
                // Same slot, same position; never splits.
                self.nodes[leaf].values[pos] = value;
                Ok(())
            }
            Err(pos) => {
                if !self.nodes[leaf].is_full(self.max_keys) {
                    self.nodes[leaf].keys.insert(pos, key);
                    self.nodes[leaf].values.insert(pos, value);
                    Ok(())
                } else {
                    self.insert_into_leaf_after_splitting(leaf, pos, key, value)
                }
            }
        }
    }

    /// Looks up a key.
    ///
    /// Returns [`Error::NotFound`] if the key is absent or the filter
    /// rules it out.
    pub fn find(&self, key: &str) -> Result<Vec<u8>> {
        if !self.skip_filter && !self.filter.may_contain(key) {
            return Err(Error::NotFound);
        }

        let Some(root) = self.root else {
            return Err(Error::NotFound);
        };

        let leaf = self.find_leaf(root, key)?;
        let node = &self.nodes[leaf];
        match node.keys.binary_search_by(|k| k.as_str().cmp(key)) {
            Ok(pos) => Ok(node.values[pos].clone()),
            Err(_) => Err(Error::NotFound),
        }
    }

    /// Removes a key from its leaf.
    ///
    /// Removal is leaf-local: no borrowing or merging, so repeated
    /// deletions can leave nodes under-filled. The Bloom filter cannot
    /// unlearn a single key, so it is reset and rebuilt from the
    /// surviving keys.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        let Some(root) = self.root else {
            return Err(Error::NotFound);
        };

        let leaf = self.find_leaf(root, key)?;
        let node = &mut self.nodes[leaf];
        match node.keys.binary_search_by(|k| k.as_str().cmp(key)) {
            Ok(pos) => {
                node.keys.remove(pos);
                node.values.remove(pos);
                self.rebuild_filter();
                Ok(())
            }
            Err(_) => Err(Error::NotFound),
        }
    }

    /// All keys in ascending order, collected along the leaf chain.
    pub fn list(&self) -> Vec<String> {
        let mut keys = Vec::new();
        let mut current = self.leftmost_leaf();
        while let Some(id) = current {
            let node = &self.nodes[id];
            keys.extend(node.keys.iter().cloned());
            current = node.next;
        }
        keys
    }

    /// Returns `true` if the tree holds no keys.
    pub fn is_empty(&self) -> bool {
        self.list().is_empty()
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn find_leaf(&self, start: NodeId, key: &str) -> Result<NodeId> {
        let mut current = start;
        loop {
            let node = &self.nodes[current];
            if node.is_leaf {
                return Ok(current);
            }
            let idx = node.child_index(key);
            current = *node
                .children
                .get(idx)
                .ok_or_else(|| Error::internal("routing reached an internal node with a missing child"))?;
        }
    }

    fn leftmost_leaf(&self) -> Option<NodeId> {
        let mut current = self.root?;
        loop {
            let node = &self.nodes[current];
            if node.is_leaf {
                return Some(current);
            }
            current = *node.children.first()?;
        }
    }

    /// Splits a full leaf around the insertion of `key` at `pos` and
    /// pushes the first key of the new right sibling up to the parent.
    fn insert_into_leaf_after_splitting(
        &mut self,
        leaf: NodeId,
        pos: usize,
        key: String,
        value: Vec<u8>,
    ) -> Result<()> {
        let (mut temp_keys, mut temp_values, old_next, parent) = {
            let node = &mut self.nodes[leaf];
            (
                std::mem::take(&mut node.keys),
                std::mem::take(&mut node.values),
                node.next,
                node.parent,
            )
        };
        temp_keys.insert(pos, key);
        temp_values.insert(pos, value);

        // max_keys + 1 entries split at the midpoint; the right half's
        // first key becomes the promoted separator.
        let split = temp_keys.len() / 2;
        let right_keys = temp_keys.split_off(split);
        let right_values = temp_values.split_off(split);
        let promoted = right_keys[0].clone();

        let right = self.alloc(Node::new_leaf());
        {
            let node = &mut self.nodes[right];
            node.keys = right_keys;
            node.values = right_values;
            node.next = old_next;
            node.parent = parent;
        }
        {
            let node = &mut self.nodes[leaf];
            node.keys = temp_keys;
            node.values = temp_values;
            node.next = Some(right);
        }

        self.insert_into_parent(leaf, promoted, right)
    }

    /// Hangs `right` (with separator `key`) next to `left` in the parent,
    /// splitting upward as needed.
    fn insert_into_parent(&mut self, left: NodeId, key: String, right: NodeId) -> Result<()> {
        let Some(parent) = self.nodes[left].parent else {
            let root = self.alloc(Node::new_internal());
            self.nodes[root].keys.push(key);
            self.nodes[root].children.push(left);
            self.nodes[root].children.push(right);
            self.nodes[left].parent = Some(root);
            self.nodes[right].parent = Some(root);
            self.root = Some(root);
            return Ok(());
        };

        let left_index = self.nodes[parent]
            .children
            .iter()
            .position(|&c| c == left)
            .ok_or_else(|| Error::internal("split child lost its parent back-reference"))?;

        if !self.nodes[parent].is_full(self.max_keys) {
            self.nodes[parent].keys.insert(left_index, key);
            self.nodes[parent].children.insert(left_index + 1, right);
            self.nodes[right].parent = Some(parent);
            return Ok(());
        }

        self.insert_into_internal_after_splitting(parent, left_index, key, right)
    }

    /// Splits a full internal node around the insertion of `key` /
    /// `right_child`, promoting the middle separator.
    fn insert_into_internal_after_splitting(
        &mut self,
        node: NodeId,
        left_index: usize,
        key: String,
        right_child: NodeId,
    ) -> Result<()> {
        // The inserted child starts out under the node being split; if it
        // lands in the new right half it is re-pointed below.
        self.nodes[right_child].parent = Some(node);

        let (mut temp_keys, mut temp_children, parent) = {
            let n = &mut self.nodes[node];
            (std::mem::take(&mut n.keys), std::mem::take(&mut n.children), n.parent)
        };
        temp_keys.insert(left_index, key);
        temp_children.insert(left_index + 1, right_child);

        // temp_keys has max_keys + 1 separators; the one at split - 1 is
        // promoted, the left half keeps split - 1 keys and split children.
        let split = temp_keys.len() / 2;
        let promoted = temp_keys[split - 1].clone();
        let right_keys = temp_keys.split_off(split);
        temp_keys.truncate(split - 1);
        let right_children = temp_children.split_off(split);

        {
            let n = &mut self.nodes[node];
            n.keys = temp_keys;
            n.children = temp_children;
        }

        let new_node = self.alloc(Node::new_internal());
        {
            let n = &mut self.nodes[new_node];
            n.keys = right_keys;
            n.children = right_children;
            n.parent = parent;
        }

        let moved: Vec<NodeId> = self.nodes[new_node].children.clone();
        for child in moved {
            self.nodes[child].parent = Some(new_node);
        }

        self.insert_into_parent(node, promoted, new_node)
    }

    fn rebuild_filter(&mut self) {
        self.filter.clear();
        let mut current = self.leftmost_leaf();
        while let Some(id) = current {
            let node = &self.nodes[id];
            for key in &node.keys {
                self.filter.add(key);
            }
            current = node.next;
        }
    }
}
