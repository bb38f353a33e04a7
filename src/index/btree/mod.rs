//! B-tree index.
//!
//! A classic B-tree of order M (at most M children per node) whose nodes
//! live in a flat arena and refer to each other by index. Values are stored
//! next to their keys in every node, internal ones included.
//!
//! - [`BTree`] - The single-threaded tree
//! - [`BTreeBackend`] - The tree behind a lock, as a [`StorageBackend`](super::StorageBackend)
//! - [`save_tree`] / [`load_tree`] - Page-oriented persistence through the buffer pool
//! - [`release_tree`] / [`relink_tree`] - Freeing and renumbering a saved tree's pages
//! - [`PagedBTree`] - A backend that checkpoints the tree into a page store

mod backend;
mod durable;
mod node;
mod paging;

pub use backend::BTreeBackend;
pub use durable::PagedBTree;
pub use node::{Node, NodeId};
pub use paging::{load_tree, relink_tree, release_tree, save_tree, tree_pages};

use crate::common::{Error, Result};

/// Promoted median plus the new right sibling.
type Split = (Vec<u8>, Vec<u8>, NodeId);

/// A B-tree mapping byte keys to byte values.
///
/// # Invariants
/// - keys inside a node are strictly increasing
/// - every non-root node holds between `ceil(M/2) - 1` and `M - 1` keys
/// - internal nodes have one more child than keys
/// - all leaves are at the same depth
///
/// A node that reaches M keys splits: the left half keeps `floor(M/2)`
/// keys, the median moves up, the right half takes the rest. Deletion
/// refills underfull nodes by borrowing from a sibling or merging with one.
///
/// # Example
/// ```
/// use tierdb::index::btree::BTree;
///
/// let mut tree = BTree::new(3).unwrap();
/// for i in 0..20u8 {
///     tree.insert(vec![i], vec![i * 2]);
/// }
/// assert_eq!(tree.get(&[7]), Some(&[14u8][..]));
/// assert!(tree.height() > 1);
/// assert!(tree.check_invariants().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct BTree {
    pub(crate) nodes: Vec<Node>,
    free_slots: Vec<NodeId>,
    pub(crate) root: NodeId,
    order: usize,
    len: usize,
}

impl BTree {
    /// Create an empty tree of the given order.
    ///
    /// # Errors
    /// `InvalidConfig` if `order < 3`.
    pub fn new(order: usize) -> Result<Self> {
        if order < 3 {
            return Err(Error::InvalidConfig(format!(
                "btree order must be >= 3, got {}",
                order
            )));
        }
        Ok(Self {
            nodes: vec![Node::leaf()],
            free_slots: Vec::new(),
            root: 0,
            order,
            len: 0,
        })
    }

    /// Build a tree from an already-linked arena. Used by page loading.
    pub(crate) fn from_arena(nodes: Vec<Node>, root: NodeId, order: usize) -> Result<Self> {
        let mut tree = Self::new(order)?;
        tree.len = nodes.iter().map(Node::key_count).sum();
        tree.nodes = nodes;
        tree.root = root;
        Ok(tree)
    }

    #[inline]
    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of key/value pairs.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of levels; a lone root leaf has height 1.
    pub fn height(&self) -> usize {
        let mut height = 1;
        let mut node = self.root;
        while !self.nodes[node].is_leaf {
            node = self.nodes[node].children[0];
            height += 1;
        }
        height
    }

    /// Smallest key count allowed in a non-root node.
    #[inline]
    fn min_keys(&self) -> usize {
        self.order.div_ceil(2) - 1
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let mut id = self.root;
        loop {
            let node = &self.nodes[id];
            match node.search(key) {
                Ok(i) => return Some(&node.values[i]),
                Err(_) if node.is_leaf => return None,
                Err(i) => id = node.children[i],
            }
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Every pair with `lo <= key <= hi`, in key order.
    pub fn range(&self, lo: &[u8], hi: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.scan(lo, Some(hi))
    }

    /// Every pair with `lo <= key`, and `key <= hi` when `hi` is given.
    pub fn scan(&self, lo: &[u8], hi: Option<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        if hi.map_or(true, |hi| lo <= hi) {
            self.collect_range(self.root, lo, hi, &mut out);
        }
        out
    }

    fn collect_range(&self, id: NodeId, lo: &[u8], hi: Option<&[u8]>, out: &mut Vec<(Vec<u8>, Vec<u8>)>) {
        let node = &self.nodes[id];
        let n = node.keys.len();

        for i in 0..=n {
            // children[i] holds keys in (keys[i-1], keys[i])
            let below_hi = i == 0 || hi.map_or(true, |hi| node.keys[i - 1].as_slice() < hi);
            let above_lo = i == n || node.keys[i].as_slice() > lo;
            if !node.is_leaf && below_hi && above_lo {
                self.collect_range(node.children[i], lo, hi, out);
            }
            if i == n {
                break;
            }

            let key = node.keys[i].as_slice();
            if hi.map_or(false, |hi| key > hi) {
                break;
            }
            if key >= lo {
                out.push((node.keys[i].clone(), node.values[i].clone()));
            }
        }
    }

    /// All pairs in key order.
    pub fn entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::with_capacity(self.len);
        self.collect_all(self.root, &mut out);
        out
    }

    fn collect_all(&self, id: NodeId, out: &mut Vec<(Vec<u8>, Vec<u8>)>) {
        let node = &self.nodes[id];
        for i in 0..node.keys.len() {
            if !node.is_leaf {
                self.collect_all(node.children[i], out);
            }
            out.push((node.keys[i].clone(), node.values[i].clone()));
        }
        if let Some(&last) = node.children.last() {
            self.collect_all(last, out);
        }
    }

    // ========================================================================
    // Insert
    // ========================================================================

    /// Insert or replace. Returns the previous value.
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Option<Vec<u8>> {
        let (old, split) = self.insert_into(self.root, key, value);

        if let Some((median_key, median_value, right)) = split {
            let mut root = Node::internal();
            root.keys.push(median_key);
            root.values.push(median_value);
            root.children = vec![self.root, right];
            self.root = self.alloc(root);
        }
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    fn insert_into(
        &mut self,
        id: NodeId,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> (Option<Vec<u8>>, Option<Split>) {
        let pos = match self.nodes[id].search(&key) {
            Ok(i) => {
                let old = std::mem::replace(&mut self.nodes[id].values[i], value);
                return (Some(old), None);
            }
            Err(i) => i,
        };

        if self.nodes[id].is_leaf {
            let node = &mut self.nodes[id];
            node.keys.insert(pos, key);
            node.values.insert(pos, value);
        } else {
            let child = self.nodes[id].children[pos];
            let (old, split) = self.insert_into(child, key, value);
            match split {
                Some((median_key, median_value, right)) => {
                    let node = &mut self.nodes[id];
                    node.keys.insert(pos, median_key);
                    node.values.insert(pos, median_value);
                    node.children.insert(pos + 1, right);
                }
                None => return (old, None),
            }
        }

        if self.nodes[id].keys.len() >= self.order {
            (None, Some(self.split(id)))
        } else {
            (None, None)
        }
    }

    /// Split an overflowing node, returning the median and the new right node.
    fn split(&mut self, id: NodeId) -> Split {
        let node = &mut self.nodes[id];
        let mid = node.keys.len() / 2;

        let mut right = Node {
            keys: node.keys.split_off(mid + 1),
            values: node.values.split_off(mid + 1),
            children: Vec::new(),
            is_leaf: node.is_leaf,
        };
        if !node.is_leaf {
            right.children = node.children.split_off(mid + 1);
        }

        let median_key = node.keys.pop().unwrap_or_default();
        let median_value = node.values.pop().unwrap_or_default();
        let right = self.alloc(right);
        (median_key, median_value, right)
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Remove a key. Returns its value if it was present.
    pub fn remove(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let removed = self.remove_from(self.root, key);

        let root = &self.nodes[self.root];
        if root.keys.is_empty() && !root.is_leaf {
            let old_root = self.root;
            self.root = root.children[0];
            self.release(old_root);
        }
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    fn remove_from(&mut self, id: NodeId, key: &[u8]) -> Option<Vec<u8>> {
        match self.nodes[id].search(key) {
            Ok(i) if self.nodes[id].is_leaf => {
                let node = &mut self.nodes[id];
                node.keys.remove(i);
                Some(node.values.remove(i))
            }
            Ok(i) => {
                // Replace with the in-order predecessor from the left subtree
                let child = self.nodes[id].children[i];
                let (pred_key, pred_value) = self.remove_max(child);
                let node = &mut self.nodes[id];
                node.keys[i] = pred_key;
                let old = std::mem::replace(&mut node.values[i], pred_value);
                self.fix_underflow(id, i);
                Some(old)
            }
            Err(_) if self.nodes[id].is_leaf => None,
            Err(i) => {
                let child = self.nodes[id].children[i];
                let removed = self.remove_from(child, key);
                if removed.is_some() {
                    self.fix_underflow(id, i);
                }
                removed
            }
        }
    }

    /// Remove and return the largest pair of the subtree rooted at `id`.
    fn remove_max(&mut self, id: NodeId) -> (Vec<u8>, Vec<u8>) {
        if self.nodes[id].is_leaf {
            let node = &mut self.nodes[id];
            let key = node.keys.pop().unwrap_or_default();
            let value = node.values.pop().unwrap_or_default();
            return (key, value);
        }

        let last = self.nodes[id].children.len() - 1;
        let child = self.nodes[id].children[last];
        let pair = self.remove_max(child);
        self.fix_underflow(id, last);
        pair
    }

    /// Restore the minimum key count of `parent.children[i]`.
    fn fix_underflow(&mut self, parent: NodeId, i: usize) {
        let min = self.min_keys();
        let child = self.nodes[parent].children[i];
        if self.nodes[child].keys.len() >= min {
            return;
        }

        let siblings = self.nodes[parent].children.len();
        if i > 0 {
            let left = self.nodes[parent].children[i - 1];
            if self.nodes[left].keys.len() > min {
                self.rotate_right(parent, i);
                return;
            }
        }
        if i + 1 < siblings {
            let right = self.nodes[parent].children[i + 1];
            if self.nodes[right].keys.len() > min {
                self.rotate_left(parent, i);
                return;
            }
        }

        if i > 0 {
            self.merge_children(parent, i - 1);
        } else {
            self.merge_children(parent, i);
        }
    }

    /// Move the parent separator down into `children[i]` and the left
    /// sibling's last key up.
    fn rotate_right(&mut self, parent: NodeId, i: usize) {
        let left_id = self.nodes[parent].children[i - 1];
        let child_id = self.nodes[parent].children[i];

        let mut left = std::mem::take(&mut self.nodes[left_id]);
        let (Some(key), Some(value)) = (left.keys.pop(), left.values.pop()) else {
            self.nodes[left_id] = left;
            return;
        };
        let moved_child = left.children.pop();
        self.nodes[left_id] = left;

        let separator_key = std::mem::replace(&mut self.nodes[parent].keys[i - 1], key);
        let separator_value = std::mem::replace(&mut self.nodes[parent].values[i - 1], value);

        let child = &mut self.nodes[child_id];
        child.keys.insert(0, separator_key);
        child.values.insert(0, separator_value);
        if let Some(moved) = moved_child {
            child.children.insert(0, moved);
        }
    }

    /// Move the parent separator down into `children[i]` and the right
    /// sibling's first key up.
    fn rotate_left(&mut self, parent: NodeId, i: usize) {
        let right_id = self.nodes[parent].children[i + 1];
        let child_id = self.nodes[parent].children[i];

        let right = &mut self.nodes[right_id];
        let key = right.keys.remove(0);
        let value = right.values.remove(0);
        let moved_child = (!right.is_leaf).then(|| right.children.remove(0));

        let separator_key = std::mem::replace(&mut self.nodes[parent].keys[i], key);
        let separator_value = std::mem::replace(&mut self.nodes[parent].values[i], value);

        let child = &mut self.nodes[child_id];
        child.keys.push(separator_key);
        child.values.push(separator_value);
        if let Some(moved) = moved_child {
            child.children.push(moved);
        }
    }

    /// Merge `children[i + 1]` and the separator `keys[i]` into `children[i]`.
    fn merge_children(&mut self, parent: NodeId, i: usize) {
        let left_id = self.nodes[parent].children[i];
        let right_id = self.nodes[parent].children.remove(i + 1);
        let separator_key = self.nodes[parent].keys.remove(i);
        let separator_value = self.nodes[parent].values.remove(i);

        let right = std::mem::take(&mut self.nodes[right_id]);
        let left = &mut self.nodes[left_id];
        left.keys.push(separator_key);
        left.values.push(separator_value);
        left.keys.extend(right.keys);
        left.values.extend(right.values);
        left.children.extend(right.children);

        self.release(right_id);
    }

    // ========================================================================
    // Arena
    // ========================================================================

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free_slots.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id] = Node::default();
        self.free_slots.push(id);
    }

    /// Ids of all reachable nodes, parents before children.
    pub(crate) fn reachable(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id].children.iter().rev());
        }
        order
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Verify every structural invariant, describing the first violation.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let mut leaf_depth = None;
        let count = self.check_node(self.root, None, None, 1, &mut leaf_depth)?;
        if count != self.len {
            return Err(format!("len is {} but tree holds {} keys", self.len, count));
        }
        Ok(())
    }

    fn check_node(
        &self,
        id: NodeId,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
    ) -> std::result::Result<usize, String> {
        let node = &self.nodes[id];
        let n = node.keys.len();

        if node.values.len() != n {
            return Err(format!("node {}: {} keys but {} values", id, n, node.values.len()));
        }
        if n > self.order - 1 {
            return Err(format!("node {}: {} keys exceeds max {}", id, n, self.order - 1));
        }
        if id != self.root && n < self.min_keys() {
            return Err(format!("node {}: {} keys below min {}", id, n, self.min_keys()));
        }
        if node.keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(format!("node {}: keys not strictly increasing", id));
        }
        if let (Some(lower), Some(first)) = (lower, node.keys.first()) {
            if first.as_slice() <= lower {
                return Err(format!("node {}: key below parent bound", id));
            }
        }
        if let (Some(upper), Some(last)) = (upper, node.keys.last()) {
            if last.as_slice() >= upper {
                return Err(format!("node {}: key above parent bound", id));
            }
        }

        if node.is_leaf {
            if !node.children.is_empty() {
                return Err(format!("leaf {} has children", id));
            }
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return Err(format!("leaf {} at depth {}, expected {}", id, depth, expected));
                }
                Some(_) => {}
            }
            return Ok(n);
        }

        if node.children.len() != n + 1 {
            return Err(format!(
                "internal node {}: {} keys but {} children",
                id,
                n,
                node.children.len()
            ));
        }
        let mut count = n;
        for (i, &child) in node.children.iter().enumerate() {
            let lo = if i == 0 { lower } else { Some(node.keys[i - 1].as_slice()) };
            let hi = if i == n { upper } else { Some(node.keys[i].as_slice()) };
            count += self.check_node(child, lo, hi, depth + 1, leaf_depth)?;
        }
        Ok(count)
    }
}
