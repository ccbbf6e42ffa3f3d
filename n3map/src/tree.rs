//! A red-black tree over NSEC3 intervals, augmented with subtree sizes and
//! the total covered distance on the 2^160 hash circle.
//!
//! Nodes live in one arena (`Vec`) and reference each other by index; the
//! sentinel NIL node sits at index 0. This keeps the parent/child pointer
//! cycle of the classic algorithms without reference counting.

use num_bigint::BigUint;

use crate::records::{Nsec3Digest, SHA1_MAX};

const NIL: usize = 0;

/// Stable handle to a tree node.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct NodeId(usize);

#[derive(PartialEq, Eq, Copy, Clone, Debug)]
enum Color {
    Red,
    Black,
}

#[derive(Clone, Debug)]
struct Node {
    key: Nsec3Digest,
    int_end: Nsec3Digest,
    left: usize,
    right: usize,
    parent: usize,
    color: Color,
    size: usize,
}

/// Outcome of [`Nsec3Tree::insert`].
#[derive(Debug)]
pub struct InsertOutcome {
    pub node: NodeId,
    /// True when a node with this key already existed and was updated in
    /// place instead of inserted.
    pub was_updated: bool,
    /// True when an update replaced a different interval end.
    pub interval_changed: bool,
    /// True when the new interval overlaps a neighbour but
    /// `ignore_overlapping` is set.
    pub overlapping: bool,
}

/// The inserted interval overlaps an existing one.
#[derive(Debug, PartialEq, Eq)]
pub struct OverlapError;

pub struct Nsec3Tree {
    nodes: Vec<Node>,
    free: Vec<usize>,
    root: usize,
    last: usize,
    covered_distance: BigUint,
    pub ignore_overlapping: bool,
}

impl Default for Nsec3Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Nsec3Tree {
    pub fn new() -> Self {
        let sentinel = Node {
            key: [0; 20],
            int_end: [0; 20],
            left: NIL,
            right: NIL,
            parent: NIL,
            color: Color::Black,
            size: 0,
        };
        Self {
            nodes: vec![sentinel],
            free: Vec::new(),
            root: NIL,
            last: NIL,
            covered_distance: BigUint::default(),
            ignore_overlapping: false,
        }
    }

    /// The number of stored intervals.
    pub fn size(&self) -> usize {
        self.nodes[self.root].size
    }

    /// The sum of all interval arc lengths.
    pub fn covered_distance(&self) -> &BigUint {
        &self.covered_distance
    }

    /// The highest point of the hash circle.
    pub fn hash_max(&self) -> &BigUint {
        &SHA1_MAX
    }

    pub fn key(&self, node: NodeId) -> &Nsec3Digest {
        &self.nodes[node.0].key
    }

    pub fn int_end(&self, node: NodeId) -> &Nsec3Digest {
        &self.nodes[node.0].int_end
    }

    fn is_last(&self, x: usize) -> bool {
        self.nodes[x].key >= self.nodes[x].int_end
    }

    fn node_covers(&self, x: usize, k: &Nsec3Digest) -> bool {
        let node = &self.nodes[x];
        if self.is_last(x) {
            *k >= node.key || *k <= node.int_end
        } else {
            *k >= node.key && *k <= node.int_end
        }
    }

    fn node_distance(&self, x: usize) -> BigUint {
        let node = &self.nodes[x];
        let start = BigUint::from_bytes_be(&node.key);
        let end = BigUint::from_bytes_be(&node.int_end);
        if self.is_last(x) {
            SHA1_MAX.clone() - start + end
        } else {
            end - start
        }
    }

    fn update_node_size(&mut self, x: usize) {
        let left = self.nodes[self.nodes[x].left].size;
        let right = self.nodes[self.nodes[x].right].size;
        self.nodes[x].size = 1 + left + right;
    }

    fn update_sizes_from(&mut self, mut x: usize) {
        while x != NIL {
            self.update_node_size(x);
            x = self.nodes[x].parent;
        }
    }

    fn left_rotate(&mut self, x: usize) {
        let y = self.nodes[x].right;
        let y_left = self.nodes[y].left;
        self.nodes[x].right = y_left;
        if y_left != NIL {
            self.nodes[y_left].parent = x;
        }
        let x_parent = self.nodes[x].parent;
        self.nodes[y].parent = x_parent;
        if x_parent == NIL {
            self.root = y;
        } else if x == self.nodes[x_parent].left {
            self.nodes[x_parent].left = y;
        } else {
            self.nodes[x_parent].right = y;
        }
        self.nodes[y].left = x;
        self.nodes[x].parent = y;
        self.nodes[y].size = self.nodes[x].size;
        self.update_node_size(x);
    }

    fn right_rotate(&mut self, x: usize) {
        let y = self.nodes[x].left;
        let y_right = self.nodes[y].right;
        self.nodes[x].left = y_right;
        if y_right != NIL {
            self.nodes[y_right].parent = x;
        }
        let x_parent = self.nodes[x].parent;
        self.nodes[y].parent = x_parent;
        if x_parent == NIL {
            self.root = y;
        } else if x == self.nodes[x_parent].right {
            self.nodes[x_parent].right = y;
        } else {
            self.nodes[x_parent].left = y;
        }
        self.nodes[y].right = x;
        self.nodes[x].parent = y;
        self.nodes[y].size = self.nodes[x].size;
        self.update_node_size(x);
    }

    fn insert_fixup(&mut self, mut z: usize) {
        while self.nodes[self.nodes[z].parent].color == Color::Red {
            let parent = self.nodes[z].parent;
            let grandparent = self.nodes[parent].parent;
            if parent == self.nodes[grandparent].left {
                let uncle = self.nodes[grandparent].right;
                if self.nodes[uncle].color == Color::Red {
                    self.nodes[parent].color = Color::Black;
                    self.nodes[uncle].color = Color::Black;
                    self.nodes[grandparent].color = Color::Red;
                    z = grandparent;
                } else {
                    if z == self.nodes[parent].right {
                        z = parent;
                        self.left_rotate(z);
                    }
                    let parent = self.nodes[z].parent;
                    let grandparent = self.nodes[parent].parent;
                    self.nodes[parent].color = Color::Black;
                    self.nodes[grandparent].color = Color::Red;
                    self.right_rotate(grandparent);
                }
            } else {
                let uncle = self.nodes[grandparent].left;
                if self.nodes[uncle].color == Color::Red {
                    self.nodes[parent].color = Color::Black;
                    self.nodes[uncle].color = Color::Black;
                    self.nodes[grandparent].color = Color::Red;
                    z = grandparent;
                } else {
                    if z == self.nodes[parent].left {
                        z = parent;
                        self.right_rotate(z);
                    }
                    let parent = self.nodes[z].parent;
                    let grandparent = self.nodes[parent].parent;
                    self.nodes[parent].color = Color::Black;
                    self.nodes[grandparent].color = Color::Red;
                    self.left_rotate(grandparent);
                }
            }
        }
        let root = self.root;
        self.nodes[root].color = Color::Black;
    }

    fn transplant(&mut self, old: usize, new: usize) {
        let parent = self.nodes[old].parent;
        if parent == NIL {
            self.root = new;
        } else if old == self.nodes[parent].left {
            self.nodes[parent].left = new;
        } else {
            self.nodes[parent].right = new;
        }
        self.nodes[new].parent = parent;
    }

    fn delete_fixup(&mut self, mut x: usize) {
        while x != self.root && self.nodes[x].color == Color::Black {
            let parent = self.nodes[x].parent;
            if x == self.nodes[parent].left {
                let mut w = self.nodes[parent].right;
                if self.nodes[w].color == Color::Red {
                    self.nodes[w].color = Color::Black;
                    self.nodes[parent].color = Color::Red;
                    self.left_rotate(parent);
                    w = self.nodes[self.nodes[x].parent].right;
                }
                if self.nodes[self.nodes[w].left].color == Color::Black
                    && self.nodes[self.nodes[w].right].color == Color::Black
                {
                    self.nodes[w].color = Color::Red;
                    x = self.nodes[x].parent;
                } else {
                    if self.nodes[self.nodes[w].right].color == Color::Black {
                        let w_left = self.nodes[w].left;
                        self.nodes[w_left].color = Color::Black;
                        self.nodes[w].color = Color::Red;
                        self.right_rotate(w);
                        w = self.nodes[self.nodes[x].parent].right;
                    }
                    let parent = self.nodes[x].parent;
                    self.nodes[w].color = self.nodes[parent].color;
                    self.nodes[parent].color = Color::Black;
                    let w_right = self.nodes[w].right;
                    self.nodes[w_right].color = Color::Black;
                    self.left_rotate(parent);
                    x = self.root;
                }
            } else {
                let mut w = self.nodes[parent].left;
                if self.nodes[w].color == Color::Red {
                    self.nodes[w].color = Color::Black;
                    self.nodes[parent].color = Color::Red;
                    self.right_rotate(parent);
                    w = self.nodes[self.nodes[x].parent].left;
                }
                if self.nodes[self.nodes[w].right].color == Color::Black
                    && self.nodes[self.nodes[w].left].color == Color::Black
                {
                    self.nodes[w].color = Color::Red;
                    x = self.nodes[x].parent;
                } else {
                    if self.nodes[self.nodes[w].left].color == Color::Black {
                        let w_right = self.nodes[w].right;
                        self.nodes[w_right].color = Color::Black;
                        self.nodes[w].color = Color::Red;
                        self.left_rotate(w);
                        w = self.nodes[self.nodes[x].parent].left;
                    }
                    let parent = self.nodes[x].parent;
                    self.nodes[w].color = self.nodes[parent].color;
                    self.nodes[parent].color = Color::Black;
                    let w_left = self.nodes[w].left;
                    self.nodes[w_left].color = Color::Black;
                    self.right_rotate(parent);
                    x = self.root;
                }
            }
        }
        self.nodes[x].color = Color::Black;
    }

    fn alloc(&mut self, key: Nsec3Digest, int_end: Nsec3Digest) -> usize {
        let node = Node {
            key,
            int_end,
            left: NIL,
            right: NIL,
            parent: NIL,
            color: Color::Red,
            size: 1,
        };
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn minimum_from(&self, mut x: usize) -> usize {
        while self.nodes[x].left != NIL {
            x = self.nodes[x].left;
        }
        x
    }

    fn maximum_from(&self, mut x: usize) -> usize {
        while self.nodes[x].right != NIL {
            x = self.nodes[x].right;
        }
        x
    }

    fn successor_of(&self, mut x: usize) -> usize {
        if self.nodes[x].right != NIL {
            return self.minimum_from(self.nodes[x].right);
        }
        let mut y = self.nodes[x].parent;
        while y != NIL && x == self.nodes[y].right {
            x = y;
            y = self.nodes[y].parent;
        }
        y
    }

    fn predecessor_of(&self, mut x: usize) -> usize {
        if self.nodes[x].left != NIL {
            return self.maximum_from(self.nodes[x].left);
        }
        let mut y = self.nodes[x].parent;
        while y != NIL && x == self.nodes[y].left {
            x = y;
            y = self.nodes[y].parent;
        }
        y
    }

    /// True when the interval of `x` overlaps its in-order neighbours.
    fn overlaps_neighbours(&self, x: usize) -> bool {
        let pre = self.predecessor_of(x);
        if pre != NIL && self.nodes[pre].int_end > self.nodes[x].key {
            return true;
        }
        let suc = self.successor_of(x);
        if suc != NIL && self.nodes[x].int_end > self.nodes[suc].key {
            return true;
        }
        false
    }

    fn refresh_last(&mut self, x: usize) {
        if self.is_last(x) {
            self.last = x;
        } else if self.last == x {
            self.last = NIL;
        }
    }

    /// Inserts the interval `[key, int_end]`, or updates the interval end of
    /// an existing node with the same key, maintaining `covered_distance`
    /// and the cached wrap-around node.
    ///
    /// Returns [`OverlapError`] when the interval overlaps a neighbour and
    /// `ignore_overlapping` is not set; the node is inserted regardless, but
    /// callers treat the error as fatal.
    pub fn insert(
        &mut self,
        key: Nsec3Digest,
        int_end: Nsec3Digest,
    ) -> Result<InsertOutcome, OverlapError> {
        let mut parent = NIL;
        let mut x = self.root;
        while x != NIL {
            parent = x;
            if key < self.nodes[x].key {
                x = self.nodes[x].left;
            } else if key > self.nodes[x].key {
                x = self.nodes[x].right;
            } else {
                // key already in tree: update the interval end
                let interval_changed = self.nodes[x].int_end != int_end;
                if interval_changed {
                    let old = self.node_distance(x);
                    self.nodes[x].int_end = int_end;
                    let new = self.node_distance(x);
                    self.covered_distance = self.covered_distance.clone() - old + new;
                }
                self.refresh_last(x);
                let overlapping = self.overlaps_neighbours(x);
                if overlapping && !self.ignore_overlapping {
                    return Err(OverlapError);
                }
                return Ok(InsertOutcome {
                    node: NodeId(x),
                    was_updated: true,
                    interval_changed,
                    overlapping,
                });
            }
        }

        let new = self.alloc(key, int_end);
        self.nodes[new].parent = parent;
        if parent == NIL {
            self.root = new;
        } else if self.nodes[new].key < self.nodes[parent].key {
            self.nodes[parent].left = new;
        } else {
            self.nodes[parent].right = new;
        }
        self.update_sizes_from(parent);
        self.insert_fixup(new);

        let distance = self.node_distance(new);
        self.covered_distance += distance;
        if self.last == NIL && self.is_last(new) {
            self.last = new;
        }

        let overlapping = self.overlaps_neighbours(new);
        if overlapping && !self.ignore_overlapping {
            return Err(OverlapError);
        }
        Ok(InsertOutcome {
            node: NodeId(new),
            was_updated: false,
            interval_changed: false,
            overlapping,
        })
    }

    /// Finds the node with exactly this key.
    pub fn find(&self, key: &Nsec3Digest) -> Option<NodeId> {
        let mut x = self.root;
        while x != NIL && *key != self.nodes[x].key {
            x = if *key < self.nodes[x].key {
                self.nodes[x].left
            } else {
                self.nodes[x].right
            };
        }
        (x != NIL).then_some(NodeId(x))
    }

    /// Finds the node whose interval covers `key`, including the
    /// wrap-around interval of the cached last node.
    pub fn find_interval(&self, key: &Nsec3Digest) -> Option<NodeId> {
        if self.last != NIL && self.node_covers(self.last, key) {
            return Some(NodeId(self.last));
        }

        let mut x = self.root;
        let mut parent = NIL;
        while x != NIL && *key != self.nodes[x].key {
            parent = x;
            x = if *key < self.nodes[x].key {
                self.nodes[x].left
            } else {
                self.nodes[x].right
            };
        }

        if x == NIL && parent != NIL {
            if self.node_covers(parent, key) {
                x = parent;
            } else if self.nodes[parent].key > *key {
                let pre = self.predecessor_of(parent);
                if pre != NIL && self.node_covers(pre, key) {
                    x = pre;
                }
            }
        }

        (x != NIL).then_some(NodeId(x))
    }

    /// Deletes the node, preserving the red-black properties and the
    /// coverage bookkeeping.
    pub fn delete(&mut self, node: NodeId) {
        let z = node.0;
        let mut y_orig_color = self.nodes[z].color;
        let x;
        let sz_update;
        if self.nodes[z].left == NIL {
            x = self.nodes[z].right;
            sz_update = self.nodes[z].parent;
            self.transplant(z, x);
            self.update_sizes_from(sz_update);
        } else if self.nodes[z].right == NIL {
            x = self.nodes[z].left;
            sz_update = self.nodes[z].parent;
            self.transplant(z, x);
            self.update_sizes_from(sz_update);
        } else {
            let y = self.minimum_from(self.nodes[z].right);
            y_orig_color = self.nodes[y].color;
            x = self.nodes[y].right;
            if self.nodes[y].parent == z {
                sz_update = y;
                self.nodes[x].parent = y;
            } else {
                sz_update = self.nodes[y].parent;
                self.transplant(y, x);
                let z_right = self.nodes[z].right;
                self.nodes[y].right = z_right;
                self.nodes[z_right].parent = y;
            }
            self.transplant(z, y);
            let z_left = self.nodes[z].left;
            self.nodes[y].left = z_left;
            self.nodes[z_left].parent = y;
            self.nodes[y].color = self.nodes[z].color;
            self.update_sizes_from(sz_update);
        }

        if y_orig_color == Color::Black {
            self.delete_fixup(x);
        }

        if self.last == z {
            self.last = NIL;
        }
        self.covered_distance = self.covered_distance.clone() - self.node_distance(z);
        self.free.push(z);
    }

    /// The stored keys in sorted order.
    pub fn keys_in_order(&self) -> Vec<Nsec3Digest> {
        let mut keys = Vec::with_capacity(self.size());
        self.inorder_collect(self.root, &mut keys);
        keys
    }

    fn inorder_collect(&self, x: usize, keys: &mut Vec<Nsec3Digest>) {
        if x == NIL {
            return;
        }
        self.inorder_collect(self.nodes[x].left, keys);
        keys.push(self.nodes[x].key);
        self.inorder_collect(self.nodes[x].right, keys);
    }
}
