// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Spatial octree over axis-aligned boxes.
//!
//! Items are registered by an opaque index plus their bounding box; the tree
//! only prunes by box overlap, and the caller supplies the exact pairwise
//! test when collecting collisions. A leaf splits into eight equal octants
//! once it holds more than the storage threshold; an item is linked into
//! every octant its box overlaps.

use std::collections::BTreeSet;

use nalgebra::Vector3;

use super::Aabb;

const DEFAULT_MAX_STORAGE: usize = 10;
const MAX_DEPTH: usize = 10;

#[derive(Debug)]
struct TreeNode {
    bounds: Aabb,
    depth: usize,
    kind: NodeKind,
}

#[derive(Debug)]
enum NodeKind {
    Leaf(Vec<usize>),
    Branch(Vec<TreeNode>),
}

impl TreeNode {
    fn leaf(bounds: Aabb, depth: usize) -> TreeNode {
        TreeNode {
            bounds,
            depth,
            kind: NodeKind::Leaf(Vec::new()),
        }
    }

    fn octant(&self, i: usize) -> Aabb {
        let lo = self.bounds.lower();
        let c = self.bounds.centre();
        let e = self.bounds.extents();
        let offset = Vector3::new(
            if i & 1 == 0 { 0.0 } else { e.x },
            if i & 2 == 0 { 0.0 } else { e.y },
            if i & 4 == 0 { 0.0 } else { e.z },
        );
        Aabb::new(lo + offset, c + offset)
    }

    fn insert(&mut self, id: usize, boxes: &[Aabb], max_storage: usize) {
        match &mut self.kind {
            NodeKind::Leaf(items) => {
                items.push(id);
                if items.len() > max_storage && self.depth < MAX_DEPTH {
                    let items = std::mem::take(items);
                    let mut children: Vec<TreeNode> = (0..8)
                        .map(|i| TreeNode::leaf(self.octant(i), self.depth + 1))
                        .collect();
                    for &it in &items {
                        for child in &mut children {
                            if child.bounds.collide(&boxes[it]) {
                                child.insert(it, boxes, max_storage);
                            }
                        }
                    }
                    self.kind = NodeKind::Branch(children);
                }
            }
            NodeKind::Branch(children) => {
                for child in children {
                    if child.bounds.collide(&boxes[id]) {
                        child.insert(id, boxes, max_storage);
                    }
                }
            }
        }
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a [usize]>) {
        match &self.kind {
            NodeKind::Leaf(items) => out.push(items),
            NodeKind::Branch(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
        }
    }

    fn query_into(
        &self,
        aabb: &Aabb,
        boxes: &[Aabb],
        exact: &dyn Fn(usize) -> bool,
        out: &mut BTreeSet<usize>,
    ) {
        if !self.bounds.collide(aabb) {
            return;
        }
        match &self.kind {
            NodeKind::Leaf(items) => {
                for &id in items {
                    if !out.contains(&id) && boxes[id].collide(aabb) && exact(id) {
                        out.insert(id);
                    }
                }
            }
            NodeKind::Branch(children) => {
                for child in children {
                    child.query_into(aabb, boxes, exact, out);
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct Octree {
    root: TreeNode,
    max_storage: usize,
    boxes: Vec<Aabb>,
}

impl Octree {
    pub fn new(lower: Vector3<f64>, upper: Vector3<f64>) -> Octree {
        Octree {
            root: TreeNode::leaf(Aabb::new(lower, upper), 0),
            max_storage: DEFAULT_MAX_STORAGE,
            boxes: Vec::new(),
        }
    }

    /// Set the number of items a leaf may hold before it splits.
    pub fn set_max_storage(&mut self, max_storage: usize) {
        self.max_storage = max_storage.max(1);
    }

    /// Register an item; returns its index.
    pub fn add(&mut self, aabb: Aabb) -> usize {
        let id = self.boxes.len();
        self.boxes.push(aabb);
        self.root.insert(id, &self.boxes, self.max_storage);
        id
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn has_children(&self) -> bool {
        matches!(self.root.kind, NodeKind::Branch(_))
    }

    /// Leaf item lists in depth-first order.
    pub fn leaves(&self) -> Vec<&[usize]> {
        let mut out = Vec::new();
        self.root.collect_leaves(&mut out);
        out
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves().len()
    }

    /// All item pairs whose boxes overlap and which pass the caller's exact
    /// test. Pairs are reported once, ordered `(small, large)`.
    pub fn collisions(&self, exact: impl Fn(usize, usize) -> bool) -> BTreeSet<(usize, usize)> {
        let mut out = BTreeSet::new();
        let mut rejected: BTreeSet<(usize, usize)> = BTreeSet::new();
        for leaf in self.leaves() {
            for (i, &a) in leaf.iter().enumerate() {
                for &b in &leaf[i + 1..] {
                    let key = (a.min(b), a.max(b));
                    if out.contains(&key) || rejected.contains(&key) {
                        continue;
                    }
                    if self.boxes[key.0].collide(&self.boxes[key.1]) && exact(key.0, key.1) {
                        out.insert(key);
                    } else {
                        rejected.insert(key);
                    }
                }
            }
        }
        out
    }

    /// Items whose boxes overlap the query box and pass the exact test.
    pub fn query(&self, aabb: &Aabb, exact: impl Fn(usize) -> bool) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        self.root.query_into(aabb, &self.boxes, &exact, &mut out);
        out
    }
}
