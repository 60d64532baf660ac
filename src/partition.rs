//! Array-indexed disjoint-set over dense ids `0..n`.
//!
//! Unions always hang the larger root under the smaller one and never
//! compress while walking, so every parent id is less than or equal to its
//! child id. That ordering lets [`Partition::update`] flatten the whole
//! forest in one ascending pass once all unions are done.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    parent: Vec<usize>,
}

impl Partition {
    /// Every id starts as its own root.
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    fn root(&self, mut x: usize) -> usize {
        while self.parent[x] != x {
            x = self.parent[x];
        }
        x
    }

    /// Joins the classes of `a` and `b` and returns the surviving root,
    /// which is always the smaller of the two roots.
    pub fn resolve(&mut self, a: usize, b: usize) -> usize {
        let root_a = self.root(a);
        let root_b = self.root(b);
        if root_a == root_b {
            return root_a;
        }
        let (keep, attach) = if root_a < root_b {
            (root_a, root_b)
        } else {
            (root_b, root_a)
        };
        self.parent[attach] = keep;
        keep
    }

    /// Points every id directly at its representative.
    pub fn update(&mut self) {
        for i in 0..self.parent.len() {
            // parent[i] <= i, and smaller ids are already flat
            let p = self.parent[i];
            self.parent[i] = self.parent[p];
        }
    }

    /// Representative of `x`. Valid before and after [`Partition::update`].
    pub fn find(&self, x: usize) -> usize {
        self.root(x)
    }

    pub fn same(&self, a: usize, b: usize) -> bool {
        self.root(a) == self.root(b)
    }

    pub fn num_partitions(&self) -> usize {
        self.parent
            .iter()
            .enumerate()
            .filter(|(i, p)| *i == **p)
            .count()
    }

    /// Representative -> ascending members, for every class.
    pub fn classes(&self) -> BTreeMap<usize, Vec<usize>> {
        let mut classes: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..self.parent.len() {
            classes.entry(self.root(i)).or_default().push(i);
        }
        classes
    }
}
