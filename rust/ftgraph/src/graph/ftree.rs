use super::storage::{
    FragmentKey,
    GraphStorage,
    LossKey,
};
use super::traversal::{
    PostOrderIter,
    PreOrderIter,
};
use crate::chem::{
    Ionization,
    MolecularFormula,
};
use std::ops::{
    Deref,
    DerefMut,
};

/// A fragmentation tree: the arborescence extracted from a fragmentation
/// graph. Every vertex except the root has exactly one parent, so
/// `number_of_edges() == number_of_vertices() - 1` at all times.
///
/// `tree_weight` is the summed edge weight including the root score,
/// `root_score` the weight of the pseudo edge the root was extracted from.
#[derive(Debug, Clone)]
pub struct FTree {
    storage: GraphStorage,
    root: FragmentKey,
    tree_weight: f64,
    root_score: f64,
}

impl FTree {
    pub fn new(formula: MolecularFormula, ionization: Ionization) -> Self {
        let mut storage = GraphStorage::new();
        let root = storage.add_fragment(formula, ionization);
        Self {
            storage,
            root,
            tree_weight: 0.0,
            root_score: 0.0,
        }
    }

    pub fn root(&self) -> FragmentKey {
        self.root
    }

    pub fn tree_weight(&self) -> f64 {
        self.tree_weight
    }

    pub fn set_tree_weight(&mut self, weight: f64) {
        self.tree_weight = weight;
    }

    pub fn add_to_tree_weight(&mut self, delta: f64) {
        self.tree_weight += delta;
    }

    pub fn root_score(&self) -> f64 {
        self.root_score
    }

    pub fn set_root_score(&mut self, score: f64) {
        self.root_score = score;
    }

    /// Attaches a new fragment below `parent`. The connecting loss formula
    /// is the elemental difference; panics if the child formula is no
    /// subformula of the parent.
    pub fn add_fragment(
        &mut self,
        parent: FragmentKey,
        formula: MolecularFormula,
        ionization: Ionization,
    ) -> FragmentKey {
        let vertex = self.storage.add_fragment(formula, ionization);
        self.storage.add_loss(parent, vertex);
        vertex
    }

    /// Puts a new root above the current one and returns it. The new root
    /// becomes vertex 0.
    pub fn add_root(&mut self, formula: MolecularFormula, ionization: Ionization) -> FragmentKey {
        let new_root = self.storage.add_fragment(formula, ionization);
        self.storage.add_loss(new_root, self.root);
        self.root = new_root;
        let mut order: Vec<FragmentKey> = self.storage.fragment_keys().collect();
        let pos = order
            .iter()
            .position(|&k| k == new_root)
            .unwrap_or_else(|| panic!("fresh root must be part of the ordering"));
        order.remove(pos);
        order.insert(0, new_root);
        self.storage.reorder_vertices(order);
        new_root
    }

    /// Detaches a vertex from its parent and hangs it below `new_parent`.
    /// The old parent's remaining children keep their relative order.
    pub fn swap_loss(&mut self, vertex: FragmentKey, new_parent: FragmentKey) -> LossKey {
        let old = self
            .storage
            .incoming_loss(vertex)
            .unwrap_or_else(|| panic!("swap_loss requires a non-root vertex"));
        self.storage.delete_loss_keep_order(old);
        self.storage.add_loss(new_parent, vertex)
    }

    /// Removes a vertex and reattaches its children to its parent, merging
    /// the losses. The root cannot be contracted.
    pub fn delete_vertex(&mut self, key: FragmentKey) {
        assert!(key != self.root, "cannot contract the root");
        let parent_loss = self
            .storage
            .incoming_loss(key)
            .unwrap_or_else(|| panic!("tree vertex without parent"));
        let parent = self.storage.loss(parent_loss).source();
        let children: Vec<FragmentKey> = self.storage.children(key).collect();
        for child in children {
            self.swap_loss(child, parent);
        }
        self.storage.delete_fragment(key);
    }

    /// Removes a vertex together with all of its descendants. Returns the
    /// number of deleted vertices.
    pub fn delete_subtree(&mut self, key: FragmentKey) -> usize {
        let descendants: Vec<FragmentKey> =
            PostOrderIter::new(&self.storage, key, None).collect();
        let n = descendants.len();
        for k in descendants {
            self.storage.delete_fragment(k);
        }
        n
    }

    /// Brings the tree into its canonical shape: children sorted by
    /// descending formula and vertex ids renumbered in pre-order from the
    /// root.
    pub fn normalize_structure(&mut self) {
        let keys: Vec<FragmentKey> = self.storage.fragment_keys().collect();
        for key in keys {
            let mut out = self.storage.outgoing(key).to_vec();
            out.sort_by(|&a, &b| {
                let fa = *self.storage.fragment(self.storage.loss(a).target()).formula();
                let fb = *self.storage.fragment(self.storage.loss(b).target()).formula();
                fb.cmp(&fa)
            });
            self.storage.set_outgoing_order(key, out);
        }
        let order: Vec<FragmentKey> = self.pre_order().collect();
        self.storage.reorder_vertices(order);
    }

    pub fn pre_order(&self) -> PreOrderIter<'_> {
        PreOrderIter::new(&self.storage, self.root, None)
    }

    pub fn post_order(&self) -> PostOrderIter<'_> {
        PostOrderIter::new(&self.storage, self.root, None)
    }

    /// Post-order walk that allows deleting vertices mid-traversal, for
    /// pruning passes that decide per vertex after seeing its children.
    pub fn post_order_cursor(&self) -> PostOrderCursor {
        PostOrderCursor::new(self.root)
    }

    /// Parent key, or None for the root.
    pub fn parent(&self, key: FragmentKey) -> Option<FragmentKey> {
        self.storage
            .incoming_loss(key)
            .map(|l| self.storage.loss(l).source())
    }

    /// Tree shape check: exactly one root, every other vertex one parent.
    pub fn is_valid_tree(&self) -> bool {
        if self.storage.number_of_edges() + 1 != self.storage.number_of_vertices() {
            return false;
        }
        self.storage.fragments().all(|f| {
            if f.key() == self.root {
                f.in_degree() == 0
            } else {
                f.in_degree() == 1
            }
        })
    }
}

/// Cursor for a mutable post-order walk. Unlike the plain iterators it does
/// not borrow the tree; `next` and `remove_current` take it per call, so a
/// vertex can be deleted as soon as it has been yielded.
#[derive(Debug)]
pub struct PostOrderCursor {
    stack: Vec<(FragmentKey, usize)>,
    current: Option<FragmentKey>,
}

impl PostOrderCursor {
    fn new(root: FragmentKey) -> Self {
        Self {
            stack: vec![(root, 0)],
            current: None,
        }
    }

    pub fn next(&mut self, tree: &FTree) -> Option<FragmentKey> {
        loop {
            let (key, child) = *self.stack.last()?;
            let out = tree.outgoing(key);
            if child < out.len() {
                let target = tree.loss(out[child]).target();
                if let Some(frame) = self.stack.last_mut() {
                    frame.1 += 1;
                }
                self.stack.push((target, 0));
            } else {
                self.stack.pop();
                self.current = Some(key);
                return Some(key);
            }
        }
    }

    /// Deletes the vertex yielded by the last `next` call, together with
    /// any descendants it still has, and resumes the walk at its parent.
    /// Returns the number of deleted vertices. Panics when nothing is under
    /// the cursor or the root is targeted.
    pub fn remove_current(&mut self, tree: &mut FTree) -> usize {
        let key = self
            .current
            .take()
            .unwrap_or_else(|| panic!("no vertex under the cursor"));
        assert!(key != tree.root, "cannot remove the root");
        // the parent's outgoing list shrinks by one, so its walk position
        // moves back with it
        if let Some(frame) = self.stack.last_mut() {
            frame.1 -= 1;
        }
        tree.delete_subtree(key)
    }
}

impl Deref for FTree {
    type Target = GraphStorage;

    fn deref(&self) -> &GraphStorage {
        &self.storage
    }
}

impl DerefMut for FTree {
    fn deref_mut(&mut self) -> &mut GraphStorage {
        &mut self.storage
    }
}
