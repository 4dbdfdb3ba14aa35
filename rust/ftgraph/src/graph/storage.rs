use super::annotation::{
    AnnotationRegistry,
    AnnotationValue,
    AnnotationValues,
    FragmentAnnotation,
    LossAnnotation,
    TypedRegistry,
};
use crate::chem::{
    Ionization,
    MolecularFormula,
};
use crate::errors::Result;

/// Stable handle to a fragment slot. Keys survive deletions of other
/// fragments; using a key after its own fragment was deleted is a bug and
/// panics on access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentKey(pub(crate) u32);

/// Stable handle to a loss slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LossKey(pub(crate) u32);

/// A vertex of a fragmentation graph or tree: a neutral formula plus the
/// ion mode it was measured in. `color` groups fragments that explain the
/// same peak, `peak_id` points back into the merged peak list.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub(crate) key: FragmentKey,
    pub(crate) vertex_id: i32,
    formula: MolecularFormula,
    ionization: Ionization,
    color: i32,
    peak_id: i32,
    pub(crate) outgoing: Vec<LossKey>,
    pub(crate) incoming: Vec<LossKey>,
    pub(crate) annotations: AnnotationValues,
}

impl Fragment {
    pub fn key(&self) -> FragmentKey {
        self.key
    }

    /// Position in the vertex ordering of the graph.
    pub fn vertex_id(&self) -> usize {
        debug_assert!(self.vertex_id >= 0, "fragment was deleted");
        self.vertex_id as usize
    }

    pub fn formula(&self) -> &MolecularFormula {
        &self.formula
    }

    pub fn ionization(&self) -> Ionization {
        self.ionization
    }

    /// Ion m/z this fragment would produce.
    pub fn ion_mass(&self) -> f64 {
        self.ionization.add_to_mass(self.formula.mass())
    }

    pub fn color(&self) -> i32 {
        self.color
    }

    pub fn peak_id(&self) -> i32 {
        self.peak_id
    }

    pub fn out_degree(&self) -> usize {
        self.outgoing.len()
    }

    pub fn in_degree(&self) -> usize {
        self.incoming.len()
    }

    pub fn is_leaf(&self) -> bool {
        self.outgoing.is_empty()
    }
}

/// A directed edge between two fragments. Its formula is the elemental
/// difference between source and target, its weight the score assigned by
/// the loss scorers.
#[derive(Debug, Clone)]
pub struct Loss {
    pub(crate) key: LossKey,
    source: FragmentKey,
    target: FragmentKey,
    formula: MolecularFormula,
    weight: f64,
    pub(crate) source_offset: i32,
    pub(crate) target_offset: i32,
    pub(crate) annotations: AnnotationValues,
}

impl Loss {
    pub fn key(&self) -> LossKey {
        self.key
    }

    pub fn source(&self) -> FragmentKey {
        self.source
    }

    pub fn target(&self) -> FragmentKey {
        self.target
    }

    pub fn formula(&self) -> &MolecularFormula {
        &self.formula
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }
}

/// Arena holding fragments and losses of one graph. Adjacency is kept as
/// per-fragment key lists; each loss stores its offset in both lists so
/// removal is O(1). The `order` vector defines vertex ids and is the only
/// place where vertex ordering lives.
///
/// Invariant, checked by `is_valid_numbered`:
///   `loss.source_offset == i` iff `fragment(loss.source).outgoing[i] == loss`
/// and symmetrically for `target_offset` / `incoming`.
#[derive(Debug, Clone, Default)]
pub struct GraphStorage {
    fragments: Vec<Option<Fragment>>,
    losses: Vec<Option<Loss>>,
    free_fragments: Vec<FragmentKey>,
    free_losses: Vec<LossKey>,
    order: Vec<FragmentKey>,
    edge_count: usize,
    fragment_registry: AnnotationRegistry,
    loss_registry: AnnotationRegistry,
    annotations: TypedRegistry,
}

impl GraphStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn number_of_vertices(&self) -> usize {
        self.order.len()
    }

    pub fn number_of_edges(&self) -> usize {
        self.edge_count
    }

    pub fn fragment(&self, key: FragmentKey) -> &Fragment {
        match self.fragments.get(key.0 as usize) {
            Some(Some(f)) => f,
            _ => panic!("access to deleted or unknown fragment {:?}", key),
        }
    }

    pub fn fragment_mut(&mut self, key: FragmentKey) -> &mut Fragment {
        match self.fragments.get_mut(key.0 as usize) {
            Some(Some(f)) => f,
            _ => panic!("access to deleted or unknown fragment {:?}", key),
        }
    }

    pub fn contains_fragment(&self, key: FragmentKey) -> bool {
        matches!(self.fragments.get(key.0 as usize), Some(Some(_)))
    }

    pub fn loss(&self, key: LossKey) -> &Loss {
        match self.losses.get(key.0 as usize) {
            Some(Some(l)) => l,
            _ => panic!("access to deleted or unknown loss {:?}", key),
        }
    }

    pub fn loss_mut(&mut self, key: LossKey) -> &mut Loss {
        match self.losses.get_mut(key.0 as usize) {
            Some(Some(l)) => l,
            _ => panic!("access to deleted or unknown loss {:?}", key),
        }
    }

    /// Fragment at a given position of the vertex ordering.
    pub fn fragment_at(&self, vertex_id: usize) -> FragmentKey {
        self.order[vertex_id]
    }

    /// Fragments in vertex order.
    pub fn fragments(&self) -> impl Iterator<Item = &Fragment> + '_ {
        self.order.iter().map(move |&k| self.fragment(k))
    }

    pub fn fragment_keys(&self) -> impl Iterator<Item = FragmentKey> + '_ {
        self.order.iter().copied()
    }

    /// All live losses, in no particular order.
    pub fn losses(&self) -> impl Iterator<Item = &Loss> + '_ {
        self.losses.iter().filter_map(|l| l.as_ref())
    }

    pub fn loss_keys(&self) -> Vec<LossKey> {
        self.losses
            .iter()
            .filter_map(|l| l.as_ref().map(|l| l.key))
            .collect()
    }

    pub fn outgoing(&self, key: FragmentKey) -> &[LossKey] {
        &self.fragment(key).outgoing
    }

    pub fn incoming(&self, key: FragmentKey) -> &[LossKey] {
        &self.fragment(key).incoming
    }

    pub fn children(&self, key: FragmentKey) -> impl Iterator<Item = FragmentKey> + '_ {
        self.fragment(key)
            .outgoing
            .iter()
            .map(move |&l| self.loss(l).target)
    }

    pub fn parents(&self, key: FragmentKey) -> impl Iterator<Item = FragmentKey> + '_ {
        self.fragment(key)
            .incoming
            .iter()
            .map(move |&l| self.loss(l).source)
    }

    /// The unique incoming loss, if the fragment has exactly one parent.
    pub fn incoming_loss(&self, key: FragmentKey) -> Option<LossKey> {
        let incoming = &self.fragment(key).incoming;
        if incoming.len() == 1 {
            Some(incoming[0])
        } else {
            None
        }
    }

    pub fn add_fragment(&mut self, formula: MolecularFormula, ionization: Ionization) -> FragmentKey {
        let key = match self.free_fragments.pop() {
            Some(k) => k,
            None => {
                let k = FragmentKey(self.fragments.len() as u32);
                self.fragments.push(None);
                k
            }
        };
        self.fragments[key.0 as usize] = Some(Fragment {
            key,
            vertex_id: self.order.len() as i32,
            formula,
            ionization,
            color: -1,
            peak_id: -1,
            outgoing: Vec::new(),
            incoming: Vec::new(),
            annotations: AnnotationValues::default(),
        });
        self.order.push(key);
        key
    }

    pub fn set_color(&mut self, key: FragmentKey, color: i32) {
        self.fragment_mut(key).color = color;
    }

    pub fn set_peak_id(&mut self, key: FragmentKey, peak_id: i32) {
        self.fragment_mut(key).peak_id = peak_id;
    }

    /// Looks up the loss between two fragments, scanning the shorter of the
    /// two adjacency lists.
    pub fn get_loss(&self, source: FragmentKey, target: FragmentKey) -> Option<LossKey> {
        let s = self.fragment(source);
        let t = self.fragment(target);
        if s.outgoing.len() <= t.incoming.len() {
            s.outgoing
                .iter()
                .copied()
                .find(|&l| self.loss(l).target == target)
        } else {
            t.incoming
                .iter()
                .copied()
                .find(|&l| self.loss(l).source == source)
        }
    }

    /// Adds the loss source -> target with the elemental difference as its
    /// formula. Idempotent: if the loss already exists it is returned
    /// unchanged. Panics if the target formula is not contained in the
    /// source formula.
    pub fn add_loss(&mut self, source: FragmentKey, target: FragmentKey) -> LossKey {
        if let Some(existing) = self.get_loss(source, target) {
            return existing;
        }
        let formula = self
            .fragment(source)
            .formula
            .checked_sub(&self.fragment(target).formula)
            .unwrap_or_else(|| {
                panic!(
                    "cannot add loss: {} is no subformula of {}",
                    self.fragment(target).formula,
                    self.fragment(source).formula
                )
            });
        self.add_loss_with_formula(source, target, formula)
    }

    /// Variant with an explicit loss formula, used for pseudo edges whose
    /// endpoints have no meaningful elemental difference.
    pub fn add_loss_with_formula(
        &mut self,
        source: FragmentKey,
        target: FragmentKey,
        formula: MolecularFormula,
    ) -> LossKey {
        if let Some(existing) = self.get_loss(source, target) {
            return existing;
        }
        let key = match self.free_losses.pop() {
            Some(k) => k,
            None => {
                let k = LossKey(self.losses.len() as u32);
                self.losses.push(None);
                k
            }
        };
        let source_offset = self.fragment(source).outgoing.len() as i32;
        let target_offset = self.fragment(target).incoming.len() as i32;
        self.losses[key.0 as usize] = Some(Loss {
            key,
            source,
            target,
            formula,
            weight: 0.0,
            source_offset,
            target_offset,
            annotations: AnnotationValues::default(),
        });
        self.fragment_mut(source).outgoing.push(key);
        self.fragment_mut(target).incoming.push(key);
        self.edge_count += 1;
        key
    }

    pub fn set_loss_weight(&mut self, key: LossKey, weight: f64) {
        self.loss_mut(key).weight = weight;
    }

    /// Deletes a loss in O(1) by swapping it with the tail of both
    /// adjacency lists.
    pub fn delete_loss(&mut self, key: LossKey) {
        self.unlink_outgoing(key);
        self.unlink_incoming(key);
        self.release_loss(key);
        self.edge_count -= 1;
    }

    /// Order-preserving variant of `delete_loss`: the source's remaining
    /// children keep their relative order.
    pub fn delete_loss_keep_order(&mut self, key: LossKey) {
        self.unlink_outgoing_keep_order(key);
        self.unlink_incoming(key);
        self.release_loss(key);
        self.edge_count -= 1;
    }

    /// Deletes a fragment and all incident losses. The last vertex of the
    /// ordering takes over the freed vertex id.
    pub fn delete_fragment(&mut self, key: FragmentKey) {
        let vid = self.fragment(key).vertex_id();
        let incoming = self.fragment(key).incoming.clone();
        let outgoing = self.fragment(key).outgoing.clone();
        self.edge_count -= incoming.len() + outgoing.len();
        for l in incoming {
            self.unlink_outgoing(l);
            self.release_loss(l);
        }
        for l in outgoing {
            self.unlink_incoming(l);
            self.release_loss(l);
        }
        let last = self.order.len() - 1;
        self.order.swap(vid, last);
        self.order.pop();
        if vid < self.order.len() {
            let moved = self.order[vid];
            self.fragment_mut(moved).vertex_id = vid as i32;
        }
        self.release_fragment(key);
    }

    /// Deletes a batch of fragments while keeping the relative order of the
    /// survivors. Surviving vertices are compacted to the left; the
    /// returned pairs record every (old vertex id, new vertex id) move so
    /// callers can remap external per-vertex tables.
    pub fn delete_fragments_keep_topological_order(
        &mut self,
        todelete: &[FragmentKey],
    ) -> Vec<(usize, usize)> {
        for &key in todelete {
            let incoming = self.fragment(key).incoming.clone();
            let outgoing = self.fragment(key).outgoing.clone();
            self.edge_count -= incoming.len() + outgoing.len();
            for l in incoming {
                self.unlink_outgoing_keep_order(l);
                self.release_loss(l);
            }
            for l in outgoing {
                self.unlink_incoming(l);
                self.release_loss(l);
            }
            self.release_fragment(key);
        }
        let mut remap = Vec::new();
        let mut write = 0usize;
        for read in 0..self.order.len() {
            let key = self.order[read];
            if self.fragments[key.0 as usize].is_none() {
                continue;
            }
            if write != read {
                remap.push((read, write));
                self.order[write] = key;
            }
            self.fragment_mut(key).vertex_id = write as i32;
            write += 1;
        }
        self.order.truncate(write);
        remap
    }

    /// Replaces the vertex ordering. The new order must be a permutation of
    /// the current vertices.
    pub fn reorder_vertices(&mut self, new_order: Vec<FragmentKey>) {
        assert_eq!(
            new_order.len(),
            self.order.len(),
            "reorder must cover every vertex"
        );
        self.order = new_order;
        for vid in 0..self.order.len() {
            let key = self.order[vid];
            self.fragment_mut(key).vertex_id = vid as i32;
        }
    }

    /// Replaces the child ordering of one fragment. The new list must be a
    /// permutation of the current outgoing losses.
    pub(crate) fn set_outgoing_order(&mut self, key: FragmentKey, new_out: Vec<LossKey>) {
        debug_assert_eq!(new_out.len(), self.fragment(key).outgoing.len());
        for (i, &l) in new_out.iter().enumerate() {
            self.loss_mut(l).source_offset = i as i32;
        }
        self.fragment_mut(key).outgoing = new_out;
    }

    /// Checks the vertex-id and adjacency-offset invariants. Intended for
    /// tests and debug assertions after structural surgery.
    pub fn is_valid_numbered(&self) -> bool {
        for (vid, &key) in self.order.iter().enumerate() {
            match self.fragments.get(key.0 as usize) {
                Some(Some(f)) => {
                    if f.vertex_id != vid as i32 {
                        return false;
                    }
                    for (i, &l) in f.outgoing.iter().enumerate() {
                        let loss = self.loss(l);
                        if loss.source != key || loss.source_offset != i as i32 {
                            return false;
                        }
                    }
                    for (i, &l) in f.incoming.iter().enumerate() {
                        let loss = self.loss(l);
                        if loss.target != key || loss.target_offset != i as i32 {
                            return false;
                        }
                    }
                }
                _ => return false,
            }
        }
        true
    }

    fn unlink_outgoing(&mut self, loss_key: LossKey) {
        let (source, offset) = {
            let l = self.loss(loss_key);
            (l.source, l.source_offset as usize)
        };
        let moved = {
            let frag = self.fragment_mut(source);
            frag.outgoing.swap_remove(offset);
            frag.outgoing.get(offset).copied()
        };
        if let Some(m) = moved {
            self.loss_mut(m).source_offset = offset as i32;
        }
    }

    fn unlink_incoming(&mut self, loss_key: LossKey) {
        let (target, offset) = {
            let l = self.loss(loss_key);
            (l.target, l.target_offset as usize)
        };
        let moved = {
            let frag = self.fragment_mut(target);
            frag.incoming.swap_remove(offset);
            frag.incoming.get(offset).copied()
        };
        if let Some(m) = moved {
            self.loss_mut(m).target_offset = offset as i32;
        }
    }

    /// Order-preserving variant: the source's remaining children keep their
    /// relative order, at the cost of shifting every later offset.
    fn unlink_outgoing_keep_order(&mut self, loss_key: LossKey) {
        let (source, offset) = {
            let l = self.loss(loss_key);
            (l.source, l.source_offset as usize)
        };
        let shifted: Vec<LossKey> = {
            let frag = self.fragment_mut(source);
            frag.outgoing.remove(offset);
            frag.outgoing[offset..].to_vec()
        };
        for (i, l) in shifted.into_iter().enumerate() {
            self.loss_mut(l).source_offset = (offset + i) as i32;
        }
    }

    fn release_loss(&mut self, key: LossKey) {
        let slot = &mut self.losses[key.0 as usize];
        debug_assert!(slot.is_some(), "double free of loss {:?}", key);
        *slot = None;
        self.free_losses.push(key);
    }

    fn release_fragment(&mut self, key: FragmentKey) {
        let slot = &mut self.fragments[key.0 as usize];
        debug_assert!(slot.is_some(), "double free of fragment {:?}", key);
        *slot = None;
        self.free_fragments.push(key);
    }

    // --- annotations ---

    pub fn annotations(&self) -> &TypedRegistry {
        &self.annotations
    }

    pub fn annotations_mut(&mut self) -> &mut TypedRegistry {
        &mut self.annotations
    }

    pub fn register_fragment_annotation<T: AnnotationValue>(&mut self) -> FragmentAnnotation<T> {
        FragmentAnnotation::new(self.fragment_registry.get_or_register::<T>())
    }

    pub fn fragment_annotation_handle<T: AnnotationValue>(&self) -> Option<FragmentAnnotation<T>> {
        self.fragment_registry
            .slot_of::<T>()
            .map(FragmentAnnotation::new)
    }

    /// Registers `Alias` as a second name for the slot of `Target`. Values
    /// written through either handle land in the same per-fragment slot;
    /// removing the alias later leaves the slot and its contents alone.
    pub fn alias_fragment_annotation<Alias, Target>(&mut self) -> Result<FragmentAnnotation<Alias>>
    where
        Alias: AnnotationValue,
        Target: AnnotationValue,
    {
        self.fragment_registry
            .alias::<Alias, Target>()
            .map(FragmentAnnotation::new)
    }

    pub fn get_fragment_annotation<T: AnnotationValue>(
        &self,
        handle: FragmentAnnotation<T>,
        key: FragmentKey,
    ) -> Option<&T> {
        self.fragment(key)
            .annotations
            .get(handle.slot)
            .and_then(|v| v.as_any().downcast_ref::<T>())
    }

    pub fn set_fragment_annotation<T: AnnotationValue>(
        &mut self,
        handle: FragmentAnnotation<T>,
        key: FragmentKey,
        value: T,
    ) {
        self.fragment_mut(key)
            .annotations
            .set(handle.slot, Some(Box::new(value)));
    }

    /// Drops the mapping for T and clears the slot on every fragment,
    /// unless T was an alias (then the underlying slot stays).
    pub fn remove_fragment_annotation<T: AnnotationValue>(&mut self) {
        if let Some((slot, alias)) = self.fragment_registry.remove::<T>() {
            if !alias {
                for f in self.fragments.iter_mut().flatten() {
                    f.annotations.set(slot, None);
                }
            }
        }
    }

    pub fn register_loss_annotation<T: AnnotationValue>(&mut self) -> LossAnnotation<T> {
        LossAnnotation::new(self.loss_registry.get_or_register::<T>())
    }

    pub fn loss_annotation_handle<T: AnnotationValue>(&self) -> Option<LossAnnotation<T>> {
        self.loss_registry.slot_of::<T>().map(LossAnnotation::new)
    }

    pub fn alias_loss_annotation<Alias, Target>(&mut self) -> Result<LossAnnotation<Alias>>
    where
        Alias: AnnotationValue,
        Target: AnnotationValue,
    {
        self.loss_registry
            .alias::<Alias, Target>()
            .map(LossAnnotation::new)
    }

    pub fn get_loss_annotation<T: AnnotationValue>(
        &self,
        handle: LossAnnotation<T>,
        key: LossKey,
    ) -> Option<&T> {
        self.loss(key)
            .annotations
            .get(handle.slot)
            .and_then(|v| v.as_any().downcast_ref::<T>())
    }

    pub fn set_loss_annotation<T: AnnotationValue>(
        &mut self,
        handle: LossAnnotation<T>,
        key: LossKey,
        value: T,
    ) {
        self.loss_mut(key)
            .annotations
            .set(handle.slot, Some(Box::new(value)));
    }

    pub fn remove_loss_annotation<T: AnnotationValue>(&mut self) {
        if let Some((slot, alias)) = self.loss_registry.remove::<T>() {
            if !alias {
                for l in self.losses.iter_mut().flatten() {
                    l.annotations.set(slot, None);
                }
            }
        }
    }

    pub fn fragment_annotation_registry(&self) -> &AnnotationRegistry {
        &self.fragment_registry
    }

    pub fn loss_annotation_registry(&self) -> &AnnotationRegistry {
        &self.loss_registry
    }
}
