use ftgraph::{
    FGraph,
    FragmentKey,
    LossKey,
};
use std::fmt::Debug;

/// Shrinks a scored graph without touching any tree that could still beat
/// the lower bound. Runs after scoring and topological ordering.
pub trait GraphReduction: Debug + Send + Sync {
    fn reduce(&self, graph: &mut FGraph, lower_bound: f64);
}

/// Baseline reduction: drops minus-infinity edges, vertices that became
/// unreachable, and vertices whose best-case tree score cannot reach the
/// lower bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleReduction;

impl GraphReduction for SimpleReduction {
    fn reduce(&self, graph: &mut FGraph, lower_bound: f64) {
        remove_non_finite_edges(graph);
        remove_unreachable_vertices(graph);
        if lower_bound.is_finite() {
            prune_by_upper_bound(graph, lower_bound);
            remove_unreachable_vertices(graph);
        }
    }
}

fn remove_non_finite_edges(graph: &mut FGraph) {
    let bad: Vec<LossKey> = graph
        .losses()
        .filter(|l| l.weight() == f64::NEG_INFINITY || l.weight().is_nan())
        .map(|l| l.key())
        .collect();
    for key in bad {
        graph.delete_loss(key);
    }
}

fn remove_unreachable_vertices(graph: &mut FGraph) {
    loop {
        let todelete: Vec<FragmentKey> = graph
            .fragment_keys()
            .filter(|&k| !graph.is_pseudo_root(k) && graph.fragment(k).in_degree() == 0)
            .collect();
        if todelete.is_empty() {
            return;
        }
        graph.delete_fragments_keep_topological_order(&todelete);
    }
}

/// Upper bound pruning: a vertex can only be part of a tree scoring at
/// least `best path into v` plus `best per-color contribution below v`.
/// Root candidates are never pruned, their trivial one-vertex tree must
/// stay available.
fn prune_by_upper_bound(graph: &mut FGraph, lower_bound: f64) {
    debug_assert!(graph.is_topologically_ordered());
    let n = graph.number_of_vertices();
    if n == 0 {
        return;
    }
    let max_color = graph.max_color();
    if max_color < 0 {
        return;
    }

    // best path score from the pseudo-root into each vertex
    let mut best_in = vec![f64::NEG_INFINITY; n];
    best_in[graph.fragment(graph.pseudo_root()).vertex_id()] = 0.0;
    for vid in 0..n {
        let key = graph.fragment_at(vid);
        let from = best_in[vid];
        if from == f64::NEG_INFINITY {
            continue;
        }
        for &l in graph.outgoing(key) {
            let loss = graph.loss(l);
            let tvid = graph.fragment(loss.target()).vertex_id();
            let via = from + loss.weight();
            if via > best_in[tvid] {
                best_in[tvid] = via;
            }
        }
    }

    // optimistic per-color downward bound
    let mut down = vec![0.0; n];
    let mut per_color = vec![f64::NEG_INFINITY; (max_color + 1) as usize];
    for vid in (0..n).rev() {
        let key = graph.fragment_at(vid);
        for slot in per_color.iter_mut() {
            *slot = f64::NEG_INFINITY;
        }
        for &l in graph.outgoing(key) {
            let loss = graph.loss(l);
            let target = graph.fragment(loss.target());
            let color = target.color();
            if color < 0 {
                continue;
            }
            let via = loss.weight() + down[target.vertex_id()];
            if via > per_color[color as usize] {
                per_color[color as usize] = via;
            }
        }
        down[vid] = per_color
            .iter()
            .filter(|v| v.is_finite())
            .map(|v| v.max(0.0))
            .sum();
    }

    let root_candidates: Vec<FragmentKey> = graph.root_candidates().collect();
    let todelete: Vec<FragmentKey> = graph
        .fragment_keys()
        .filter(|&k| {
            if graph.is_pseudo_root(k) || root_candidates.contains(&k) {
                return false;
            }
            let vid = graph.fragment(k).vertex_id();
            best_in[vid] + down[vid] < lower_bound
        })
        .collect();
    if !todelete.is_empty() {
        graph.delete_fragments_keep_topological_order(&todelete);
    }
}
