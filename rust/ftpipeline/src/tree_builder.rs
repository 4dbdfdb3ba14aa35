use crate::errors::{
    FtPipelineError,
    Result,
};
use crate::input::ProcessedInput;
use ftgraph::{
    FGraph,
    FTree,
    FragmentKey,
    Ionization,
    LossKey,
    MolecularFormula,
};
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::{
    Duration,
    Instant,
};
use tracing::warn;

/// Result of one tree computation. `is_optimal` is false for heuristic
/// solutions and for exact runs that had to fall back.
#[derive(Debug)]
pub struct TreeBuilderResult {
    pub tree: FTree,
    pub is_optimal: bool,
}

/// Extracts the maximum-weight colorful arborescence from a scored graph.
/// Implementations must be swappable; external solvers plug in here.
pub trait TreeBuilder: Debug + Send + Sync {
    fn solve(
        &self,
        input: &ProcessedInput,
        graph: &FGraph,
        score_lower_bound: f64,
        time_limit: Option<Duration>,
    ) -> Result<TreeBuilderResult>;

    fn is_thread_safe(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str;
}

/// Matches tree vertices back to graph vertices by formula and ion mode,
/// for transferring annotations after extraction.
#[derive(Debug, Default)]
pub struct IntergraphMapping {
    tree_to_graph: HashMap<FragmentKey, FragmentKey>,
}

impl IntergraphMapping {
    pub fn build(graph: &FGraph, tree: &FTree) -> Self {
        let mut by_signature: HashMap<(MolecularFormula, Ionization), FragmentKey> =
            HashMap::new();
        for f in graph.fragments() {
            if graph.is_pseudo_root(f.key()) {
                continue;
            }
            by_signature.insert((*f.formula(), f.ionization()), f.key());
        }
        let mut tree_to_graph = HashMap::new();
        for f in tree.fragments() {
            if let Some(&g) = by_signature.get(&(*f.formula(), f.ionization())) {
                tree_to_graph.insert(f.key(), g);
            }
        }
        Self { tree_to_graph }
    }

    pub fn graph_key(&self, tree_key: FragmentKey) -> Option<FragmentKey> {
        self.tree_to_graph.get(&tree_key).copied()
    }
}

/// Builds the FTree for a set of chosen graph edges forming an
/// arborescence below `root`. Colors, peak ids and edge weights are
/// carried over; the tree weight becomes root score plus edge sum.
fn extract_tree(
    graph: &FGraph,
    root: FragmentKey,
    edges: &[LossKey],
    root_score: f64,
) -> FTree {
    let root_frag = graph.fragment(root);
    let mut tree = FTree::new(*root_frag.formula(), root_frag.ionization());
    tree.set_root_score(root_score);
    let tree_root = tree.root();
    tree.set_color(tree_root, root_frag.color());
    tree.set_peak_id(tree_root, root_frag.peak_id());

    let mut children_of: HashMap<FragmentKey, Vec<LossKey>> = HashMap::new();
    for &l in edges {
        children_of.entry(graph.loss(l).source()).or_default().push(l);
    }
    let mut total = root_score;
    let mut stack = vec![(root, tree_root)];
    while let Some((graph_key, tree_key)) = stack.pop() {
        let Some(child_edges) = children_of.get(&graph_key) else {
            continue;
        };
        for &l in child_edges {
            let loss = graph.loss(l);
            let target = graph.fragment(loss.target());
            let child = tree.add_fragment(tree_key, *target.formula(), target.ionization());
            tree.set_color(child, target.color());
            tree.set_peak_id(child, target.peak_id());
            let tree_loss = tree
                .get_loss(tree_key, child)
                .unwrap_or_else(|| panic!("freshly added tree edge must exist"));
            tree.set_loss_weight(tree_loss, loss.weight());
            total += loss.weight();
            stack.push((loss.target(), child));
        }
    }
    tree.set_tree_weight(total);
    tree
}

fn deadline_exceeded(start: Instant, limit: Option<Duration>) -> bool {
    limit.is_some_and(|l| start.elapsed() > l)
}

/// Critical path heuristic: greedily attaches the best-scoring chain of
/// unused colors to the partial tree until no chain improves the score.
#[derive(Debug, Clone, Copy, Default)]
pub struct CriticalPathTreeBuilder;

impl CriticalPathTreeBuilder {
    fn solve_for_root(&self, graph: &FGraph, root: FragmentKey) -> (Vec<LossKey>, f64) {
        let n = graph.number_of_vertices();
        let max_color = graph.max_color().max(0) as usize;
        let mut in_tree = vec![false; n];
        let mut used_color = vec![false; max_color + 1];
        in_tree[graph.fragment(root).vertex_id()] = true;
        if graph.fragment(root).color() >= 0 {
            used_color[graph.fragment(root).color() as usize] = true;
        }
        let mut chosen: Vec<LossKey> = Vec::new();
        let mut total = 0.0;

        loop {
            // best downward chain per vertex over unused colors
            let mut down = vec![0.0; n];
            let mut down_edge: Vec<Option<LossKey>> = vec![None; n];
            for vid in (0..n).rev() {
                let key = graph.fragment_at(vid);
                for &l in graph.outgoing(key) {
                    let loss = graph.loss(l);
                    let target = graph.fragment(loss.target());
                    let color = target.color();
                    if color < 0 || used_color[color as usize] || in_tree[target.vertex_id()] {
                        continue;
                    }
                    let via = loss.weight() + down[target.vertex_id()];
                    if via > down[vid] {
                        down[vid] = via;
                        down_edge[vid] = Some(l);
                    }
                }
            }

            // best attachment point on the current tree
            let mut best: Option<(LossKey, f64)> = None;
            for loss in graph.losses() {
                let source = graph.fragment(loss.source());
                let target = graph.fragment(loss.target());
                if !in_tree[source.vertex_id()] || in_tree[target.vertex_id()] {
                    continue;
                }
                let color = target.color();
                if color < 0 || used_color[color as usize] {
                    continue;
                }
                let via = loss.weight() + down[target.vertex_id()];
                if best.is_none() || via > best.unwrap_or((loss.key(), f64::NEG_INFINITY)).1 {
                    best = Some((loss.key(), via));
                }
            }
            let Some((entry, gain)) = best else {
                break;
            };
            if gain <= 0.0 {
                break;
            }

            // walk the chain downwards while it keeps paying off
            let mut edge = entry;
            loop {
                let loss = graph.loss(edge);
                let target = graph.fragment(loss.target());
                let color = target.color();
                if color < 0 || used_color[color as usize] {
                    break;
                }
                chosen.push(edge);
                total += loss.weight();
                in_tree[target.vertex_id()] = true;
                used_color[color as usize] = true;
                match down_edge[target.vertex_id()] {
                    Some(next) => edge = next,
                    None => break,
                }
            }
        }
        (chosen, total)
    }
}

impl TreeBuilder for CriticalPathTreeBuilder {
    fn solve(
        &self,
        _input: &ProcessedInput,
        graph: &FGraph,
        _score_lower_bound: f64,
        _time_limit: Option<Duration>,
    ) -> Result<TreeBuilderResult> {
        let mut best: Option<FTree> = None;
        for root in graph.root_candidates().collect::<Vec<_>>() {
            let root_score = graph
                .root_loss(root)
                .map(|l| graph.loss(l).weight())
                .unwrap_or(0.0);
            let (edges, gain) = self.solve_for_root(graph, root);
            let score = root_score + gain;
            if best.as_ref().is_none_or(|t| score > t.tree_weight()) {
                best = Some(extract_tree(graph, root, &edges, root_score));
            }
        }
        let tree = best.ok_or(FtPipelineError::EmptyInput {
            context: "graph has no root candidate",
        })?;
        Ok(TreeBuilderResult {
            tree,
            is_optimal: false,
        })
    }

    fn name(&self) -> &'static str {
        "critical path heuristic"
    }
}

/// Exact maximum colorful subtree solver: dynamic programming over color
/// subsets. Exponential in the number of colors; above `max_colors` it
/// falls back to the heuristic and flags the result as non-optimal.
#[derive(Debug, Clone, Copy)]
pub struct ExactTreeBuilder {
    pub max_colors: usize,
}

impl Default for ExactTreeBuilder {
    fn default() -> Self {
        Self { max_colors: 16 }
    }
}

struct ColorDp<'a> {
    graph: &'a FGraph,
    // bit index per color, dense over the colors actually present
    color_bit: HashMap<i32, u32>,
    // tables[vid][mask]: best score of children subtrees below the vertex
    // covering exactly the colors in mask (vertex color excluded)
    tables: Vec<Vec<f64>>,
}

impl<'a> ColorDp<'a> {
    fn run(
        graph: &'a FGraph,
        start: Instant,
        time_limit: Option<Duration>,
    ) -> Result<ColorDp<'a>> {
        let mut colors: Vec<i32> = graph
            .fragments()
            .map(|f| f.color())
            .filter(|&c| c >= 0)
            .collect();
        colors.sort_unstable();
        colors.dedup();
        let color_bit: HashMap<i32, u32> = colors
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i as u32))
            .collect();
        let k = colors.len();
        let n = graph.number_of_vertices();
        let mut tables: Vec<Vec<f64>> = vec![Vec::new(); n];

        for vid in (0..n).rev() {
            let key = graph.fragment_at(vid);
            let frag = graph.fragment(key);
            if frag.color() < 0 {
                continue;
            }
            if deadline_exceeded(start, time_limit) {
                return Err(FtPipelineError::Timeout {
                    stage: "exact tree computation",
                    elapsed_ms: start.elapsed().as_millis() as u64,
                });
            }
            let own_bit = 1u32 << color_bit[&frag.color()];
            let mut table = vec![f64::NEG_INFINITY; 1 << k];
            table[0] = 0.0;
            for mask in 1u32..(1 << k) as u32 {
                if mask & own_bit != 0 {
                    continue;
                }
                let mut best = f64::NEG_INFINITY;
                // single child covering the whole mask
                for &l in graph.outgoing(key) {
                    let loss = graph.loss(l);
                    let target = graph.fragment(loss.target());
                    let tbit = 1u32 << color_bit[&target.color()];
                    if mask & tbit == 0 {
                        continue;
                    }
                    let below = tables[target.vertex_id()]
                        .get((mask ^ tbit) as usize)
                        .copied()
                        .unwrap_or(f64::NEG_INFINITY);
                    if below > f64::NEG_INFINITY {
                        let via = loss.weight() + below;
                        if via > best {
                            best = via;
                        }
                    }
                }
                // split the mask over two disjoint child groups
                let mut sub = (mask - 1) & mask;
                while sub > mask / 2 {
                    let a = table[sub as usize];
                    let b = table[(mask ^ sub) as usize];
                    if a > f64::NEG_INFINITY && b > f64::NEG_INFINITY && a + b > best {
                        best = a + b;
                    }
                    sub = (sub - 1) & mask;
                }
                table[mask as usize] = best;
            }
            tables[vid] = table;
        }
        Ok(ColorDp {
            graph,
            color_bit,
            tables,
        })
    }

    /// Best achievable children cover below a vertex, over all masks not
    /// containing the vertex's own color.
    fn best_cover(&self, key: FragmentKey) -> (u32, f64) {
        let frag = self.graph.fragment(key);
        let table = &self.tables[frag.vertex_id()];
        let mut best = (0u32, 0.0f64);
        for (mask, &score) in table.iter().enumerate() {
            if score > best.1 {
                best = (mask as u32, score);
            }
        }
        best
    }

    /// Re-derives the decisions behind `tables[v][cover]` and collects the
    /// chosen edges.
    fn collect_edges(&self, key: FragmentKey, cover: u32, edges: &mut Vec<LossKey>) {
        if cover == 0 {
            return;
        }
        let frag = self.graph.fragment(key);
        let table = &self.tables[frag.vertex_id()];
        let value = table[cover as usize];
        // single-child case
        for &l in self.graph.outgoing(key) {
            let loss = self.graph.loss(l);
            let target = self.graph.fragment(loss.target());
            let tbit = 1u32 << self.color_bit[&target.color()];
            if cover & tbit == 0 {
                continue;
            }
            let below = self.tables[target.vertex_id()]
                .get((cover ^ tbit) as usize)
                .copied()
                .unwrap_or(f64::NEG_INFINITY);
            if below > f64::NEG_INFINITY && loss.weight() + below == value {
                edges.push(l);
                self.collect_edges(loss.target(), cover ^ tbit, edges);
                return;
            }
        }
        // split case
        let mut sub = (cover - 1) & cover;
        while sub > 0 {
            let a = table[sub as usize];
            let b = table[(cover ^ sub) as usize];
            if a > f64::NEG_INFINITY && b > f64::NEG_INFINITY && a + b == value {
                self.collect_edges(key, sub, edges);
                self.collect_edges(key, cover ^ sub, edges);
                return;
            }
            sub = (sub - 1) & cover;
        }
        panic!("inconsistent tree extraction tables");
    }
}

impl TreeBuilder for ExactTreeBuilder {
    fn solve(
        &self,
        input: &ProcessedInput,
        graph: &FGraph,
        score_lower_bound: f64,
        time_limit: Option<Duration>,
    ) -> Result<TreeBuilderResult> {
        let color_count = {
            let mut colors: Vec<i32> = graph
                .fragments()
                .map(|f| f.color())
                .filter(|&c| c >= 0)
                .collect();
            colors.sort_unstable();
            colors.dedup();
            colors.len()
        };
        if color_count > self.max_colors {
            warn!(
                colors = color_count,
                cap = self.max_colors,
                "too many colors for the exact solver, falling back to the heuristic"
            );
            let mut result =
                CriticalPathTreeBuilder.solve(input, graph, score_lower_bound, time_limit)?;
            result.is_optimal = false;
            return Ok(result);
        }

        let start = Instant::now();
        let dp = ColorDp::run(graph, start, time_limit)?;
        let mut best: Option<FTree> = None;
        for root in graph.root_candidates().collect::<Vec<_>>() {
            let root_score = graph
                .root_loss(root)
                .map(|l| graph.loss(l).weight())
                .unwrap_or(0.0);
            let (cover, gain) = dp.best_cover(root);
            let score = root_score + gain;
            if best.as_ref().is_none_or(|t| score > t.tree_weight()) {
                let mut edges = Vec::new();
                dp.collect_edges(root, cover, &mut edges);
                best = Some(extract_tree(graph, root, &edges, root_score));
            }
        }
        let tree = best.ok_or(FtPipelineError::EmptyInput {
            context: "graph has no root candidate",
        })?;
        Ok(TreeBuilderResult {
            tree,
            is_optimal: true,
        })
    }

    fn name(&self) -> &'static str {
        "maximum colorful subtree"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Ms2Experiment;
    use crate::input::ProcessedInput;
    use ftgraph::Ionization;

    fn formula(s: &str) -> MolecularFormula {
        MolecularFormula::parse(s).unwrap()
    }

    fn dummy_input() -> ProcessedInput {
        let mut exp = Ms2Experiment::new("dummy", 181.0707);
        exp.spectra = vec![vec![(163.0601, 100.0)]];
        ProcessedInput::from_experiment(exp).unwrap()
    }

    /// Root C6H12O6 with a good water loss and a terrible alternative.
    fn simple_graph() -> (FGraph, f64) {
        let mut g = FGraph::new();
        let root = g.add_root_vertex(formula("C6H12O6"), Ionization::Protonated);
        g.set_color(root, 2);
        g.set_peak_id(root, 2);
        let a = g.add_fragment(formula("C6H10O5"), Ionization::Protonated);
        g.set_color(a, 1);
        g.set_peak_id(a, 1);
        let b = g.add_fragment(formula("C2H4O2"), Ionization::Protonated);
        g.set_color(b, 0);
        g.set_peak_id(b, 0);
        let root_score = 2.0;
        let rl = g.root_loss(root).unwrap();
        g.set_loss_weight(rl, root_score);
        let ra = g.add_loss(root, a);
        g.set_loss_weight(ra, 5.0);
        let rb = g.add_loss(root, b);
        g.set_loss_weight(rb, -3.0);
        let ab = g.add_loss(a, b);
        g.set_loss_weight(ab, -4.0);
        (g, root_score)
    }

    #[test]
    fn heuristic_keeps_only_profitable_chains() {
        let (g, root_score) = simple_graph();
        let input = dummy_input();
        let result = CriticalPathTreeBuilder
            .solve(&input, &g, f64::NEG_INFINITY, None)
            .unwrap();
        let tree = result.tree;
        assert_eq!(tree.number_of_vertices(), 2);
        assert_eq!(tree.number_of_edges(), 1);
        assert!((tree.tree_weight() - (root_score + 5.0)).abs() < 1e-9);
        assert!((tree.root_score() - root_score).abs() < 1e-9);
        assert!(!result.is_optimal);
        assert!(tree.is_valid_tree());
    }

    #[test]
    fn exact_solver_matches_on_small_graphs() {
        let (g, root_score) = simple_graph();
        let input = dummy_input();
        let result = ExactTreeBuilder::default()
            .solve(&input, &g, f64::NEG_INFINITY, None)
            .unwrap();
        assert!(result.is_optimal);
        assert!((result.tree.tree_weight() - (root_score + 5.0)).abs() < 1e-9);
        assert_eq!(result.tree.number_of_vertices(), 2);
    }

    /// A diamond where taking both branches separately beats any chain, to
    /// force the subset-split case of the DP.
    #[test]
    fn exact_solver_beats_the_single_chain() {
        let mut g = FGraph::new();
        let root = g.add_root_vertex(formula("C10H20O10"), Ionization::Protonated);
        g.set_color(root, 3);
        let a = g.add_fragment(formula("C6H10O5"), Ionization::Protonated);
        g.set_color(a, 2);
        let b = g.add_fragment(formula("C4H8O4"), Ionization::Protonated);
        g.set_color(b, 1);
        let c = g.add_fragment(formula("C2H4O2"), Ionization::Protonated);
        g.set_color(c, 0);
        let ra = g.add_loss(root, a);
        g.set_loss_weight(ra, 4.0);
        let rb = g.add_loss(root, b);
        g.set_loss_weight(rb, 4.0);
        let rc = g.add_loss(root, c);
        g.set_loss_weight(rc, 4.0);
        let ab = g.add_loss(a, b);
        g.set_loss_weight(ab, 1.0);
        let bc = g.add_loss(b, c);
        g.set_loss_weight(bc, 1.0);
        let input = dummy_input();
        let result = ExactTreeBuilder::default()
            .solve(&input, &g, f64::NEG_INFINITY, None)
            .unwrap();
        // star with three direct children: 12, chains cap out at 10
        assert!((result.tree.tree_weight() - 12.0).abs() < 1e-9);
        assert_eq!(result.tree.number_of_vertices(), 4);
        assert_eq!(result.tree.children(result.tree.root()).count(), 3);
        assert!(result.tree.is_valid_tree());
    }

    #[test]
    fn color_cap_triggers_heuristic_fallback() {
        let (g, _) = simple_graph();
        let input = dummy_input();
        let builder = ExactTreeBuilder { max_colors: 1 };
        let result = builder.solve(&input, &g, f64::NEG_INFINITY, None).unwrap();
        assert!(!result.is_optimal);
    }

    #[test]
    fn intergraph_mapping_matches_by_formula_and_ion() {
        let (g, _) = simple_graph();
        let input = dummy_input();
        let result = CriticalPathTreeBuilder
            .solve(&input, &g, f64::NEG_INFINITY, None)
            .unwrap();
        let mapping = IntergraphMapping::build(&g, &result.tree);
        for f in result.tree.fragments() {
            let gk = mapping.graph_key(f.key()).unwrap();
            assert_eq!(g.fragment(gk).formula(), f.formula());
        }
    }
}
