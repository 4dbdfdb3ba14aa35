use crate::annotations::{
    AnnotatedPeak,
    Ms2MassDeviation,
    TreeStatistics,
    Whiteset,
};
use crate::decompose::{
    FormulaConstraints,
    MassDecomposer,
};
use crate::errors::{
    FtPipelineError,
    Result,
};
use crate::graph_builder::SubFormulaGraphBuilder;
use crate::input::{
    Decomposition,
    DecompositionList,
    ProcessedInput,
};
use crate::recalibrate::{
    BonusCeilingPenalty,
    HypothesisDrivenRecalibration,
    RecalibrationPenalty,
    SpectralRecalibration,
};
use crate::reduction::{
    GraphReduction,
    SimpleReduction,
};
use crate::scoring::{
    ChemicalPriorScorer,
    CommonFragmentsScore,
    CommonLossEdgeScorer,
    DBELossScorer,
    DecompositionScorer,
    FreeRadicalEdgeScorer,
    LossScorer,
    LossSizeScorer,
    MassDeviationVertexScorer,
    PeakIsNoiseScorer,
    PeakPairScorer,
    PeakScorer,
    PureCarbonNitrogenLossScorer,
    TreeSizeScorer,
};
use crate::tree_builder::{
    CriticalPathTreeBuilder,
    ExactTreeBuilder,
    IntergraphMapping,
    TreeBuilder,
    TreeBuilderResult,
};
use ftgraph::{
    FGraph,
    FTree,
    FragmentKey,
    LossKey,
};
use std::mem;
use std::time::Duration;
use tracing::warn;

/// The full analysis pipeline: decomposition, scoring, graph construction
/// and tree computation, with all scorers pluggable.
#[derive(Debug)]
pub struct FragmentationPatternAnalysis {
    pub root_scorers: Vec<Box<dyn DecompositionScorer>>,
    pub decomposition_scorers: Vec<Box<dyn DecompositionScorer>>,
    pub peak_scorers: Vec<Box<dyn PeakScorer>>,
    pub peak_pair_scorers: Vec<Box<dyn PeakPairScorer>>,
    pub loss_scorers: Vec<Box<dyn LossScorer>>,
    pub graph_builder: SubFormulaGraphBuilder,
    pub reduction: Box<dyn GraphReduction>,
    pub tree_builder: Box<dyn TreeBuilder>,
    pub heuristic_builder: Box<dyn TreeBuilder>,
    pub recalibration: HypothesisDrivenRecalibration,
    pub recalibration_penalty: Box<dyn RecalibrationPenalty>,
}

impl FragmentationPatternAnalysis {
    /// The standard scorer stack.
    pub fn default_analyzer() -> Self {
        Self {
            root_scorers: vec![
                Box::new(MassDeviationVertexScorer),
                Box::new(ChemicalPriorScorer::default()),
            ],
            decomposition_scorers: vec![
                Box::new(MassDeviationVertexScorer),
                Box::new(CommonFragmentsScore::default()),
            ],
            peak_scorers: vec![
                Box::new(PeakIsNoiseScorer::default()),
                Box::new(TreeSizeScorer::default()),
            ],
            peak_pair_scorers: vec![Box::new(LossSizeScorer::default())],
            loss_scorers: vec![
                Box::new(CommonLossEdgeScorer),
                Box::new(FreeRadicalEdgeScorer::default()),
                Box::new(DBELossScorer::default()),
                Box::new(PureCarbonNitrogenLossScorer::default()),
            ],
            graph_builder: SubFormulaGraphBuilder,
            reduction: Box::new(SimpleReduction),
            tree_builder: Box::new(ExactTreeBuilder::default()),
            heuristic_builder: Box::new(CriticalPathTreeBuilder),
            recalibration: HypothesisDrivenRecalibration::default(),
            recalibration_penalty: Box::new(BonusCeilingPenalty::default()),
        }
    }

    /// Fills the per-peak decomposition lists. Precursor candidates come
    /// from the declared formula, a whiteset, or de novo decomposition;
    /// fragment candidates are restricted to subformulas of the precursor
    /// candidates.
    pub fn perform_decomposition(&self, input: &mut ProcessedInput) -> Result<()> {
        let dev = input
            .annotations
            .get::<Ms2MassDeviation>()
            .copied()
            .unwrap_or_default();
        let ionizations = input.experiment.considered_ionizations();
        let precursor_mz = input.experiment.precursor_mz;

        let mut roots: Vec<Decomposition> = Vec::new();
        if let Some(formula) = input.experiment.molecular_formula {
            // a declared formula wins even when the measured mass disagrees
            let matching: Vec<_> = ionizations
                .iter()
                .copied()
                .filter(|ion| dev.allowed.in_error_window(precursor_mz, ion.add_to_mass(formula.mass())))
                .collect();
            let ions = if matching.is_empty() {
                warn!(
                    precursor_mz,
                    formula = %formula,
                    "declared formula does not match the precursor mass in any ion mode"
                );
                ionizations.clone()
            } else {
                matching
            };
            for ion in ions {
                roots.push(Decomposition {
                    formula,
                    ionization: ion,
                    score: 0.0,
                });
            }
        } else if let Some(whiteset) = input.annotations.get::<Whiteset>().cloned() {
            for formula in whiteset.formulas {
                for &ion in &ionizations {
                    if dev
                        .allowed
                        .in_error_window(precursor_mz, ion.add_to_mass(formula.mass()))
                    {
                        roots.push(Decomposition {
                            formula,
                            ionization: ion,
                            score: 0.0,
                        });
                    }
                }
            }
        } else {
            let constraints = FormulaConstraints::default_organic(precursor_mz + 1.0);
            let decomposer = MassDecomposer::new(&constraints);
            let window = dev.allowed.absolute_for(precursor_mz);
            for &ion in &ionizations {
                for formula in decomposer.decompose(ion.subtract_from_mass(precursor_mz), window) {
                    if formula.rdbe() < -0.5 {
                        continue;
                    }
                    roots.push(Decomposition {
                        formula,
                        ionization: ion,
                        score: 0.0,
                    });
                }
            }
        }
        if roots.is_empty() {
            return Err(FtPipelineError::NoDecomposition { mz: precursor_mz });
        }

        // fragment candidates: every subformula of some precursor candidate
        let constraints = FormulaConstraints::all_subsets_of(roots.iter().map(|d| &d.formula));
        let decomposer = MassDecomposer::new(&constraints);
        let parent = input.parent_index();
        for i in 0..parent {
            let peak_mz = input.peaks[i].mz;
            let window = dev.allowed.absolute_for(peak_mz);
            let mut list = DecompositionList::default();
            for &ion in &ionizations {
                for formula in decomposer.decompose(ion.subtract_from_mass(peak_mz), window) {
                    list.decompositions.push(Decomposition {
                        formula,
                        ionization: ion,
                        score: 0.0,
                    });
                }
            }
            input.decompositions[i] = list;
        }
        input.decompositions[parent] = DecompositionList {
            decompositions: roots,
        };

        // close neighbors must not claim the same fragment
        for i in 1..parent {
            let own_mz = input.peaks[i - 1].mz;
            let other_mz = input.peaks[i].mz;
            if other_mz - own_mz > 2.0 * dev.allowed.absolute_for(other_mz) {
                continue;
            }
            let (left, right) = input.decompositions.split_at_mut(i);
            left[i - 1].disjoin(&mut right[0], own_mz, other_mz);
        }
        Ok(())
    }

    /// Fills the peak and peak-pair score tables and scores every formula
    /// candidate. Decomposition lists end up sorted by descending score.
    pub fn perform_peak_scoring(&self, input: &mut ProcessedInput) {
        let n = input.peaks.len();
        input.scoring.resize(n);

        let mut peak_scores = mem::take(&mut input.scoring.peak_scores);
        for scorer in &self.peak_scorers {
            scorer.score(input, &mut peak_scores);
        }
        input.scoring.peak_scores = peak_scores;

        let mut pair_scores = mem::take(&mut input.scoring.peak_pair_scores);
        for scorer in &self.peak_pair_scorers {
            scorer.score(input, &mut pair_scores);
        }
        input.scoring.peak_pair_scores = pair_scores;

        // the lists are taken out so the scorers can borrow the input
        let mut lists = mem::take(&mut input.decompositions);
        let parent = input.parent_index();
        let prepared: Vec<_> = self
            .decomposition_scorers
            .iter()
            .map(|s| s.prepare(input))
            .collect();
        for (i, list) in lists.iter_mut().enumerate().take(parent) {
            let peak = input.peaks[i];
            for d in &mut list.decompositions {
                d.score = self
                    .decomposition_scorers
                    .iter()
                    .zip(&prepared)
                    .map(|(s, p)| s.score(&d.formula, d.ionization, &peak, input, p.as_ref()))
                    .sum();
            }
            list.decompositions
                .sort_by(|a, b| b.score.total_cmp(&a.score));
        }

        let prepared: Vec<_> = self.root_scorers.iter().map(|s| s.prepare(input)).collect();
        let parent_peak = *input.parent_peak();
        for d in &mut lists[parent].decompositions {
            d.score = self
                .root_scorers
                .iter()
                .zip(&prepared)
                .map(|(s, p)| s.score(&d.formula, d.ionization, &parent_peak, input, p.as_ref()))
                .sum();
        }
        lists[parent]
            .decompositions
            .sort_by(|a, b| b.score.total_cmp(&a.score));
        input.decompositions = lists;
    }

    /// Assigns every loss its weight: the target's candidate score, its
    /// peak score, the peak pair score of the mass difference and the loss
    /// scorers. Pseudo edges carry the precursor candidate score alone.
    pub fn perform_graph_scoring(&self, input: &ProcessedInput, graph: &mut FGraph) {
        let prepared: Vec<_> = self.loss_scorers.iter().map(|s| s.prepare(input)).collect();
        let handle = graph.fragment_annotation_handle::<Decomposition>();
        let candidate_score = |key: FragmentKey| {
            handle
                .and_then(|h| graph.get_fragment_annotation(h, key))
                .map(|d| d.score)
                .unwrap_or(0.0)
        };

        let mut weights: Vec<(LossKey, f64)> = Vec::with_capacity(graph.number_of_edges());
        for loss in graph.losses() {
            let weight = if graph.is_pseudo_root(loss.source()) {
                candidate_score(loss.target())
            } else {
                let target = graph.fragment(loss.target());
                let source = graph.fragment(loss.source());
                let tpid = target.peak_id() as usize;
                let spid = source.peak_id() as usize;
                let mut w = candidate_score(loss.target())
                    + input.scoring.peak_scores[tpid]
                    + input.scoring.peak_pair_scores[tpid][spid];
                for (scorer, p) in self.loss_scorers.iter().zip(&prepared) {
                    w += scorer.score(loss.formula(), input, p.as_ref());
                }
                w
            };
            weights.push((loss.key(), weight));
        }
        for (key, weight) in weights {
            graph.set_loss_weight(key, weight);
        }
    }

    /// Renumbers the vertices so every edge points from a lower to a higher
    /// vertex id, and compacts the colors to a dense range starting at 0.
    pub fn ensure_topological_order(&self, graph: &mut FGraph) {
        let mut keys: Vec<FragmentKey> = graph
            .fragment_keys()
            .filter(|&k| !graph.is_pseudo_root(k))
            .collect();
        // edges always point from heavier to lighter peaks
        keys.sort_by(|&a, &b| {
            let fa = graph.fragment(a);
            let fb = graph.fragment(b);
            fb.peak_id()
                .cmp(&fa.peak_id())
                .then_with(|| fb.formula().mass().total_cmp(&fa.formula().mass()))
        });
        let mut order = vec![graph.pseudo_root()];
        order.extend(keys);
        graph.reorder_vertices(order);

        let mut colors: Vec<i32> = graph
            .fragments()
            .map(|f| f.color())
            .filter(|&c| c >= 0)
            .collect();
        colors.sort_unstable();
        colors.dedup();
        let keys: Vec<FragmentKey> = graph.fragment_keys().collect();
        for key in keys {
            let color = graph.fragment(key).color();
            if color < 0 {
                continue;
            }
            if let Ok(rank) = colors.binary_search(&color) {
                graph.set_color(key, rank as i32);
            }
        }
        debug_assert!(graph.is_topologically_ordered());
    }

    /// Builds and scores the fragmentation graph of one precursor
    /// candidate, ready for tree computation.
    pub fn build_graph(&self, input: &ProcessedInput, candidate: &Decomposition) -> FGraph {
        let mut graph = self.graph_builder.build(input, candidate);
        self.perform_graph_scoring(input, &mut graph);
        self.ensure_topological_order(&mut graph);
        self.reduction.reduce(&mut graph, f64::NEG_INFINITY);
        graph
    }

    pub fn compute_tree(
        &self,
        input: &ProcessedInput,
        graph: &mut FGraph,
        score_lower_bound: f64,
        time_limit: Option<Duration>,
    ) -> Result<TreeBuilderResult> {
        if score_lower_bound.is_finite() {
            self.reduction.reduce(graph, score_lower_bound);
        }
        self.tree_builder
            .solve(input, graph, score_lower_bound, time_limit)
    }

    pub fn compute_tree_heuristically(
        &self,
        input: &ProcessedInput,
        graph: &FGraph,
    ) -> Result<TreeBuilderResult> {
        self.heuristic_builder
            .solve(input, graph, f64::NEG_INFINITY, None)
    }

    /// Recomputes the tree weight from the scoring tables and makes the
    /// recomputed value authoritative. A drift beyond rounding noise means
    /// the tables and the tree went out of sync.
    pub fn recalculate_scores(&self, input: &ProcessedInput, tree: &mut FTree) -> f64 {
        let root_prepared: Vec<_> = self.root_scorers.iter().map(|s| s.prepare(input)).collect();
        let vertex_prepared: Vec<_> = self
            .decomposition_scorers
            .iter()
            .map(|s| s.prepare(input))
            .collect();
        let loss_prepared: Vec<_> = self.loss_scorers.iter().map(|s| s.prepare(input)).collect();

        let mut total = 0.0;
        for f in tree.fragments() {
            let pid = f.peak_id();
            if pid < 0 || pid as usize >= input.peaks.len() {
                continue;
            }
            let peak = input.peaks[pid as usize];
            if f.key() == tree.root() {
                total += self
                    .root_scorers
                    .iter()
                    .zip(&root_prepared)
                    .map(|(s, p)| s.score(f.formula(), f.ionization(), &peak, input, p.as_ref()))
                    .sum::<f64>();
                continue;
            }
            total += input.scoring.peak_scores[pid as usize];
            total += self
                .decomposition_scorers
                .iter()
                .zip(&vertex_prepared)
                .map(|(s, p)| s.score(f.formula(), f.ionization(), &peak, input, p.as_ref()))
                .sum::<f64>();
            if let Some(loss_key) = tree.incoming_loss(f.key()) {
                let loss = tree.loss(loss_key);
                let spid = tree.fragment(loss.source()).peak_id() as usize;
                total += input.scoring.peak_pair_scores[pid as usize][spid];
                for (scorer, p) in self.loss_scorers.iter().zip(&loss_prepared) {
                    total += scorer.score(loss.formula(), input, p.as_ref());
                }
            }
        }
        let drift = (total - tree.tree_weight()).abs();
        if drift > 1e-4 {
            warn!(
                tree_weight = tree.tree_weight(),
                recomputed = total,
                "tree weight drifted from the scoring tables"
            );
        }
        tree.set_tree_weight(total);
        total
    }

    /// Explained intensity and peak ratio of a tree, parent peak excluded.
    pub fn tree_statistics(&self, input: &ProcessedInput, tree: &FTree) -> TreeStatistics {
        let parent = input.parent_index();
        let mut explained = 0.0;
        let mut count = 0usize;
        for f in tree.fragments() {
            let pid = f.peak_id();
            if pid < 0 || pid as usize >= parent {
                continue;
            }
            explained += input.peaks[pid as usize].relative_intensity;
            count += 1;
        }
        let total = input.total_fragment_intensity();
        TreeStatistics {
            explained_intensity: if total > 0.0 { explained / total } else { 1.0 },
            ratio_of_explained_peaks: if parent > 0 {
                count as f64 / parent as f64
            } else {
                1.0
            },
        }
    }

    /// Number of fragment peaks the tree explains.
    pub fn explained_peak_count(&self, input: &ProcessedInput, tree: &FTree) -> usize {
        let parent = input.parent_index();
        tree.fragments()
            .filter(|f| f.peak_id() >= 0 && (f.peak_id() as usize) < parent)
            .count()
    }

    /// Final polish before a tree is handed to the caller: peak annotations
    /// and candidate scores carried over from the graph, summary statistics
    /// attached, children ordered canonically.
    pub fn make_tree_release_ready(
        &self,
        input: &ProcessedInput,
        graph: &FGraph,
        tree: &mut FTree,
    ) {
        let mapping = IntergraphMapping::build(graph, tree);
        let graph_decomp = graph.fragment_annotation_handle::<Decomposition>();
        let peak_handle = tree.register_fragment_annotation::<AnnotatedPeak>();
        let decomp_handle = tree.register_fragment_annotation::<Decomposition>();
        let recalibration = input
            .annotations
            .get::<SpectralRecalibration>()
            .copied()
            .unwrap_or_else(SpectralRecalibration::none);

        let keys: Vec<FragmentKey> = tree.fragment_keys().collect();
        for key in keys {
            let pid = tree.fragment(key).peak_id();
            if pid >= 0 && (pid as usize) < input.peaks.len() {
                let peak = input.peaks[pid as usize];
                tree.set_fragment_annotation(
                    peak_handle,
                    key,
                    AnnotatedPeak {
                        mz: peak.mz,
                        recalibrated_mz: recalibration.recalibrate_mz(peak.mz),
                        relative_intensity: peak.relative_intensity,
                    },
                );
            }
            if let Some(h) = graph_decomp {
                if let Some(d) = mapping
                    .graph_key(key)
                    .and_then(|g| graph.get_fragment_annotation(h, g))
                    .cloned()
                {
                    tree.set_fragment_annotation(decomp_handle, key, d);
                }
            }
        }
        let stats = self.tree_statistics(input, tree);
        tree.annotations_mut().set(stats);
        tree.normalize_structure();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Ms2Experiment;
    use ftgraph::{
        Ionization,
        MolecularFormula,
    };

    fn formula(s: &str) -> MolecularFormula {
        MolecularFormula::parse(s).unwrap()
    }

    fn glucose_experiment() -> Ms2Experiment {
        let mut exp = Ms2Experiment::new("glucose", 181.0707);
        exp.ionization = Some(Ionization::Protonated);
        exp.spectra = vec![vec![
            (163.0601, 500.0),
            (145.0495, 300.0),
            (85.0284, 800.0),
        ]];
        exp
    }

    #[test]
    fn de_novo_decomposition_finds_glucose() {
        let analysis = FragmentationPatternAnalysis::default_analyzer();
        let mut input = ProcessedInput::from_experiment(glucose_experiment()).unwrap();
        analysis.perform_decomposition(&mut input).unwrap();
        let roots = input.root_decompositions();
        assert!(roots
            .decompositions
            .iter()
            .any(|d| d.formula == formula("C6H12O6")));
        // water loss peak decomposes to C6H10O5
        assert!(input.decompositions[2]
            .decompositions
            .iter()
            .any(|d| d.formula == formula("C6H10O5")));
    }

    #[test]
    fn declared_formula_skips_de_novo() {
        let analysis = FragmentationPatternAnalysis::default_analyzer();
        let mut exp = glucose_experiment();
        exp.molecular_formula = Some(formula("C6H12O6"));
        let mut input = ProcessedInput::from_experiment(exp).unwrap();
        analysis.perform_decomposition(&mut input).unwrap();
        assert_eq!(input.root_decompositions().len(), 1);
        assert_eq!(
            input.root_decompositions().decompositions[0].formula,
            formula("C6H12O6")
        );
    }

    #[test]
    fn whiteset_restricts_root_candidates() {
        let analysis = FragmentationPatternAnalysis::default_analyzer();
        let mut input = ProcessedInput::from_experiment(glucose_experiment()).unwrap();
        input.annotations.set(Whiteset {
            formulas: vec![formula("C6H12O6"), formula("C10H20")],
        });
        analysis.perform_decomposition(&mut input).unwrap();
        // C10H20 misses the precursor mass by far
        assert_eq!(input.root_decompositions().len(), 1);
        assert_eq!(
            input.root_decompositions().decompositions[0].formula,
            formula("C6H12O6")
        );
    }

    #[test]
    fn no_candidate_is_an_error() {
        let analysis = FragmentationPatternAnalysis::default_analyzer();
        let mut input = ProcessedInput::from_experiment(glucose_experiment()).unwrap();
        input.annotations.set(Whiteset {
            formulas: vec![formula("C10H20")],
        });
        assert!(matches!(
            analysis.perform_decomposition(&mut input),
            Err(FtPipelineError::NoDecomposition { .. })
        ));
    }

    #[test]
    fn peak_scoring_sorts_candidates() {
        let analysis = FragmentationPatternAnalysis::default_analyzer();
        let mut input = ProcessedInput::from_experiment(glucose_experiment()).unwrap();
        analysis.perform_decomposition(&mut input).unwrap();
        analysis.perform_peak_scoring(&mut input);
        assert_eq!(input.scoring.peak_scores.len(), input.peaks.len());
        for list in &input.decompositions {
            for w in list.decompositions.windows(2) {
                assert!(w[0].score >= w[1].score);
            }
        }
    }

    #[test]
    fn glucose_tree_end_to_end() {
        let analysis = FragmentationPatternAnalysis::default_analyzer();
        let mut exp = glucose_experiment();
        exp.molecular_formula = Some(formula("C6H12O6"));
        let mut input = ProcessedInput::from_experiment(exp).unwrap();
        analysis.perform_decomposition(&mut input).unwrap();
        analysis.perform_peak_scoring(&mut input);
        let candidate = input.root_decompositions().decompositions[0].clone();
        let mut graph = analysis.build_graph(&input, &candidate);
        assert!(graph.is_topologically_ordered());

        let result = analysis
            .compute_tree(&input, &mut graph, f64::NEG_INFINITY, None)
            .unwrap();
        let mut tree = result.tree;
        assert!(tree.is_valid_tree());
        assert_eq!(tree.fragment(tree.root()).formula(), &formula("C6H12O6"));
        // the intense water loss peak must be explained
        assert!(tree
            .fragments()
            .any(|f| f.formula() == &formula("C6H10O5")));

        let before = tree.tree_weight();
        let recomputed = analysis.recalculate_scores(&input, &mut tree);
        assert!((recomputed - before).abs() < 1e-6);
        assert_eq!(tree.tree_weight(), recomputed);

        analysis.make_tree_release_ready(&input, &graph, &mut tree);
        let stats = tree.annotations().get::<TreeStatistics>().unwrap();
        assert!(stats.explained_intensity > 0.0);
        let handle = tree.fragment_annotation_handle::<AnnotatedPeak>().unwrap();
        let root_peak = tree.get_fragment_annotation(handle, tree.root()).unwrap();
        assert_eq!(root_peak.mz, 181.0707);
    }

    #[test]
    fn colors_are_compacted_to_a_dense_range() {
        let analysis = FragmentationPatternAnalysis::default_analyzer();
        let mut exp = glucose_experiment();
        exp.molecular_formula = Some(formula("C6H12O6"));
        let mut input = ProcessedInput::from_experiment(exp).unwrap();
        analysis.perform_decomposition(&mut input).unwrap();
        analysis.perform_peak_scoring(&mut input);
        let candidate = input.root_decompositions().decompositions[0].clone();
        let graph = analysis.build_graph(&input, &candidate);
        let mut colors: Vec<i32> = graph
            .fragments()
            .map(|f| f.color())
            .filter(|&c| c >= 0)
            .collect();
        colors.sort_unstable();
        colors.dedup();
        for (rank, &c) in colors.iter().enumerate() {
            assert_eq!(rank as i32, c);
        }
    }
}
