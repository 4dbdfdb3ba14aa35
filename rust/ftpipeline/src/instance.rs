use crate::analysis::FragmentationPatternAnalysis;
use crate::annotations::{
    Beautified,
    NumberOfCandidates,
    Timeout,
    TreeSizeBonus,
    UnconsideredCandidatesUpperBound,
    UseHeuristic,
};
use crate::errors::{
    FtPipelineError,
    Result,
};
use crate::input::{
    Decomposition,
    ProcessedInput,
};
use crate::queue::DoubleEndWeightedQueue;
use crate::recalibrate::SpectralRecalibration;
use crate::scoring::TreeSizeScorer;
use ftgraph::{
    FGraph,
    FTree,
};
use rayon::prelude::*;
use std::time::Instant;
use tracing::{
    debug,
    warn,
};

/// Step by which the per-peak bonus grows when too little of the spectrum
/// is explained, and the total growth cap.
pub const TREE_SIZE_INCREASE: f64 = 1.0;
pub const MAX_TREESIZE_INCREASE: f64 = 3.0;

/// Quality gate for the tree size adjustment: one of the top trees has to
/// explain this much intensity or this many peaks.
pub const MIN_EXPLAINED_INTENSITY: f64 = 0.7;
pub const MIN_NUMBER_OF_EXPLAINED_PEAKS: usize = 15;

/// Ranks whose recalibration gain defines the bonus ceiling.
const PROTECTED_RANKS: usize = 10;

/// What the caller gets back: candidate trees by descending score.
#[derive(Debug)]
pub struct FinalResult {
    /// True when even the maximum tree size bonus could not make any
    /// candidate explain enough of the spectrum.
    pub canceled_due_to_low_score: bool,
    pub trees: Vec<FTree>,
}

struct RankedCandidate {
    candidate: Decomposition,
    heuristic_score: f64,
    tree: FTree,
}

/// Queue payload: the scored graph travels with the tree so the final
/// annotation transfer does not have to rebuild it. Evicted entries release
/// their graph, which keeps at most capacity graphs alive at a time.
struct ExactEntry {
    candidate: Decomposition,
    graph: FGraph,
    tree: FTree,
}

struct ScoredFinal {
    score: f64,
    candidate: Decomposition,
    graph: FGraph,
    tree: FTree,
    recalibration: SpectralRecalibration,
}

/// One unit of work: computes the best fragmentation trees for a single
/// preprocessed experiment. Heuristic pre-ranking, exact solving into a
/// bounded queue, recalibration and final annotation all happen here.
pub struct TreeComputationInstance<'a> {
    analysis: &'a FragmentationPatternAnalysis,
    input: ProcessedInput,
    n_candidates: usize,
    timeout: Timeout,
    start: Instant,
}

impl<'a> TreeComputationInstance<'a> {
    pub fn new(analysis: &'a FragmentationPatternAnalysis, input: ProcessedInput) -> Self {
        let n_candidates = input
            .annotations
            .get::<NumberOfCandidates>()
            .copied()
            .unwrap_or_default()
            .0
            .max(1);
        let timeout = input
            .annotations
            .get::<Timeout>()
            .copied()
            .unwrap_or_default();
        Self {
            analysis,
            input,
            n_candidates,
            timeout,
            start: Instant::now(),
        }
    }

    pub fn run(mut self) -> Result<FinalResult> {
        match self.analysis.perform_decomposition(&mut self.input) {
            Ok(()) => {}
            // no precursor candidate at all is an empty result, not an error
            Err(FtPipelineError::NoDecomposition { mz }) => {
                warn!(mz, "precursor mass has no formula candidate");
                return Ok(FinalResult {
                    canceled_due_to_low_score: true,
                    trees: Vec::new(),
                });
            }
            Err(e) => return Err(e),
        }
        self.analysis.perform_peak_scoring(&mut self.input);

        // heuristic ranking, growing the tree size bonus until the best
        // candidates explain enough of the spectrum
        let original_bonus = self
            .input
            .annotations
            .get::<TreeSizeBonus>()
            .map(|b| b.score)
            .unwrap_or(0.0);
        let mut bonus = original_bonus;
        let mut ranked;
        let canceled_due_to_low_score;
        loop {
            TreeSizeScorer::fast_replace(&mut self.input, bonus);
            ranked = self.rank_heuristically()?;
            if self.quality_reached(&ranked) {
                canceled_due_to_low_score = false;
                break;
            }
            if bonus - original_bonus >= MAX_TREESIZE_INCREASE {
                warn!(
                    experiment = %self.input.experiment.name,
                    "spectrum stays poorly explained at the maximum tree size bonus"
                );
                canceled_due_to_low_score = true;
                break;
            }
            bonus += TREE_SIZE_INCREASE;
            debug!(bonus, "raising the tree size bonus");
        }

        let use_heuristic = self
            .input
            .annotations
            .get::<UseHeuristic>()
            .copied()
            .unwrap_or_default();
        let precursor_mz = self.input.experiment.precursor_mz;
        let total_candidates = ranked.len();

        let (entries, considered) = if precursor_mz > use_heuristic.only_above_mz {
            // the heuristic solutions are final
            let considered = ranked.len().min(self.n_candidates);
            let entries: Vec<(f64, ExactEntry)> = ranked
                .into_iter()
                .take(considered)
                .map(|r| {
                    let graph = self.analysis.build_graph(&self.input, &r.candidate);
                    (
                        r.heuristic_score,
                        ExactEntry {
                            candidate: r.candidate,
                            graph,
                            tree: r.tree,
                        },
                    )
                })
                .collect();
            (entries, considered)
        } else {
            let gap_cutoff = precursor_mz > use_heuristic.use_above_mz;
            self.exact_phase(ranked, gap_cutoff)?
        };
        let remaining_candidates = total_candidates - considered;
        let lowest_considered_score = entries
            .last()
            .map(|(score, _)| *score)
            .unwrap_or(f64::NEG_INFINITY);

        let mut finals = self.recalibration_phase(entries)?;
        finals.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.candidate.formula.cmp(&b.candidate.formula))
        });
        finals.truncate(self.n_candidates);

        if finals.is_empty() {
            return Err(FtPipelineError::Timeout {
                stage: "tree computation instance",
                elapsed_ms: self.start.elapsed().as_millis() as u64,
            });
        }

        let node_boost = bonus - original_bonus;
        let beautified = if node_boost > 0.0 {
            Beautified::beautiful(node_boost)
        } else {
            Beautified::ugly()
        };
        let mut trees = Vec::with_capacity(finals.len());
        for entry in finals {
            self.input.annotations.set(entry.recalibration);
            let mut tree = entry.tree;
            tree.annotations_mut().set(beautified);
            tree.annotations_mut().set(UnconsideredCandidatesUpperBound {
                remaining_candidates,
                lowest_considered_score,
            });
            self.analysis.make_tree_release_ready(&self.input, &entry.graph, &mut tree);
            trees.push(tree);
        }
        Ok(FinalResult {
            canceled_due_to_low_score,
            trees,
        })
    }

    fn deadline_exceeded(&self) -> bool {
        self.timeout
            .per_instance()
            .is_some_and(|limit| self.start.elapsed() > limit)
    }

    /// Heuristic trees for every precursor candidate, best first.
    fn rank_heuristically(&self) -> Result<Vec<RankedCandidate>> {
        let candidates = self.input.root_decompositions().decompositions.clone();
        let solve = |candidate: Decomposition| -> Result<RankedCandidate> {
            let graph = self.analysis.build_graph(&self.input, &candidate);
            let result = self.analysis.compute_tree_heuristically(&self.input, &graph)?;
            Ok(RankedCandidate {
                heuristic_score: result.tree.tree_weight(),
                tree: result.tree,
                candidate,
            })
        };
        let mut ranked: Vec<RankedCandidate> =
            if self.analysis.heuristic_builder.is_thread_safe() {
                candidates.into_par_iter().map(solve).collect::<Result<_>>()?
            } else {
                candidates.into_iter().map(solve).collect::<Result<_>>()?
            };
        ranked.sort_by(|a, b| b.heuristic_score.total_cmp(&a.heuristic_score));
        Ok(ranked)
    }

    /// True when one of the five best candidates explains enough intensity
    /// or enough peaks.
    fn quality_reached(&self, ranked: &[RankedCandidate]) -> bool {
        let needed_peaks =
            MIN_NUMBER_OF_EXPLAINED_PEAKS.min(self.input.parent_index().saturating_sub(2));
        ranked.iter().take(5).any(|r| {
            let stats = self.analysis.tree_statistics(&self.input, &r.tree);
            stats.explained_intensity >= MIN_EXPLAINED_INTENSITY
                || self.analysis.explained_peak_count(&self.input, &r.tree) >= needed_peaks
        })
    }

    /// Exact trees, solved in heuristic order into a bounded queue. With
    /// `gap_cutoff`, a batch whose best heuristic score cannot reach the
    /// queue's lower bound even with the observed exact-over-heuristic gap
    /// ends the search early.
    fn exact_phase(
        &self,
        ranked: Vec<RankedCandidate>,
        gap_cutoff: bool,
    ) -> Result<(Vec<(f64, ExactEntry)>, usize)> {
        let mut queue = DoubleEndWeightedQueue::new(self.n_candidates + 10);
        let mut gap = 0.0f64;
        let mut considered = 0usize;
        let batch_size = rayon::current_num_threads().max(1);

        for chunk in ranked.chunks(batch_size) {
            if self.deadline_exceeded() {
                warn!(
                    considered,
                    total = ranked.len(),
                    "instance timeout hit during exact tree computation"
                );
                break;
            }
            if gap_cutoff
                && queue.lowerbound().is_finite()
                && chunk[0].heuristic_score + gap < queue.lowerbound()
            {
                debug!(considered, "remaining candidates cannot reach the queue");
                break;
            }
            let lower_bound = if queue.lowerbound().is_finite() {
                queue.lowerbound() - gap
            } else {
                f64::NEG_INFINITY
            };
            let solve = |r: &RankedCandidate| -> Result<(f64, ExactEntry)> {
                let mut graph = self.analysis.build_graph(&self.input, &r.candidate);
                let tree = match self.analysis.compute_tree(
                    &self.input,
                    &mut graph,
                    lower_bound,
                    self.timeout.per_tree(),
                ) {
                    Ok(result) => result.tree,
                    // a candidate that runs out of time keeps its heuristic tree
                    Err(FtPipelineError::Timeout { .. }) => r.tree.clone(),
                    Err(e) => return Err(e),
                };
                Ok((
                    r.heuristic_score,
                    ExactEntry {
                        candidate: r.candidate.clone(),
                        graph,
                        tree,
                    },
                ))
            };
            let solved: Vec<(f64, ExactEntry)> = if self.analysis.tree_builder.is_thread_safe() {
                chunk.par_iter().map(solve).collect::<Result<_>>()?
            } else {
                chunk.iter().map(solve).collect::<Result<_>>()?
            };
            for (heuristic_score, entry) in solved {
                gap = gap.max(entry.tree.tree_weight() - heuristic_score);
                considered += 1;
                let score = entry.tree.tree_weight();
                // eviction frees the cached graph of the dropped candidate
                queue.add(entry, score, drop);
            }
        }
        Ok((queue.into_sorted_vec(), considered))
    }

    /// Recalibrates each candidate tree and charges score gained through
    /// recalibration against the ceiling set by the best-ranked candidates.
    fn recalibration_phase(
        &self,
        entries: Vec<(f64, ExactEntry)>,
    ) -> Result<Vec<ScoredFinal>> {
        let mut finals = Vec::with_capacity(entries.len());
        let mut ceiling = 0.0f64;
        for (rank, (score, entry)) in entries.into_iter().enumerate() {
            let mut score = score;
            let mut graph = entry.graph;
            let mut tree = entry.tree;
            let mut recalibration = SpectralRecalibration::none();
            if !self.deadline_exceeded() {
                if let Some((new_tree, new_graph, rec, gain)) =
                    self.recalibrated(&entry.candidate, &tree)?
                {
                    if rank < PROTECTED_RANKS {
                        ceiling = ceiling.max(gain);
                    }
                    let penalty = self
                        .analysis
                        .recalibration_penalty
                        .penalty(rank, gain, ceiling);
                    score = new_tree.tree_weight() - penalty;
                    graph = new_graph;
                    tree = new_tree;
                    recalibration = rec;
                }
            }
            finals.push(ScoredFinal {
                score,
                candidate: entry.candidate,
                graph,
                tree,
                recalibration,
            });
        }
        Ok(finals)
    }

    /// Recomputes one candidate's tree on recalibrated masses. None when
    /// the fit is rejected or does not improve the score.
    fn recalibrated(
        &self,
        candidate: &Decomposition,
        tree: &FTree,
    ) -> Result<Option<(FTree, FGraph, SpectralRecalibration, f64)>> {
        let recalibration = self.analysis.recalibration.compute(&self.input, tree);
        let Some(function) = recalibration.function() else {
            return Ok(None);
        };
        let mut rec_input = self.input.clone();
        for peak in rec_input.peaks.iter_mut() {
            peak.mz = function.apply(peak.mz);
        }
        rec_input.experiment.precursor_mz = function.apply(rec_input.experiment.precursor_mz);
        self.analysis.perform_peak_scoring(&mut rec_input);
        let mut graph = self.analysis.build_graph(&rec_input, candidate);
        let result = self.analysis.compute_tree(
            &rec_input,
            &mut graph,
            f64::NEG_INFINITY,
            self.timeout.per_tree(),
        )?;
        let gain = result.tree.tree_weight() - tree.tree_weight();
        if gain <= 0.0 {
            return Ok(None);
        }
        Ok(Some((result.tree, graph, recalibration, gain)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{
        AnnotatedPeak,
        TreeStatistics,
    };
    use crate::input::Ms2Experiment;
    use ftgraph::{
        Ionization,
        MolecularFormula,
    };

    fn formula(s: &str) -> MolecularFormula {
        MolecularFormula::parse(s).unwrap()
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    fn glucose_experiment() -> Ms2Experiment {
        let mut exp = Ms2Experiment::new("glucose", 181.0707);
        exp.ionization = Some(Ionization::Protonated);
        exp.spectra = vec![vec![
            (163.0601, 500.0),
            (145.0495, 300.0),
            (127.0390, 150.0),
            (85.0284, 800.0),
        ]];
        exp
    }

    #[test]
    fn declared_formula_yields_one_annotated_tree() {
        init_tracing();
        let analysis = FragmentationPatternAnalysis::default_analyzer();
        let mut exp = glucose_experiment();
        exp.molecular_formula = Some(formula("C6H12O6"));
        let input = ProcessedInput::from_experiment(exp).unwrap();
        let result = TreeComputationInstance::new(&analysis, input).run().unwrap();
        assert_eq!(result.trees.len(), 1);
        let tree = &result.trees[0];
        assert_eq!(tree.fragment(tree.root()).formula(), &formula("C6H12O6"));
        assert!(tree.is_valid_tree());
        assert!(tree.annotations().get::<Beautified>().is_some());
        assert!(tree
            .annotations()
            .get::<UnconsideredCandidatesUpperBound>()
            .is_some());
        let stats = tree.annotations().get::<TreeStatistics>().unwrap();
        assert!(stats.explained_intensity > 0.0);
    }

    #[test]
    fn de_novo_returns_trees_sorted_by_score() {
        init_tracing();
        let analysis = FragmentationPatternAnalysis::default_analyzer();
        let mut input = ProcessedInput::from_experiment(glucose_experiment()).unwrap();
        input.annotations.set(NumberOfCandidates(3));
        let result = TreeComputationInstance::new(&analysis, input).run().unwrap();
        assert!(!result.trees.is_empty());
        assert!(result.trees.len() <= 3);
        for w in result.trees.windows(2) {
            assert!(w[0].tree_weight() >= w[1].tree_weight() - 1e-9);
        }
        // glucose should be among the best explanations of its own spectrum
        assert!(result
            .trees
            .iter()
            .any(|t| t.fragment(t.root()).formula() == &formula("C6H12O6")));
    }

    #[test]
    fn heuristic_only_mode_still_annotates_trees() {
        init_tracing();
        let analysis = FragmentationPatternAnalysis::default_analyzer();
        let mut input = ProcessedInput::from_experiment(glucose_experiment()).unwrap();
        // force the branch that keeps the heuristic solutions as final
        input.annotations.set(UseHeuristic {
            use_above_mz: 50.0,
            only_above_mz: 100.0,
        });
        input.annotations.set(NumberOfCandidates(2));
        let result = TreeComputationInstance::new(&analysis, input).run().unwrap();
        assert!(!result.trees.is_empty());
        for tree in &result.trees {
            let handle = tree.fragment_annotation_handle::<AnnotatedPeak>().unwrap();
            let peak = tree.get_fragment_annotation(handle, tree.root()).unwrap();
            assert!((peak.mz - 181.0707).abs() < 1e-6);
        }
    }

    #[test]
    fn well_explained_spectrum_is_not_canceled() {
        let analysis = FragmentationPatternAnalysis::default_analyzer();
        let mut exp = glucose_experiment();
        exp.molecular_formula = Some(formula("C6H12O6"));
        let input = ProcessedInput::from_experiment(exp).unwrap();
        let result = TreeComputationInstance::new(&analysis, input).run().unwrap();
        assert!(!result.canceled_due_to_low_score);
    }
}
