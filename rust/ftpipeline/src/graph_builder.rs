use crate::input::{
    Decomposition,
    ProcessedInput,
};
use ftgraph::FGraph;

/// Builds the fragmentation graph of one precursor candidate: every
/// decomposition of every peak that is a subformula of the candidate
/// becomes a vertex, every subformula relation between different peaks
/// becomes a loss. Scoring happens afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubFormulaGraphBuilder;

impl SubFormulaGraphBuilder {
    pub fn build(&self, input: &ProcessedInput, candidate: &Decomposition) -> FGraph {
        let mut graph = FGraph::new();
        let decomp_handle = graph.register_fragment_annotation::<Decomposition>();
        let parent = input.parent_index() as i32;
        let root = graph.add_root_vertex(candidate.formula, candidate.ionization);
        graph.set_color(root, parent);
        graph.set_peak_id(root, parent);
        graph.set_fragment_annotation(decomp_handle, root, candidate.clone());

        // vertices in descending peak order, so every edge later points
        // from an earlier to a later list entry
        let mut vertices = vec![root];
        for peak_idx in (0..input.parent_index()).rev() {
            for d in &input.decompositions[peak_idx].decompositions {
                if d.ionization != candidate.ionization {
                    continue;
                }
                if d.formula == candidate.formula || !candidate.formula.contains(&d.formula) {
                    continue;
                }
                let v = graph.add_fragment(d.formula, d.ionization);
                graph.set_color(v, peak_idx as i32);
                graph.set_peak_id(v, peak_idx as i32);
                graph.set_fragment_annotation(decomp_handle, v, d.clone());
                vertices.push(v);
            }
        }

        for i in 0..vertices.len() {
            for j in (i + 1)..vertices.len() {
                let (u, v) = (vertices[i], vertices[j]);
                if graph.fragment(u).color() == graph.fragment(v).color() {
                    continue;
                }
                let fu = *graph.fragment(u).formula();
                let fv = *graph.fragment(v).formula();
                if fu != fv && fu.contains(&fv) {
                    graph.add_loss(u, v);
                }
            }
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{
        DecompositionList,
        Ms2Experiment,
    };
    use ftgraph::{
        Ionization,
        MolecularFormula,
    };

    fn formula(s: &str) -> MolecularFormula {
        MolecularFormula::parse(s).unwrap()
    }

    fn decomposition(s: &str) -> Decomposition {
        Decomposition {
            formula: formula(s),
            ionization: Ionization::Protonated,
            score: 0.0,
        }
    }

    fn glucose_input() -> ProcessedInput {
        let mut exp = Ms2Experiment::new("glucose", 181.0707);
        exp.ionization = Some(Ionization::Protonated);
        exp.spectra = vec![vec![(163.0601, 500.0), (145.0495, 300.0), (85.0284, 800.0)]];
        let mut input = ProcessedInput::from_experiment(exp).unwrap();
        // peak order ascending: 85, 145, 163, parent
        input.decompositions[0] = DecompositionList {
            decompositions: vec![decomposition("C4H4O2")],
        };
        input.decompositions[1] = DecompositionList {
            decompositions: vec![decomposition("C6H8O4")],
        };
        input.decompositions[2] = DecompositionList {
            decompositions: vec![decomposition("C6H10O5"), decomposition("C7H14O4")],
        };
        input.decompositions[3] = DecompositionList {
            decompositions: vec![decomposition("C6H12O6")],
        };
        input
    }

    #[test]
    fn graph_contains_only_subformulas_of_the_candidate() {
        let input = glucose_input();
        let builder = SubFormulaGraphBuilder;
        let graph = builder.build(&input, &input.root_decompositions().decompositions[0]);
        // pseudo-root, root, C6H10O5, C6H8O4, C4H4O2; C7H14O4 is no subformula
        assert_eq!(graph.number_of_vertices(), 5);
        let glucose = formula("C6H12O6");
        for f in graph.fragments() {
            if graph.is_pseudo_root(f.key()) {
                continue;
            }
            assert!(glucose.contains(f.formula()));
        }
    }

    #[test]
    fn edges_point_from_heavier_to_lighter_peaks() {
        let input = glucose_input();
        let graph = SubFormulaGraphBuilder.build(&input, &input.root_decompositions().decompositions[0]);
        for l in graph.losses() {
            let sc = graph.fragment(l.source()).color();
            let tc = graph.fragment(l.target()).color();
            if sc >= 0 {
                assert!(sc > tc, "edge from color {} to {}", sc, tc);
            }
        }
        assert!(graph.is_connected());
        assert!(graph.is_valid_numbered());
    }

    #[test]
    fn fragments_carry_their_decomposition() {
        let input = glucose_input();
        let graph = SubFormulaGraphBuilder.build(&input, &input.root_decompositions().decompositions[0]);
        let handle = graph.fragment_annotation_handle::<Decomposition>().unwrap();
        for f in graph.fragments() {
            if graph.is_pseudo_root(f.key()) {
                continue;
            }
            let d = graph.get_fragment_annotation(handle, f.key()).unwrap();
            assert_eq!(&d.formula, f.formula());
        }
    }
}
