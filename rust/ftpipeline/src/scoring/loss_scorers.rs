use super::{
    LossScorer,
    PeakPairScorer,
    log_normal_log_density,
};
use crate::input::ProcessedInput;
use ftgraph::MolecularFormula;
use std::any::Any;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Scores the mass of a loss against a log-normal distribution over loss
/// sizes. Runs as a peak pair scorer: the score depends only on the mass
/// difference between the two peaks, not on the formula assigned to it.
#[derive(Debug, Clone, Copy)]
pub struct LossSizeScorer {
    pub mean_ln: f64,
    pub sd_ln: f64,
    pub normalization: f64,
}

impl Default for LossSizeScorer {
    fn default() -> Self {
        Self {
            mean_ln: 4.0,
            sd_ln: 1.0,
            normalization: -5.0,
        }
    }
}

impl PeakPairScorer for LossSizeScorer {
    fn score(&self, input: &ProcessedInput, scores: &mut [Vec<f64>]) {
        for source in 0..input.peaks.len() {
            for target in 0..source {
                let loss_mass = input.peaks[source].mz - input.peaks[target].mz;
                scores[target][source] +=
                    log_normal_log_density(loss_mass, self.mean_ln, self.sd_ln)
                        - self.normalization;
            }
        }
    }
}

fn common_losses() -> &'static HashMap<MolecularFormula, f64> {
    static TABLE: OnceLock<HashMap<MolecularFormula, f64>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let entries: &[(&str, f64)] = &[
            // frequent neutral losses with learned log-scale bonuses
            ("H2O", 1.95),
            ("CO", 1.62),
            ("CO2", 1.58),
            ("CH2O", 1.14),
            ("CH2O2", 1.21),
            ("C2H4O2", 1.02),
            ("C2H2O", 0.94),
            ("CH4", 0.87),
            ("C2H4", 0.96),
            ("C2H2", 0.70),
            ("C3H6", 0.75),
            ("C4H8", 0.61),
            ("C5H8", 0.58),
            ("C6H6", 0.82),
            ("CH3OH", 1.05),
            ("NH3", 1.37),
            ("CH3N", 0.68),
            ("CH5N", 0.74),
            ("C3H9N", 0.59),
            ("CHNO", 0.62),
            ("HCN", 0.88),
            ("H2S", 0.81),
            ("SO3", 0.93),
            ("H2SO4", 0.77),
            ("H3PO4", 0.90),
            ("HPO3", 0.85),
            ("Cl", 0.64),
            ("HCl", 0.79),
            // implausible small losses, penalized
            ("H2", -1.39),
            ("C2O", -2.30),
            ("C4O", -2.30),
            ("C3H2", -1.90),
            ("C5H2", -1.90),
            ("C7H2", -1.90),
        ];
        entries
            .iter()
            .map(|(s, score)| {
                let formula = MolecularFormula::parse(s)
                    .unwrap_or_else(|e| panic!("bad common loss table entry '{}': {:?}", s, e));
                (formula, *score)
            })
            .collect()
    })
}

/// Bonus for losses from the table of recurrent neutral losses, penalty
/// for a handful of chemically implausible ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommonLossEdgeScorer;

impl LossScorer for CommonLossEdgeScorer {
    fn score(&self, loss: &MolecularFormula, _input: &ProcessedInput, _prepared: &dyn Any) -> f64 {
        common_losses().get(loss).copied().unwrap_or(0.0)
    }
}

fn known_radicals() -> &'static HashMap<MolecularFormula, f64> {
    static TABLE: OnceLock<HashMap<MolecularFormula, f64>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let score = 0.9f64.ln();
        ["H", "CH3", "CH3O", "C2H5", "C3H7", "C4H9", "C6H5", "NO", "NO2", "Br", "I"]
            .iter()
            .map(|s| {
                let formula = MolecularFormula::parse(s)
                    .unwrap_or_else(|e| panic!("bad radical table entry '{}': {:?}", s, e));
                (formula, score)
            })
            .collect()
    })
}

/// Radical losses (half-integral rdbe) are rare outside a set of known
/// stable radicals; everything else pays a hefty penalty.
#[derive(Debug, Clone, Copy)]
pub struct FreeRadicalEdgeScorer {
    pub general_radical_penalty: f64,
}

impl Default for FreeRadicalEdgeScorer {
    fn default() -> Self {
        Self {
            general_radical_penalty: 0.001f64.ln(),
        }
    }
}

impl FreeRadicalEdgeScorer {
    fn is_radical(loss: &MolecularFormula) -> bool {
        let doubled = (loss.rdbe() * 2.0).round() as i64;
        doubled.rem_euclid(2) != 0
    }
}

impl LossScorer for FreeRadicalEdgeScorer {
    fn score(&self, loss: &MolecularFormula, _input: &ProcessedInput, _prepared: &dyn Any) -> f64 {
        if let Some(&bonus) = known_radicals().get(loss) {
            bonus
        } else if Self::is_radical(loss) {
            self.general_radical_penalty
        } else {
            0.0
        }
    }
}

/// Losses with negative ring double bond equivalents cannot come from a
/// plausible bond cleavage and are penalized proportionally.
#[derive(Debug, Clone, Copy)]
pub struct DBELossScorer {
    pub penalty_per_dbe: f64,
}

impl Default for DBELossScorer {
    fn default() -> Self {
        Self {
            penalty_per_dbe: 4.0f64.ln(),
        }
    }
}

impl LossScorer for DBELossScorer {
    fn score(&self, loss: &MolecularFormula, _input: &ProcessedInput, _prepared: &dyn Any) -> f64 {
        let rdbe = loss.rdbe();
        if rdbe < 0.0 {
            rdbe * self.penalty_per_dbe
        } else {
            0.0
        }
    }
}

/// Pure carbon or pure nitrogen losses are chemically nonsensical for
/// small molecules.
#[derive(Debug, Clone, Copy)]
pub struct PureCarbonNitrogenLossScorer {
    pub penalty: f64,
}

impl Default for PureCarbonNitrogenLossScorer {
    fn default() -> Self {
        Self {
            penalty: 0.0001f64.ln(),
        }
    }
}

impl LossScorer for PureCarbonNitrogenLossScorer {
    fn score(&self, loss: &MolecularFormula, _input: &ProcessedInput, _prepared: &dyn Any) -> f64 {
        let carbons = loss.number_of_carbons() as i32;
        let nitrogens = loss.number_of_nitrogens() as i32;
        let atoms = loss.atom_count();
        if atoms > 0 && (carbons == atoms || nitrogens == atoms) {
            self.penalty
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Ms2Experiment;

    fn formula(s: &str) -> MolecularFormula {
        MolecularFormula::parse(s).unwrap()
    }

    fn dummy_input() -> ProcessedInput {
        let mut exp = Ms2Experiment::new("dummy", 181.0707);
        exp.spectra = vec![vec![(163.0601, 100.0), (85.0284, 50.0)]];
        ProcessedInput::from_experiment(exp).unwrap()
    }

    #[test]
    fn water_loss_beats_unknown_loss() {
        let input = dummy_input();
        let scorer = CommonLossEdgeScorer;
        let prepared = scorer.prepare(&input);
        let water = scorer.score(&formula("H2O"), &input, prepared.as_ref());
        let odd = scorer.score(&formula("C3H7NO2"), &input, prepared.as_ref());
        assert!(water > 0.0);
        assert_eq!(odd, 0.0);
    }

    #[test]
    fn radical_detection_uses_parity() {
        assert!(FreeRadicalEdgeScorer::is_radical(&formula("CH3")));
        assert!(FreeRadicalEdgeScorer::is_radical(&formula("H")));
        assert!(!FreeRadicalEdgeScorer::is_radical(&formula("H2O")));
        assert!(!FreeRadicalEdgeScorer::is_radical(&formula("C2H4")));
    }

    #[test]
    fn known_radicals_escape_the_penalty() {
        let input = dummy_input();
        let scorer = FreeRadicalEdgeScorer::default();
        let prepared = scorer.prepare(&input);
        let methyl = scorer.score(&formula("CH3"), &input, prepared.as_ref());
        let exotic = scorer.score(&formula("C2H3O2"), &input, prepared.as_ref());
        assert!(methyl > exotic);
        assert!((exotic - 0.001f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn negative_dbe_losses_are_penalized() {
        let input = dummy_input();
        let scorer = DBELossScorer::default();
        let prepared = scorer.prepare(&input);
        // H4O2 has rdbe 1 - 2 = -1
        assert!(scorer.score(&formula("H4O2"), &input, prepared.as_ref()) < 0.0);
        assert_eq!(scorer.score(&formula("H2O"), &input, prepared.as_ref()), 0.0);
    }

    #[test]
    fn pure_carbon_and_nitrogen_losses_are_penalized() {
        let input = dummy_input();
        let scorer = PureCarbonNitrogenLossScorer::default();
        let prepared = scorer.prepare(&input);
        assert!(scorer.score(&formula("C3"), &input, prepared.as_ref()) < -5.0);
        assert!(scorer.score(&formula("N2"), &input, prepared.as_ref()) < -5.0);
        assert_eq!(scorer.score(&formula("CN"), &input, prepared.as_ref()), 0.0);
    }

    #[test]
    fn loss_size_favors_moderate_losses() {
        let mut exp = Ms2Experiment::new("pair", 200.0);
        // losses of 18 and 150 from the parent
        exp.spectra = vec![vec![(181.0, 100.0), (49.0, 100.0)]];
        let input = ProcessedInput::from_experiment(exp).unwrap();
        let scorer = LossSizeScorer::default();
        let n = input.peaks.len();
        let mut scores = vec![vec![0.0; n]; n];
        scorer.score(&input, &mut scores);
        let parent = input.parent_index();
        // water-sized loss scores better than losing most of the molecule
        assert!(scores[1][parent] > scores[0][parent]);
    }
}
