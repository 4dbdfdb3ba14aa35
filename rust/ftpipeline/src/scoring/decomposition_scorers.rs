use super::{
    DecompositionScorer,
    normal_log_density,
};
use crate::annotations::Ms2MassDeviation;
use crate::input::{
    ProcessedInput,
    ProcessedPeak,
};
use ftgraph::{
    Ionization,
    MolecularFormula,
};
use std::any::Any;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Scores how well a candidate's theoretical ion mass matches the measured
/// peak. Zero at perfect agreement, quadratic falloff in standardized
/// deviation units.
#[derive(Debug, Clone, Copy, Default)]
pub struct MassDeviationVertexScorer;

impl DecompositionScorer for MassDeviationVertexScorer {
    fn prepare(&self, input: &ProcessedInput) -> Box<dyn Any + Send + Sync> {
        let dev = input
            .annotations
            .get::<Ms2MassDeviation>()
            .copied()
            .unwrap_or_default();
        Box::new(dev)
    }

    fn score(
        &self,
        formula: &MolecularFormula,
        ionization: Ionization,
        peak: &ProcessedPeak,
        _input: &ProcessedInput,
        prepared: &dyn Any,
    ) -> f64 {
        let dev = prepared
            .downcast_ref::<Ms2MassDeviation>()
            .copied()
            .unwrap_or_default();
        let theoretical = ionization.add_to_mass(formula.mass());
        // three standard deviations fill the allowed window
        let sd = dev.standard.absolute_for(peak.mz) / 3.0;
        normal_log_density(peak.mz - theoretical, sd) - normal_log_density(0.0, sd)
    }
}

/// Plausibility prior over precursor formulas: penalizes negative rdbe and
/// extreme hetero-to-carbon or hydrogen-to-carbon ratios. Below
/// `minimal_mass` the prior is skipped, tiny formulas are all strange.
#[derive(Debug, Clone, Copy)]
pub struct ChemicalPriorScorer {
    pub normalization: f64,
    pub minimal_mass: f64,
}

impl Default for ChemicalPriorScorer {
    fn default() -> Self {
        Self {
            normalization: 0.0,
            minimal_mass: 100.0,
        }
    }
}

impl DecompositionScorer for ChemicalPriorScorer {
    fn score(
        &self,
        formula: &MolecularFormula,
        _ionization: Ionization,
        _peak: &ProcessedPeak,
        _input: &ProcessedInput,
        _prepared: &dyn Any,
    ) -> f64 {
        if formula.mass() < self.minimal_mass {
            return self.normalization;
        }
        let mut prior = 0.0;
        let rdbe = formula.rdbe();
        if rdbe < 0.0 {
            prior += rdbe * 2.0;
        }
        let carbons = formula.number_of_carbons() as f64;
        if carbons > 0.0 {
            let h2c = formula.number_of_hydrogens() as f64 / carbons;
            if h2c > 3.0 {
                prior -= (h2c - 3.0) * 1.5;
            }
            let het2c = formula.hetero_to_carbon_ratio();
            if het2c > 1.5 {
                prior -= (het2c - 1.5) * 2.0;
            }
        } else {
            // carbon-free candidates are rarely real metabolites
            prior -= 3.0;
        }
        prior.max(-10.0) - self.normalization
    }
}

fn common_fragments() -> &'static HashMap<MolecularFormula, f64> {
    static TABLE: OnceLock<HashMap<MolecularFormula, f64>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let entries: &[(&str, f64)] = &[
            ("C2H2O", 0.72),
            ("C2H4O2", 0.80),
            ("C3H4O", 0.55),
            ("C3H6O2", 0.61),
            ("C4H4O", 0.48),
            ("C5H6", 0.52),
            ("C6H6", 0.90),
            ("C7H8", 0.66),
            ("C4H6N2", 0.44),
            ("C5H5N", 0.58),
            ("CH4N2O", 0.51),
        ];
        entries
            .iter()
            .map(|(s, score)| {
                let formula = MolecularFormula::parse(s)
                    .unwrap_or_else(|e| panic!("bad common fragment entry '{}': {:?}", s, e));
                (formula, *score)
            })
            .collect()
    })
}

/// Bonus for fragments that recur across many compound classes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommonFragmentsScore;

impl DecompositionScorer for CommonFragmentsScore {
    fn score(
        &self,
        formula: &MolecularFormula,
        _ionization: Ionization,
        _peak: &ProcessedPeak,
        _input: &ProcessedInput,
        _prepared: &dyn Any,
    ) -> f64 {
        common_fragments().get(formula).copied().unwrap_or(0.0)
    }
}
