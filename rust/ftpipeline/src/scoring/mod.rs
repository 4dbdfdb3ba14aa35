pub mod decomposition_scorers;
pub mod loss_scorers;
pub mod peak_scorers;

pub use decomposition_scorers::{
    ChemicalPriorScorer,
    CommonFragmentsScore,
    MassDeviationVertexScorer,
};
pub use loss_scorers::{
    CommonLossEdgeScorer,
    DBELossScorer,
    FreeRadicalEdgeScorer,
    LossSizeScorer,
    PureCarbonNitrogenLossScorer,
};
pub use peak_scorers::{
    PeakIsNoiseScorer,
    TreeSizeScorer,
};

use crate::input::{
    ProcessedInput,
    ProcessedPeak,
};
use ftgraph::{
    Ionization,
    MolecularFormula,
};
use std::any::Any;
use std::fmt::Debug;

/// Scores every peak of the merged spectrum, writing into the shared
/// per-peak score table.
pub trait PeakScorer: Debug + Send + Sync {
    fn score(&self, input: &ProcessedInput, scores: &mut [f64]);
}

/// Scores every ordered peak pair. `scores[target][source]` belongs to a
/// loss from the heavier source peak down to the lighter target peak.
pub trait PeakPairScorer: Debug + Send + Sync {
    fn score(&self, input: &ProcessedInput, scores: &mut [Vec<f64>]);
}

/// Scores a single formula candidate at a peak. `prepare` runs once per
/// input so table lookups and parameter resolution stay out of the inner
/// loop; its result is handed back to every `score` call.
pub trait DecompositionScorer: Debug + Send + Sync {
    fn prepare(&self, _input: &ProcessedInput) -> Box<dyn Any + Send + Sync> {
        Box::new(())
    }

    fn score(
        &self,
        formula: &MolecularFormula,
        ionization: Ionization,
        peak: &ProcessedPeak,
        input: &ProcessedInput,
        prepared: &dyn Any,
    ) -> f64;
}

/// Scores a loss by its elemental composition.
pub trait LossScorer: Debug + Send + Sync {
    fn prepare(&self, _input: &ProcessedInput) -> Box<dyn Any + Send + Sync> {
        Box::new(())
    }

    fn score(&self, loss: &MolecularFormula, input: &ProcessedInput, prepared: &dyn Any) -> f64;
}

const SQRT_TWO_PI: f64 = 2.506_628_274_631_000_5;

/// Log density of a log-normal distribution at x.
pub(crate) fn log_normal_log_density(x: f64, mean_ln: f64, sd_ln: f64) -> f64 {
    if x <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let z = (x.ln() - mean_ln) / sd_ln;
    -0.5 * z * z - (x * sd_ln * SQRT_TWO_PI).ln()
}

/// Log density of a centered normal distribution at x.
pub(crate) fn normal_log_density(x: f64, sd: f64) -> f64 {
    let z = x / sd;
    -0.5 * z * z - (sd * SQRT_TWO_PI).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_normal_peaks_near_its_mode() {
        // mode of lognormal(mean_ln, sd_ln) is exp(mean_ln - sd_ln^2)
        let mode = (4.0f64 - 1.0).exp();
        let at_mode = log_normal_log_density(mode, 4.0, 1.0);
        assert!(at_mode > log_normal_log_density(mode * 4.0, 4.0, 1.0));
        assert!(at_mode > log_normal_log_density(mode / 4.0, 4.0, 1.0));
        assert_eq!(log_normal_log_density(-1.0, 4.0, 1.0), f64::NEG_INFINITY);
    }

    #[test]
    fn normal_log_density_is_symmetric() {
        let a = normal_log_density(0.002, 0.001);
        let b = normal_log_density(-0.002, 0.001);
        assert!((a - b).abs() < 1e-12);
        assert!(normal_log_density(0.0, 0.001) > a);
    }
}
