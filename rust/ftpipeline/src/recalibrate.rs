use crate::errors::{
    FtPipelineError,
    Result,
};
use crate::input::ProcessedInput;
use ftgraph::FTree;
use regex::Regex;
use std::fmt::Debug;
use std::sync::OnceLock;

/// Affine mass correction `a + b * mz`, fitted against the theoretical
/// fragment masses of a hypothesis tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecalibrationFunction {
    intercept: f64,
    slope: f64,
}

impl RecalibrationFunction {
    pub fn new(intercept: f64, slope: f64) -> Self {
        Self { intercept, slope }
    }

    pub fn identity() -> Self {
        Self {
            intercept: 0.0,
            slope: 1.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.intercept == 0.0 && self.slope == 1.0
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    pub fn apply(&self, mz: f64) -> f64 {
        self.intercept + self.slope * mz
    }

    pub fn from_string(s: &str) -> Result<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| {
            Regex::new(
                r"^\s*(-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?)\s*([+-])\s*(\d+(?:\.\d+)?(?:[eE][+-]?\d+)?)\s*\*?\s*x\s*$",
            )
            .unwrap_or_else(|e| panic!("invalid recalibration pattern: {}", e))
        });
        let caps = re.captures(s).ok_or_else(|| FtPipelineError::ParseError {
            msg: format!("not a recalibration function: '{}'", s),
        })?;
        let parse = |i: usize| -> Result<f64> {
            caps[i].parse().map_err(|_| FtPipelineError::ParseError {
                msg: format!("invalid number in '{}'", s),
            })
        };
        let intercept = parse(1)?;
        let mut slope = parse(3)?;
        if &caps[2] == "-" {
            slope = -slope;
        }
        Ok(Self { intercept, slope })
    }
}

impl std::fmt::Display for RecalibrationFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.slope < 0.0 {
            write!(f, "{} - {}x", self.intercept, -self.slope)
        } else {
            write!(f, "{} + {}x", self.intercept, self.slope)
        }
    }
}

/// Input annotation carrying the mass correction of the current
/// hypothesis. `none()` leaves all masses untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralRecalibration {
    function: Option<RecalibrationFunction>,
}

impl SpectralRecalibration {
    pub fn none() -> Self {
        Self { function: None }
    }

    pub fn new(function: RecalibrationFunction) -> Self {
        Self {
            function: Some(function),
        }
    }

    pub fn function(&self) -> Option<RecalibrationFunction> {
        self.function
    }

    pub fn has_recalibration(&self) -> bool {
        self.function.is_some_and(|f| !f.is_identity())
    }

    pub fn recalibrate_mz(&self, mz: f64) -> f64 {
        match self.function {
            Some(f) => f.apply(mz),
            None => mz,
        }
    }
}

/// Policy charging candidates for score gained through recalibration, so
/// a generous fit cannot catapult an implausible formula to the top.
pub trait RecalibrationPenalty: Debug + Send + Sync {
    fn penalty(&self, rank: usize, bonus: f64, ceiling: f64) -> f64;
}

/// Default policy: the best-ranked candidates define a bonus ceiling;
/// anyone below `protected_ranks` pays for the excess above it.
#[derive(Debug, Clone, Copy)]
pub struct BonusCeilingPenalty {
    pub protected_ranks: usize,
}

impl Default for BonusCeilingPenalty {
    fn default() -> Self {
        Self {
            protected_ranks: 10,
        }
    }
}

impl RecalibrationPenalty for BonusCeilingPenalty {
    fn penalty(&self, rank: usize, bonus: f64, ceiling: f64) -> f64 {
        if rank >= self.protected_ranks && bonus > ceiling {
            bonus - ceiling
        } else {
            0.0
        }
    }
}

/// Fits a recalibration function from a hypothesis tree: each explained
/// peak contributes a (measured, theoretical) pair for a least-squares
/// line. Refuses to recalibrate on thin or degenerate evidence.
#[derive(Debug, Clone, Copy)]
pub struct HypothesisDrivenRecalibration {
    pub min_number_of_peaks: usize,
    pub max_slope_deviation: f64,
    pub max_intercept: f64,
}

impl Default for HypothesisDrivenRecalibration {
    fn default() -> Self {
        Self {
            min_number_of_peaks: 6,
            max_slope_deviation: 0.01,
            max_intercept: 0.2,
        }
    }
}

impl HypothesisDrivenRecalibration {
    pub fn compute(&self, input: &ProcessedInput, tree: &FTree) -> SpectralRecalibration {
        let mut pairs: Vec<(f64, f64)> = Vec::new();
        for f in tree.fragments() {
            let peak_id = f.peak_id();
            if peak_id < 0 || peak_id as usize >= input.peaks.len() {
                continue;
            }
            let measured = input.peaks[peak_id as usize].mz;
            pairs.push((measured, f.ion_mass()));
        }
        if pairs.len() < self.min_number_of_peaks {
            return SpectralRecalibration::none();
        }
        let Some(function) = least_squares(&pairs) else {
            return SpectralRecalibration::none();
        };
        if (function.slope() - 1.0).abs() > self.max_slope_deviation
            || function.intercept().abs() > self.max_intercept
        {
            return SpectralRecalibration::none();
        }
        if function.is_identity() {
            return SpectralRecalibration::none();
        }
        SpectralRecalibration::new(function)
    }
}

/// Ordinary least squares for `y = a + b * x`. None if x has no variance.
fn least_squares(pairs: &[(f64, f64)]) -> Option<RecalibrationFunction> {
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for &(x, y) in pairs {
        sxx += (x - mean_x) * (x - mean_x);
        sxy += (x - mean_x) * (y - mean_y);
    }
    if sxx < 1e-12 {
        return None;
    }
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    Some(RecalibrationFunction::new(intercept, slope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Ms2Experiment;
    use ftgraph::{
        Ionization,
        MolecularFormula,
    };

    #[test]
    fn parses_the_textbook_form() {
        let f = RecalibrationFunction::from_string("1.0 + 2.0x").unwrap();
        assert!((f.apply(3.0) - 7.0).abs() < 1e-12);
        assert_eq!(f.to_string(), "1 + 2x");
        let g = RecalibrationFunction::from_string("-0.5 - 1.5 * x").unwrap();
        assert!((g.apply(2.0) - (-3.5)).abs() < 1e-12);
        assert!(RecalibrationFunction::from_string("x + 1").is_err());
    }

    #[test]
    fn identity_leaves_masses_alone() {
        let r = SpectralRecalibration::none();
        assert_eq!(r.recalibrate_mz(100.0), 100.0);
        assert!(!r.has_recalibration());
        let r = SpectralRecalibration::new(RecalibrationFunction::identity());
        assert!(!r.has_recalibration());
    }

    #[test]
    fn least_squares_recovers_a_linear_shift() {
        let truth = RecalibrationFunction::new(0.01, 1.000002);
        let pairs: Vec<(f64, f64)> = [50.0, 100.0, 150.0, 200.0, 250.0]
            .iter()
            .map(|&x| (x, truth.apply(x)))
            .collect();
        let fitted = least_squares(&pairs).unwrap();
        assert!((fitted.slope() - truth.slope()).abs() < 1e-9);
        assert!((fitted.intercept() - truth.intercept()).abs() < 1e-6);
        // degenerate input
        assert!(least_squares(&[(100.0, 100.0), (100.0, 100.01)]).is_none());
    }

    #[test]
    fn ceiling_penalty_protects_top_ranks() {
        let p = BonusCeilingPenalty::default();
        assert_eq!(p.penalty(0, 5.0, 1.0), 0.0);
        assert_eq!(p.penalty(9, 5.0, 1.0), 0.0);
        assert!((p.penalty(10, 5.0, 1.0) - 4.0).abs() < 1e-12);
        assert_eq!(p.penalty(10, 0.5, 1.0), 0.0);
    }

    #[test]
    fn thin_evidence_disables_recalibration() {
        let mut exp = Ms2Experiment::new("thin", 181.0707);
        exp.spectra = vec![vec![(163.0601, 100.0)]];
        let input = ProcessedInput::from_experiment(exp).unwrap();
        let glucose = MolecularFormula::parse("C6H12O6").unwrap();
        let mut tree = FTree::new(glucose, Ionization::Protonated);
        let root = tree.root();
        tree.set_peak_id(root, 1);
        let rec = HypothesisDrivenRecalibration::default().compute(&input, &tree);
        assert!(!rec.has_recalibration());
    }
}
