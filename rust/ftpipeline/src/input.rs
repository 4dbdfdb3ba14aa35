use crate::errors::{
    FtPipelineError,
    Result,
};
use ftgraph::{
    Ionization,
    MolecularFormula,
    TypedRegistry,
};

/// A peak of the merged MS2 spectrum. `index` is the position in the
/// merged peak list and doubles as the peak's color during graph
/// construction. The parent peak is always the last entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessedPeak {
    pub mz: f64,
    pub relative_intensity: f64,
    pub index: usize,
}

/// Raw experiment data before preprocessing: one or more MS2 scans of the
/// same precursor.
#[derive(Debug, Clone)]
pub struct Ms2Experiment {
    pub name: String,
    pub precursor_mz: f64,
    /// Declared ion mode. None triggers a search over the standard modes.
    pub ionization: Option<Ionization>,
    /// Known precursor formula, if any. Skips de novo decomposition.
    pub molecular_formula: Option<MolecularFormula>,
    pub spectra: Vec<Vec<(f64, f64)>>,
}

impl Ms2Experiment {
    pub fn new(name: impl Into<String>, precursor_mz: f64) -> Self {
        Self {
            name: name.into(),
            precursor_mz,
            ionization: None,
            molecular_formula: None,
            spectra: Vec::new(),
        }
    }

    /// Ion modes to consider for this experiment.
    pub fn considered_ionizations(&self) -> Vec<Ionization> {
        match self.ionization {
            Some(ion) => vec![ion],
            None => Ionization::positive_modes().to_vec(),
        }
    }
}

/// A formula candidate for one peak, scored by the decomposition scorers.
#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    pub formula: MolecularFormula,
    pub ionization: Ionization,
    pub score: f64,
}

/// All formula candidates of one peak.
#[derive(Debug, Clone, Default)]
pub struct DecompositionList {
    pub decompositions: Vec<Decomposition>,
}

impl DecompositionList {
    pub fn is_empty(&self) -> bool {
        self.decompositions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.decompositions.len()
    }

    /// Removes formulas explained by both of two close peaks from the peak
    /// that fits worse, so a single fragment never claims two peaks.
    pub fn disjoin(&mut self, other: &mut DecompositionList, own_mz: f64, other_mz: f64) {
        let mut drop_own = Vec::new();
        let mut drop_other = Vec::new();
        for (i, d) in self.decompositions.iter().enumerate() {
            if let Some(j) = other
                .decompositions
                .iter()
                .position(|o| o.formula == d.formula && o.ionization == d.ionization)
            {
                let theoretical = d.ionization.add_to_mass(d.formula.mass());
                if (own_mz - theoretical).abs() <= (other_mz - theoretical).abs() {
                    drop_other.push(j);
                } else {
                    drop_own.push(i);
                }
            }
        }
        for &i in drop_own.iter().rev() {
            self.decompositions.remove(i);
        }
        drop_other.sort_unstable();
        for &j in drop_other.iter().rev() {
            other.decompositions.remove(j);
        }
    }
}

/// Scoring tables computed once per input. `peak_scores` is indexed by
/// peak index; `peak_pair_scores[target][source]` holds the mass-difference
/// score of a loss from the heavier source peak to the lighter target.
#[derive(Debug, Clone, Default)]
pub struct Scoring {
    pub peak_scores: Vec<f64>,
    pub peak_pair_scores: Vec<Vec<f64>>,
}

impl Scoring {
    pub fn resize(&mut self, n: usize) {
        self.peak_scores = vec![0.0; n];
        self.peak_pair_scores = vec![vec![0.0; n]; n];
    }
}

/// The preprocessed unit of work: merged peaks (parent last), per-peak
/// decompositions, scoring tables and a bag of typed annotations.
#[derive(Debug, Clone)]
pub struct ProcessedInput {
    pub experiment: Ms2Experiment,
    pub peaks: Vec<ProcessedPeak>,
    pub decompositions: Vec<DecompositionList>,
    pub scoring: Scoring,
    pub annotations: TypedRegistry,
}

impl ProcessedInput {
    /// Merges the experiment's scans into a single normalized peak list.
    /// Peaks are sorted by m/z, peaks above the precursor are dropped and
    /// the parent peak is appended last.
    pub fn from_experiment(experiment: Ms2Experiment) -> Result<Self> {
        if experiment.spectra.iter().all(|s| s.is_empty()) {
            return Err(FtPipelineError::EmptyInput {
                context: "experiment contains no MS2 peaks",
            });
        }
        if !experiment.precursor_mz.is_finite() || experiment.precursor_mz <= 0.0 {
            return Err(FtPipelineError::InvalidInput {
                msg: format!("invalid precursor m/z: {}", experiment.precursor_mz),
            });
        }
        let mut raw: Vec<(f64, f64)> = experiment
            .spectra
            .iter()
            .flatten()
            .copied()
            .filter(|&(mz, intensity)| {
                intensity > 0.0 && mz > 0.0 && mz < experiment.precursor_mz - 0.5
            })
            .collect();
        raw.sort_by(|a, b| a.0.total_cmp(&b.0));

        // merge peaks from different scans that fall into the same mass slot
        const MERGE_WINDOW: f64 = 0.01;
        let mut merged: Vec<(f64, f64)> = Vec::with_capacity(raw.len());
        for (mz, intensity) in raw {
            match merged.last_mut() {
                Some((last_mz, last_int)) if (mz - *last_mz).abs() <= MERGE_WINDOW => {
                    // intensity-weighted mean position
                    let total = *last_int + intensity;
                    *last_mz = (*last_mz * *last_int + mz * intensity) / total;
                    *last_int = total;
                }
                _ => merged.push((mz, intensity)),
            }
        }

        let max_intensity = merged
            .iter()
            .map(|&(_, i)| i)
            .fold(f64::MIN, f64::max)
            .max(1e-12);
        let mut peaks: Vec<ProcessedPeak> = merged
            .into_iter()
            .enumerate()
            .map(|(index, (mz, intensity))| ProcessedPeak {
                mz,
                relative_intensity: intensity / max_intensity,
                index,
            })
            .collect();

        // synthetic parent peak, always the last entry
        let parent_index = peaks.len();
        peaks.push(ProcessedPeak {
            mz: experiment.precursor_mz,
            relative_intensity: 1.0,
            index: parent_index,
        });

        let n = peaks.len();
        let mut scoring = Scoring::default();
        scoring.resize(n);
        Ok(Self {
            experiment,
            peaks,
            decompositions: vec![DecompositionList::default(); n],
            scoring,
            annotations: TypedRegistry::default(),
        })
    }

    pub fn parent_index(&self) -> usize {
        self.peaks.len() - 1
    }

    pub fn parent_peak(&self) -> &ProcessedPeak {
        &self.peaks[self.parent_index()]
    }

    /// Root candidates: the decompositions of the parent peak.
    pub fn root_decompositions(&self) -> &DecompositionList {
        &self.decompositions[self.parent_index()]
    }

    /// Summed relative intensity of all fragment peaks (parent excluded).
    pub fn total_fragment_intensity(&self) -> f64 {
        self.peaks[..self.parent_index()]
            .iter()
            .map(|p| p.relative_intensity)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formula(s: &str) -> MolecularFormula {
        MolecularFormula::parse(s).unwrap()
    }

    fn glucose_experiment() -> Ms2Experiment {
        let mut exp = Ms2Experiment::new("glucose", 181.0707);
        exp.ionization = Some(Ionization::Protonated);
        exp.spectra = vec![vec![
            (163.0601, 500.0),
            (145.0495, 300.0),
            (127.0390, 100.0),
            (85.0284, 800.0),
        ]];
        exp
    }

    #[test]
    fn parent_peak_is_last_and_peaks_sorted() {
        let input = ProcessedInput::from_experiment(glucose_experiment()).unwrap();
        assert_eq!(input.peaks.len(), 5);
        assert_eq!(input.parent_peak().mz, 181.0707);
        assert_eq!(input.parent_index(), 4);
        for w in input.peaks[..4].windows(2) {
            assert!(w[0].mz < w[1].mz);
        }
        // most intense fragment normalized to 1.0
        let max = input.peaks[..4]
            .iter()
            .map(|p| p.relative_intensity)
            .fold(f64::MIN, f64::max);
        assert!((max - 1.0).abs() < 1e-12);
    }

    #[test]
    fn duplicate_peaks_from_scans_are_merged() {
        let mut exp = glucose_experiment();
        exp.spectra.push(vec![(163.0603, 400.0)]);
        let input = ProcessedInput::from_experiment(exp).unwrap();
        // still 4 fragment peaks plus parent
        assert_eq!(input.peaks.len(), 5);
        let merged = input
            .peaks
            .iter()
            .find(|p| (p.mz - 163.06).abs() < 0.01)
            .unwrap();
        assert!(merged.mz > 163.0601 && merged.mz < 163.0603);
    }

    #[test]
    fn peaks_above_precursor_are_dropped() {
        let mut exp = glucose_experiment();
        exp.spectra[0].push((190.0, 1000.0));
        let input = ProcessedInput::from_experiment(exp).unwrap();
        assert!(input.peaks.iter().all(|p| p.mz <= 181.0707));
    }

    #[test]
    fn empty_experiment_is_rejected() {
        let exp = Ms2Experiment::new("empty", 181.0707);
        assert!(matches!(
            ProcessedInput::from_experiment(exp),
            Err(FtPipelineError::EmptyInput { .. })
        ));
    }

    #[test]
    fn disjoin_assigns_shared_formula_to_closer_peak() {
        let shared = Decomposition {
            formula: formula("C6H10O5"),
            ionization: Ionization::Protonated,
            score: 0.0,
        };
        // theoretical [M+H]+ of C6H10O5 is ~163.0601
        let mut closer = DecompositionList {
            decompositions: vec![shared.clone()],
        };
        let mut farther = DecompositionList {
            decompositions: vec![shared.clone()],
        };
        closer.disjoin(&mut farther, 163.0602, 163.0710);
        assert_eq!(closer.len(), 1);
        assert_eq!(farther.len(), 0);

        // and the other way around
        let mut a = DecompositionList {
            decompositions: vec![shared.clone()],
        };
        let mut b = DecompositionList {
            decompositions: vec![shared],
        };
        a.disjoin(&mut b, 163.0710, 163.0602);
        assert_eq!(a.len(), 0);
        assert_eq!(b.len(), 1);
    }
}
