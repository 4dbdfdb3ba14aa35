use super::PeakScorer;
use crate::annotations::TreeSizeBonus;
use crate::input::ProcessedInput;

/// Log-odds that a peak is signal rather than exponential noise: intense
/// peaks are worth explaining, near-baseline peaks barely matter.
#[derive(Debug, Clone, Copy)]
pub struct PeakIsNoiseScorer {
    pub lambda: f64,
}

impl Default for PeakIsNoiseScorer {
    fn default() -> Self {
        Self { lambda: 2.0 }
    }
}

impl PeakScorer for PeakIsNoiseScorer {
    fn score(&self, input: &ProcessedInput, scores: &mut [f64]) {
        for (peak, score) in input.peaks.iter().zip(scores.iter_mut()) {
            // survival log-odds of the exponential noise model
            *score += self.lambda * peak.relative_intensity;
        }
    }
}

/// Flat per-peak bonus controlling how large trees grow. The effective
/// bonus lives in the input annotations so it can be swapped without
/// recomputing any other score.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeSizeScorer {
    pub default_bonus: f64,
}

impl TreeSizeScorer {
    /// Replaces the tree size bonus in-place by shifting every peak score
    /// by the delta. Cheap enough to run once per search round.
    pub fn fast_replace(input: &mut ProcessedInput, new_bonus: f64) {
        let old = input
            .annotations
            .get::<TreeSizeBonus>()
            .map(|b| b.score)
            .unwrap_or(0.0);
        let delta = new_bonus - old;
        if delta != 0.0 {
            for score in input.scoring.peak_scores.iter_mut() {
                *score += delta;
            }
        }
        input.annotations.set(TreeSizeBonus { score: new_bonus });
    }
}

impl PeakScorer for TreeSizeScorer {
    fn score(&self, input: &ProcessedInput, scores: &mut [f64]) {
        let bonus = input
            .annotations
            .get::<TreeSizeBonus>()
            .map(|b| b.score)
            .unwrap_or(self.default_bonus);
        for score in scores.iter_mut() {
            *score += bonus;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Ms2Experiment;

    fn dummy_input() -> ProcessedInput {
        let mut exp = Ms2Experiment::new("dummy", 181.0707);
        exp.spectra = vec![vec![(163.0601, 100.0), (85.0284, 25.0)]];
        ProcessedInput::from_experiment(exp).unwrap()
    }

    #[test]
    fn intense_peaks_score_higher() {
        let input = dummy_input();
        let scorer = PeakIsNoiseScorer::default();
        let mut scores = vec![0.0; input.peaks.len()];
        scorer.score(&input, &mut scores);
        // peak 1 (163, full intensity) vs peak 0 (85, quarter intensity)
        assert!(scores[1] > scores[0]);
        assert!(scores[0] > 0.0);
    }

    #[test]
    fn fast_replace_shifts_scores_by_delta() {
        let mut input = dummy_input();
        input.scoring.peak_scores = vec![1.0; input.peaks.len()];
        TreeSizeScorer::fast_replace(&mut input, 2.0);
        assert!(input.scoring.peak_scores.iter().all(|&s| s == 3.0));
        TreeSizeScorer::fast_replace(&mut input, 0.5);
        assert!(input.scoring.peak_scores.iter().all(|&s| s == 1.5));
        assert_eq!(
            input.annotations.get::<TreeSizeBonus>().map(|b| b.score),
            Some(0.5)
        );
    }
}
