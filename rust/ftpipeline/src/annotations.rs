use crate::errors::{
    FtPipelineError,
    Result,
};
use ftgraph::{
    Deviation,
    MolecularFormula,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::time::Duration;

/// Artificial per-peak bonus that favors larger trees. Adjusted during the
/// search when too little intensity is explained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeSizeBonus {
    pub score: f64,
}

impl Default for TreeSizeBonus {
    fn default() -> Self {
        Self { score: 0.0 }
    }
}

/// How many candidate trees the caller wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberOfCandidates(pub usize);

impl Default for NumberOfCandidates {
    fn default() -> Self {
        NumberOfCandidates(10)
    }
}

/// Wall-clock budgets for one instance and for a single tree computation.
/// Zero means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeout {
    pub seconds_per_instance: u64,
    pub seconds_per_tree: u64,
}

impl Timeout {
    pub fn none() -> Self {
        Self {
            seconds_per_instance: 0,
            seconds_per_tree: 0,
        }
    }

    pub fn per_instance(&self) -> Option<Duration> {
        (self.seconds_per_instance > 0).then(|| Duration::from_secs(self.seconds_per_instance))
    }

    pub fn per_tree(&self) -> Option<Duration> {
        (self.seconds_per_tree > 0).then(|| Duration::from_secs(self.seconds_per_tree))
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::none()
    }
}

/// Restricts the precursor formula candidates to an explicit list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Whiteset {
    pub formulas: Vec<MolecularFormula>,
}

/// Mass accuracy settings: `allowed` bounds the decomposition window,
/// `standard` feeds the mass deviation scorer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ms2MassDeviation {
    pub allowed: Deviation,
    pub standard: Deviation,
}

impl Default for Ms2MassDeviation {
    fn default() -> Self {
        Self {
            allowed: Deviation::with_absolute(10.0, 0.002),
            standard: Deviation::with_absolute(5.0, 0.001),
        }
    }
}

/// Above `use_above_mz` the heuristic pre-ranks candidates for the exact
/// solver; above `only_above_mz` the heuristic solution is kept as is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UseHeuristic {
    pub use_above_mz: f64,
    pub only_above_mz: f64,
}

impl Default for UseHeuristic {
    fn default() -> Self {
        Self {
            use_above_mz: 300.0,
            only_above_mz: 650.0,
        }
    }
}

/// Tree annotation recording whether the tree had to be grown with an
/// artificial node boost to explain enough of the spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Beautified {
    Ugly,
    Beautiful { node_boost: f64 },
}

impl Beautified {
    pub fn ugly() -> Self {
        Beautified::Ugly
    }

    pub fn beautiful(node_boost: f64) -> Self {
        Beautified::Beautiful { node_boost }
    }

    pub fn is_beautiful(&self) -> bool {
        matches!(self, Beautified::Beautiful { .. })
    }

    pub fn node_boost(&self) -> f64 {
        match self {
            Beautified::Ugly => 0.0,
            Beautified::Beautiful { node_boost } => *node_boost,
        }
    }

    /// Parses a persisted beautification state. Trees written by older
    /// versions may carry arbitrary text in this field, so anything that is
    /// not a `beautiful (...)` marker reads as not beautified; only a
    /// malformed node boost inside the marker is an error.
    pub fn from_string(s: &str) -> Result<Self> {
        let s = s.trim();
        let Some(inner) = s
            .strip_prefix("beautiful (")
            .and_then(|rest| rest.strip_suffix(')'))
        else {
            return Ok(Beautified::Ugly);
        };
        let node_boost: f64 = inner.trim().parse().map_err(|_| FtPipelineError::ParseError {
            msg: format!("invalid node boost: '{}'", inner),
        })?;
        Ok(Beautified::Beautiful { node_boost })
    }
}

impl std::fmt::Display for Beautified {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Beautified::Ugly => write!(f, "ugly"),
            Beautified::Beautiful { node_boost } => write!(f, "beautiful ({})", node_boost),
        }
    }
}

/// Tree annotation: how many precursor candidates were never handed to the
/// exact solver, and an upper bound on what their trees could have scored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnconsideredCandidatesUpperBound {
    pub remaining_candidates: usize,
    pub lowest_considered_score: f64,
}

/// Tree annotation with summary statistics over the explained spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TreeStatistics {
    pub explained_intensity: f64,
    pub ratio_of_explained_peaks: f64,
}

/// Fragment annotation tying a tree vertex back to its measured peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotatedPeak {
    pub mz: f64,
    pub recalibrated_mz: f64,
    pub relative_intensity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beautified_string_roundtrip() {
        let b = Beautified::from_string("beautiful (3.5)").unwrap();
        assert!((b.node_boost() - 3.5).abs() < 1e-12);
        assert!(b.is_beautiful());
        assert_eq!(b.to_string(), "beautiful (3.5)");
        let u = Beautified::from_string("ugly").unwrap();
        assert_eq!(u, Beautified::Ugly);
        assert_eq!(u.node_boost(), 0.0);
    }

    #[test]
    fn beautified_unknown_strings_read_as_ugly() {
        let b = Beautified::from_string("gorgeous").unwrap();
        assert!(!b.is_beautiful());
        assert_eq!(Beautified::from_string("").unwrap(), Beautified::Ugly);
        // only a broken node boost inside the marker is a hard error
        assert!(Beautified::from_string("beautiful (nope)").is_err());
    }

    #[test]
    fn whiteset_serializes_formulas_as_strings() {
        let ws = Whiteset {
            formulas: vec![MolecularFormula::parse("C6H12O6").unwrap()],
        };
        let json = serde_json::to_string(&ws).unwrap();
        assert_eq!(json, r#"{"formulas":["C6H12O6"]}"#);
        let back: Whiteset = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ws);
    }

    #[test]
    fn timeout_zero_means_unlimited() {
        let t = Timeout::none();
        assert!(t.per_instance().is_none());
        assert!(t.per_tree().is_none());
        let t = Timeout {
            seconds_per_instance: 5,
            seconds_per_tree: 1,
        };
        assert_eq!(t.per_instance(), Some(Duration::from_secs(5)));
        assert_eq!(t.per_tree(), Some(Duration::from_secs(1)));
    }
}
