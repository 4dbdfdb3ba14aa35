use ftgraph::{
    Element,
    MolecularFormula,
};

/// Upper bounds per element for formula candidates, expressed as a formula
/// whose amounts are the maximum counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormulaConstraints {
    upper: MolecularFormula,
}

impl FormulaConstraints {
    pub fn new(upper: MolecularFormula) -> Self {
        Self { upper }
    }

    /// Default CHNOPS-and-halogen bounds for de novo decomposition of small
    /// molecules up to the given neutral mass.
    pub fn default_organic(max_mass: f64) -> Self {
        let mut upper = MolecularFormula::empty();
        let carbons = (max_mass / Element::C.mass()).ceil() as i16;
        upper.set(Element::C, carbons);
        upper.set(Element::H, (carbons * 3).min(120));
        upper.set(Element::N, 10);
        upper.set(Element::O, 20);
        upper.set(Element::P, 6);
        upper.set(Element::S, 6);
        upper.set(Element::CL, 4);
        Self { upper }
    }

    /// Bounds that admit exactly the subformulas of the given candidates:
    /// the element-wise maximum over all of them.
    pub fn all_subsets_of<'a>(candidates: impl Iterator<Item = &'a MolecularFormula>) -> Self {
        let mut upper = MolecularFormula::empty();
        for f in candidates {
            for (element, amount) in f.elements() {
                if amount > upper.number_of(element) {
                    upper.set(element, amount);
                }
            }
        }
        Self { upper }
    }

    pub fn upper_bounds(&self) -> &MolecularFormula {
        &self.upper
    }

    pub fn is_satisfied(&self, formula: &MolecularFormula) -> bool {
        self.upper.contains(formula)
    }
}

/// Enumerates all formulas within the constraint bounds whose monoisotopic
/// mass falls into a window around a target mass. Elements are ordered by
/// descending mass so the depth-first search prunes early.
#[derive(Debug, Clone)]
pub struct MassDecomposer {
    // (element, mass, max count), heaviest first
    elements: Vec<(Element, f64, i16)>,
}

impl MassDecomposer {
    pub fn new(constraints: &FormulaConstraints) -> Self {
        let mut elements: Vec<(Element, f64, i16)> = Element::all()
            .filter_map(|e| {
                let max = constraints.upper_bounds().number_of(e);
                (max > 0).then(|| (e, e.mass(), max))
            })
            .collect();
        elements.sort_by(|a, b| b.1.total_cmp(&a.1));
        Self { elements }
    }

    /// All formulas with mass in `[neutral_mass - window, neutral_mass + window]`.
    /// The result is sorted by mass, then formula string.
    pub fn decompose(&self, neutral_mass: f64, window: f64) -> Vec<MolecularFormula> {
        if neutral_mass <= 0.0 {
            return Vec::new();
        }
        let lo = neutral_mass - window;
        let hi = neutral_mass + window;
        // reachable[i]: maximum mass achievable with elements i.. under the bounds
        let mut reachable = vec![0.0; self.elements.len() + 1];
        for i in (0..self.elements.len()).rev() {
            let (_, mass, max) = self.elements[i];
            reachable[i] = reachable[i + 1] + mass * max as f64;
        }
        let mut results = Vec::new();
        let mut current = MolecularFormula::empty();
        self.search(0, 0.0, lo, hi, &reachable, &mut current, &mut results);
        results.sort();
        results
    }

    fn search(
        &self,
        index: usize,
        mass_so_far: f64,
        lo: f64,
        hi: f64,
        reachable: &[f64],
        current: &mut MolecularFormula,
        results: &mut Vec<MolecularFormula>,
    ) {
        if index == self.elements.len() {
            if mass_so_far >= lo && mass_so_far <= hi && !current.is_empty() {
                results.push(*current);
            }
            return;
        }
        if mass_so_far + reachable[index] < lo || mass_so_far > hi {
            return;
        }
        let (element, mass, max) = self.elements[index];
        let max_here = max.min(((hi - mass_so_far) / mass).floor() as i16);
        for count in 0..=max_here {
            current.set(element, count);
            self.search(
                index + 1,
                mass_so_far + mass * count as f64,
                lo,
                hi,
                reachable,
                current,
                results,
            );
        }
        current.set(element, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formula(s: &str) -> MolecularFormula {
        MolecularFormula::parse(s).unwrap()
    }

    #[test]
    fn finds_glucose_at_its_exact_mass() {
        let constraints = FormulaConstraints::default_organic(200.0);
        let decomposer = MassDecomposer::new(&constraints);
        let mass = formula("C6H12O6").mass();
        let hits = decomposer.decompose(mass, 0.002);
        assert!(hits.contains(&formula("C6H12O6")));
        for h in &hits {
            assert!((h.mass() - mass).abs() <= 0.002);
        }
    }

    #[test]
    fn subformula_bounds_restrict_the_alphabet() {
        let glucose = formula("C6H12O6");
        let constraints = FormulaConstraints::all_subsets_of([glucose].iter());
        let decomposer = MassDecomposer::new(&constraints);
        let water = formula("H2O");
        let hits = decomposer.decompose(water.mass(), 0.01);
        assert!(hits.contains(&water));
        for h in &hits {
            assert!(glucose.contains(h), "{} exceeds the bounds", h);
        }
    }

    #[test]
    fn empty_window_yields_nothing() {
        let constraints = FormulaConstraints::default_organic(100.0);
        let decomposer = MassDecomposer::new(&constraints);
        // 1.5 Da sits between plausible formulas
        assert!(decomposer.decompose(1.5, 0.001).is_empty());
        assert!(decomposer.decompose(-5.0, 0.01).is_empty());
    }

    #[test]
    fn results_are_sorted_by_mass() {
        let constraints = FormulaConstraints::default_organic(200.0);
        let decomposer = MassDecomposer::new(&constraints);
        let hits = decomposer.decompose(100.05, 0.05);
        for w in hits.windows(2) {
            assert!(w[0].mass() <= w[1].mass() + 1e-12);
        }
    }

    #[test]
    fn constraint_satisfaction_matches_contains() {
        let c = FormulaConstraints::all_subsets_of([formula("C6H12O6")].iter());
        assert!(c.is_satisfied(&formula("C2H4O2")));
        assert!(!c.is_satisfied(&formula("C7H12O6")));
        assert!(!c.is_satisfied(&formula("CH3N")));
    }
}
