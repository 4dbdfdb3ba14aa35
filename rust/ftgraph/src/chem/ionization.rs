use serde::{
    Deserialize,
    Serialize,
};

const PROTON_MASS: f64 = 1.007_276_466_88;
const ELECTRON_MASS: f64 = 0.000_548_579_909;
const SODIUM_MASS: f64 = 22.989_769_282;
const POTASSIUM_MASS: f64 = 38.963_706_486;
const CHLORINE_MASS: f64 = 34.968_852_682;

/// Ion modes considered during fragmentation analysis. Each mode fixes the
/// mass shift between a neutral formula and the measured m/z, the charge
/// sign, and whether fragments in this mode are even-electron species.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ionization {
    #[serde(rename = "[M+H]+")]
    Protonated,
    #[serde(rename = "[M-H]-")]
    Deprotonated,
    #[serde(rename = "[M+Cl]-")]
    Chlorinated,
    #[serde(rename = "[M+Na]+")]
    Sodiated,
    #[serde(rename = "[M+K]+")]
    Potassiated,
    #[serde(rename = "[M]+")]
    IntrinsicallyPositive,
    #[serde(rename = "[M]-")]
    IntrinsicallyNegative,
}

impl Ionization {
    /// Mass added to the neutral monoisotopic mass to obtain the ion mass.
    pub fn mass_shift(&self) -> f64 {
        match self {
            Ionization::Protonated => PROTON_MASS,
            Ionization::Deprotonated => -PROTON_MASS,
            Ionization::Chlorinated => CHLORINE_MASS + ELECTRON_MASS,
            Ionization::Sodiated => SODIUM_MASS - ELECTRON_MASS,
            Ionization::Potassiated => POTASSIUM_MASS - ELECTRON_MASS,
            Ionization::IntrinsicallyPositive => -ELECTRON_MASS,
            Ionization::IntrinsicallyNegative => ELECTRON_MASS,
        }
    }

    pub fn charge(&self) -> i32 {
        match self {
            Ionization::Protonated
            | Ionization::Sodiated
            | Ionization::Potassiated
            | Ionization::IntrinsicallyPositive => 1,
            Ionization::Deprotonated
            | Ionization::Chlorinated
            | Ionization::IntrinsicallyNegative => -1,
        }
    }

    /// Intrinsically charged ions carry an odd electron count.
    pub fn is_intrinsical(&self) -> bool {
        matches!(
            self,
            Ionization::IntrinsicallyPositive | Ionization::IntrinsicallyNegative
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Ionization::Protonated => "[M+H]+",
            Ionization::Deprotonated => "[M-H]-",
            Ionization::Chlorinated => "[M+Cl]-",
            Ionization::Sodiated => "[M+Na]+",
            Ionization::Potassiated => "[M+K]+",
            Ionization::IntrinsicallyPositive => "[M]+",
            Ionization::IntrinsicallyNegative => "[M]-",
        }
    }

    /// Ion m/z for a neutral monoisotopic mass (singly charged modes only).
    pub fn add_to_mass(&self, neutral_mass: f64) -> f64 {
        neutral_mass + self.mass_shift()
    }

    /// Neutral monoisotopic mass for a measured ion m/z.
    pub fn subtract_from_mass(&self, mz: f64) -> f64 {
        mz - self.mass_shift()
    }

    pub fn positive_modes() -> &'static [Ionization] {
        &[
            Ionization::Protonated,
            Ionization::Sodiated,
            Ionization::Potassiated,
        ]
    }

    pub fn negative_modes() -> &'static [Ionization] {
        &[Ionization::Deprotonated, Ionization::Chlorinated]
    }
}

impl std::fmt::Display for Ionization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protonation_shift_is_symmetric() {
        let ion = Ionization::Protonated;
        let neutral = 180.0633881;
        let mz = ion.add_to_mass(neutral);
        assert!((mz - 181.0706646).abs() < 1e-5);
        assert!((ion.subtract_from_mass(mz) - neutral).abs() < 1e-12);
    }

    #[test]
    fn serde_names_are_ion_notation() {
        let s = serde_json::to_string(&Ionization::Protonated).unwrap();
        assert_eq!(s, "\"[M+H]+\"");
        let back: Ionization = serde_json::from_str("\"[M-H]-\"").unwrap();
        assert_eq!(back, Ionization::Deprotonated);
    }
}
