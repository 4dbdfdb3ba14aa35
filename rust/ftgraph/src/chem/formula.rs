use crate::errors::{
    FtGraphError,
    Result,
};
use serde::de::Error as _;
use serde::{
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Monoisotopic masses and valences for the element alphabet used in
/// fragmentation analysis. Order matters: C and H come first so the Hill
/// notation falls out of a plain scan, the rest is alphabetical.
const PERIODIC: &[(&str, f64, i32)] = &[
    ("C", 12.0, 4),
    ("H", 1.007_825_032_23, 1),
    ("B", 11.009_305_36, 3),
    ("Br", 78.918_337_6, 1),
    ("Cl", 34.968_852_68, 1),
    ("F", 18.998_403_162_7, 1),
    ("I", 126.904_471_9, 1),
    ("K", 38.963_706_486, 1),
    ("N", 14.003_074_004_43, 3),
    ("Na", 22.989_769_282, 1),
    ("O", 15.994_914_619_57, 2),
    ("P", 30.973_761_998, 3),
    ("S", 31.972_071_174_4, 2),
    ("Se", 79.916_521_8, 2),
    ("Si", 27.976_926_534_7, 4),
];

pub const NUM_ELEMENTS: usize = PERIODIC.len();

const CARBON: usize = 0;
const HYDROGEN: usize = 1;
const NITROGEN: usize = 8;
const OXYGEN: usize = 10;

/// An element of the fixed alphabet, identified by its index into the
/// periodic table above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Element(u8);

impl Element {
    pub const C: Element = Element(CARBON as u8);
    pub const H: Element = Element(HYDROGEN as u8);
    pub const N: Element = Element(NITROGEN as u8);
    pub const O: Element = Element(OXYGEN as u8);
    pub const P: Element = Element(11);
    pub const S: Element = Element(12);
    pub const CL: Element = Element(4);

    pub fn from_symbol(symbol: &str) -> Result<Self> {
        PERIODIC
            .iter()
            .position(|(s, _, _)| *s == symbol)
            .map(|i| Element(i as u8))
            .ok_or_else(|| FtGraphError::UnknownElement {
                symbol: symbol.to_string(),
            })
    }

    pub fn symbol(&self) -> &'static str {
        PERIODIC[self.0 as usize].0
    }

    pub fn mass(&self) -> f64 {
        PERIODIC[self.0 as usize].1
    }

    pub fn valence(&self) -> i32 {
        PERIODIC[self.0 as usize].2
    }

    pub fn all() -> impl Iterator<Item = Element> {
        (0..NUM_ELEMENTS).map(|i| Element(i as u8))
    }

    fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// A molecular formula over the fixed element alphabet. Amounts are kept in
/// a flat array so copies are cheap and subtraction is a per-element loop.
///
/// Ordering is by monoisotopic mass first, formula string second, so sorting
/// candidate lists is deterministic even for isomeric formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MolecularFormula {
    amounts: [i16; NUM_ELEMENTS],
}

impl MolecularFormula {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.amounts.iter().all(|&x| x == 0)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let bytes = s.trim().as_bytes();
        let mut formula = Self::empty();
        let mut i = 0;
        while i < bytes.len() {
            if !bytes[i].is_ascii_uppercase() {
                return Err(FtGraphError::FormulaParseError {
                    msg: format!("unexpected character '{}' in '{}'", bytes[i] as char, s),
                });
            }
            let start = i;
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_lowercase() {
                i += 1;
            }
            let symbol = &s[start..i];
            let element = Element::from_symbol(symbol)?;
            let digit_start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let amount: i16 = if digit_start == i {
                1
            } else {
                s[digit_start..i]
                    .parse()
                    .map_err(|_| FtGraphError::FormulaParseError {
                        msg: format!("invalid element count in '{}'", s),
                    })?
            };
            formula.amounts[element.index()] += amount;
        }
        Ok(formula)
    }

    pub fn number_of(&self, element: Element) -> i16 {
        self.amounts[element.index()]
    }

    pub fn set(&mut self, element: Element, amount: i16) {
        self.amounts[element.index()] = amount;
    }

    pub fn number_of_carbons(&self) -> i16 {
        self.amounts[CARBON]
    }

    pub fn number_of_hydrogens(&self) -> i16 {
        self.amounts[HYDROGEN]
    }

    pub fn number_of_nitrogens(&self) -> i16 {
        self.amounts[NITROGEN]
    }

    pub fn number_of_oxygens(&self) -> i16 {
        self.amounts[OXYGEN]
    }

    pub fn atom_count(&self) -> i32 {
        self.amounts.iter().map(|&x| x as i32).sum()
    }

    /// Atoms that are neither carbon nor hydrogen.
    pub fn hetero_atom_count(&self) -> i32 {
        self.atom_count() - (self.amounts[CARBON] + self.amounts[HYDROGEN]) as i32
    }

    /// Hetero-to-carbon ratio, used by the chemical plausibility prior.
    pub fn hetero_to_carbon_ratio(&self) -> f64 {
        let carbons = self.amounts[CARBON] as f64;
        if carbons <= 0.0 {
            self.hetero_atom_count() as f64
        } else {
            self.hetero_atom_count() as f64 / carbons
        }
    }

    pub fn mass(&self) -> f64 {
        self.amounts
            .iter()
            .enumerate()
            .map(|(i, &n)| n as f64 * PERIODIC[i].1)
            .sum()
    }

    /// Ring double bond equivalents: 1 + sum(n_e * (valence_e - 2)) / 2.
    /// Half-integral values indicate a radical composition.
    pub fn rdbe(&self) -> f64 {
        let v: i32 = self
            .amounts
            .iter()
            .enumerate()
            .map(|(i, &n)| n as i32 * (PERIODIC[i].2 - 2))
            .sum();
        1.0 + v as f64 / 2.0
    }

    pub fn add(&self, other: &Self) -> Self {
        let mut amounts = self.amounts;
        for (a, b) in amounts.iter_mut().zip(other.amounts.iter()) {
            *a += b;
        }
        Self { amounts }
    }

    /// Element-wise subtraction. Returns None as soon as any element would
    /// go negative, which makes sub-formula checks a single call.
    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        let mut amounts = self.amounts;
        for (a, b) in amounts.iter_mut().zip(other.amounts.iter()) {
            *a -= b;
            if *a < 0 {
                return None;
            }
        }
        Some(Self { amounts })
    }

    /// True if `other` can be subtracted from this formula without any
    /// element count going negative.
    pub fn contains(&self, other: &Self) -> bool {
        self.amounts
            .iter()
            .zip(other.amounts.iter())
            .all(|(a, b)| a >= b)
    }

    /// True if the formula consists of a single element species.
    pub fn is_single_element(&self) -> bool {
        self.amounts.iter().filter(|&&x| x > 0).count() == 1
    }

    pub fn elements(&self) -> impl Iterator<Item = (Element, i16)> + '_ {
        self.amounts
            .iter()
            .enumerate()
            .filter(|(_, &n)| n != 0)
            .map(|(i, &n)| (Element(i as u8), n))
    }
}

impl PartialOrd for MolecularFormula {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MolecularFormula {
    fn cmp(&self, other: &Self) -> Ordering {
        self.mass()
            .total_cmp(&other.mass())
            .then_with(|| self.to_string().cmp(&other.to_string()))
    }
}

/// Element indices sorted by symbol, for the carbon-free branch of the
/// Hill notation.
const ALPHABETICAL: [usize; NUM_ELEMENTS] = [2, 3, 0, 4, 5, 1, 6, 7, 8, 9, 10, 11, 12, 13, 14];

impl fmt::Display for MolecularFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Hill order: C then H then alphabetical, which is the table's
        // natural order; without carbon, everything goes alphabetically
        let natural: [usize; NUM_ELEMENTS] = std::array::from_fn(|i| i);
        let order = if self.amounts[CARBON] > 0 {
            &natural
        } else {
            &ALPHABETICAL
        };
        for &i in order {
            match self.amounts[i] {
                0 => {}
                1 => write!(f, "{}", PERIODIC[i].0)?,
                n => write!(f, "{}{}", PERIODIC[i].0, n)?,
            }
        }
        Ok(())
    }
}

impl FromStr for MolecularFormula {
    type Err = FtGraphError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for MolecularFormula {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MolecularFormula {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(s: &str) -> MolecularFormula {
        MolecularFormula::parse(s).unwrap()
    }

    #[test]
    fn parse_and_display_roundtrip() {
        assert_eq!(f("C6H12O6").to_string(), "C6H12O6");
        assert_eq!(f("H2O").to_string(), "H2O");
        assert_eq!(f("CH4").to_string(), "CH4");
        assert_eq!(f("C2H5Cl").to_string(), "C2H5Cl");
    }

    #[test]
    fn carbon_free_formulas_render_alphabetically() {
        assert_eq!(f("BH3").to_string(), "BH3");
        // ammonia in strict Hill notation
        assert_eq!(f("NH3").to_string(), "H3N");
        assert_eq!(f("H2SO4").to_string(), "H2O4S");
        // with carbon present, C and H still lead
        assert_eq!(f("CH3NO").to_string(), "CH3NO");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(MolecularFormula::parse("c6h12").is_err());
        assert!(MolecularFormula::parse("C6Xx2").is_err());
    }

    #[test]
    fn glucose_mass() {
        let mass = f("C6H12O6").mass();
        assert!((mass - 180.0633881).abs() < 1e-5, "mass was {}", mass);
    }

    #[test]
    fn checked_sub_detects_subformulas() {
        let glucose = f("C6H12O6");
        let water = f("H2O");
        let diff = glucose.checked_sub(&water).unwrap();
        assert_eq!(diff, f("C6H10O5"));
        assert!(water.checked_sub(&glucose).is_none());
        assert!(glucose.contains(&water));
        assert!(!water.contains(&glucose));
    }

    #[test]
    fn rdbe_values() {
        assert!((f("C6H6").rdbe() - 4.0).abs() < 1e-9);
        assert!((f("C6H12O6").rdbe() - 1.0).abs() < 1e-9);
        // odd hydrogen count over CHO gives a half-integral rdbe
        assert!((f("CH3").rdbe() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn ordering_is_mass_then_string() {
        let mut v = vec![f("C6H12O6"), f("H2O"), f("CO"), f("C2H4")];
        v.sort();
        assert_eq!(v[0], f("H2O"));
        assert_eq!(v[3], f("C6H12O6"));
    }

    #[test]
    fn single_element_detection() {
        assert!(f("C2").is_single_element());
        assert!(f("N2").is_single_element());
        assert!(!f("CN").is_single_element());
        assert!(!MolecularFormula::empty().is_single_element());
    }
}
