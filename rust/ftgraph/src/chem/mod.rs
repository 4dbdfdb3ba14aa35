pub mod deviation;
pub mod formula;
pub mod ionization;

pub use deviation::Deviation;
pub use formula::{
    Element,
    MolecularFormula,
};
pub use ionization::Ionization;
