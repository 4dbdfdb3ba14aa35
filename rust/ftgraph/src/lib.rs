pub mod chem;
pub mod errors;
pub mod graph;

pub use chem::{
    Deviation,
    Element,
    Ionization,
    MolecularFormula,
};
pub use errors::{
    FtGraphError,
    Result,
};
pub use graph::{
    AnnotationRegistry,
    ColorSet,
    FGraph,
    FTree,
    Fragment,
    FragmentAnnotation,
    FragmentKey,
    GraphStorage,
    Loss,
    LossAnnotation,
    LossKey,
    PostOrderCursor,
    TypedRegistry,
};
