pub mod annotation;
pub mod fgraph;
pub mod ftree;
pub mod storage;
pub mod traversal;

pub use annotation::{
    AnnotationRegistry,
    AnnotationValue,
    FragmentAnnotation,
    LossAnnotation,
    TypedRegistry,
};
pub use fgraph::FGraph;
pub use ftree::{
    FTree,
    PostOrderCursor,
};
pub use storage::{
    Fragment,
    FragmentKey,
    GraphStorage,
    Loss,
    LossKey,
};
pub use traversal::{
    ColorSet,
    PostOrderIter,
    PreOrderIter,
};
