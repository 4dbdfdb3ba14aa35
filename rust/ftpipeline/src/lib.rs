pub mod analysis;
pub mod annotations;
pub mod decompose;
pub mod errors;
pub mod graph_builder;
pub mod input;
pub mod instance;
pub mod queue;
pub mod recalibrate;
pub mod reduction;
pub mod scoring;
pub mod tree_builder;

pub use analysis::FragmentationPatternAnalysis;
pub use annotations::{
    Beautified,
    Ms2MassDeviation,
    NumberOfCandidates,
    Timeout,
    TreeSizeBonus,
    TreeStatistics,
    UnconsideredCandidatesUpperBound,
    UseHeuristic,
    Whiteset,
};
pub use errors::{
    FtPipelineError,
    Result,
};
pub use input::{
    Decomposition,
    Ms2Experiment,
    ProcessedInput,
};
pub use instance::{
    FinalResult,
    TreeComputationInstance,
};
pub use queue::DoubleEndWeightedQueue;
pub use tree_builder::{
    TreeBuilder,
    TreeBuilderResult,
};
