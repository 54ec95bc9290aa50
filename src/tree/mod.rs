//! Tree learning for the offload Random Forest trainer.
//!
//! This module holds the level-ordered tree, the per-node sample statistics,
//! candidate sampling, frontier management, the histogram pipeline, the
//! split criteria and the depth-synchronous trainer that ties them together.

pub mod frontier;
pub mod histogram;
pub mod sampling;
pub mod split;
pub mod statistics;
pub mod trainer;
#[allow(clippy::module_inception)]
pub mod tree;

pub use frontier::{max_frontier_size, num_slices, Frontier, FrontierSlice, HistogramCapacity};
pub use histogram::{
    select_accumulator, HistogramElement, HistogramPipeline, RecordAccumulator, SliceHistograms,
    TraversalOutcome,
};
pub use sampling::{sample_feature, sample_threshold, sample_thresholds, NodeCandidates};
pub use split::{
    EntropyCriterion, RotationCriterion, SplitContext, SplitCriterion, SplitDecision,
    SplitLearner, SplitSummary,
};
pub use statistics::NodeStatistics;
pub use trainer::{
    ClassificationTrainer, DepthReport, RegressionTrainer, TrainingReport, TreeTrainer,
};
pub use tree::{NodeView, Tree, MAX_TREE_DEPTH};
