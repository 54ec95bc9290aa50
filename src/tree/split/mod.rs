//! Split criteria and split materialisation.
//!
//! A [`SplitCriterion`] fixes the histogram record layout, how a sample is
//! folded into it and how the best candidate pair is scored. Everything
//! else (frontier, pipeline, orchestration) is shared by both criteria.

pub mod entropy;
pub mod regression;
pub mod rotation;

pub use entropy::EntropyCriterion;
pub use regression::RotationCriterion;

use crate::config::TrainerParams;
use crate::core::error::Result;
use crate::core::types::{FeatureValue, NodeIndex, PixelIndex, SampleCount, TaskKind};
use crate::dataset::{TrainingImage, TrainingSet};
use crate::device::DeviceContext;
use crate::tree::frontier::FrontierSlice;
use crate::tree::histogram::{HistogramElement, RecordAccumulator, SliceHistograms};
use crate::tree::sampling::{sample_feature, sample_threshold};
use crate::tree::statistics::NodeStatistics;
use crate::tree::tree::Tree;

/// Inputs shared by every split selection call.
#[derive(Debug, Clone, Copy)]
pub struct SplitContext<'a> {
    /// Device running the learn kernel
    pub device: &'a DeviceContext,
    /// Candidate sampling parameters
    pub params: &'a TrainerParams,
    /// Per-node counters
    pub stats: &'a NodeStatistics,
    /// Slice whose slots are being scored
    pub slice: &'a FrontierSlice,
}

impl SplitContext<'_> {
    /// Candidate pairs per node.
    pub fn pairs(&self) -> usize {
        self.params.pairs_per_node()
    }
}

/// Winning candidate of one node, with the children it produces.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitDecision {
    /// Candidate feature index
    pub feature_idx: usize,
    /// Candidate threshold index
    pub threshold_idx: usize,
    /// Criterion value of the pair (lower is better)
    pub score: f64,
    /// Output of the left child
    pub left_output: Vec<f32>,
    /// Output of the right child
    pub right_output: Vec<f32>,
    /// Per-class counts (or the single total) of the left child
    pub left_counts: Vec<SampleCount>,
    /// Per-class counts (or the single total) of the right child
    pub right_counts: Vec<SampleCount>,
}

/// Histogram layout plus scoring rule of one learning task.
pub trait SplitCriterion: Send + Sync {
    /// Histogram entry type.
    type Elem: HistogramElement;

    /// Task the criterion trains.
    fn task(&self) -> TaskKind;

    /// Output vector length for `n_classes` classes.
    fn output_dim(&self, n_classes: usize) -> usize;

    /// Entries of one node histogram.
    fn slot_len(&self, pairs: usize, n_classes: usize) -> usize;

    /// Folds sample `pixel` of `image` into `slot`. Returns whether the sample
    /// contributed.
    fn accumulate(
        &self,
        slot: &mut [Self::Elem],
        bits: &[u8],
        image: &TrainingImage,
        pixel: PixelIndex,
        pairs: usize,
        accumulator: &dyn RecordAccumulator,
    ) -> bool;

    /// Output of the root before any split.
    fn root_output(&self, set: &TrainingSet) -> Vec<f32>;

    /// Best split of every node of `ctx.slice`, `None` for nodes that stay
    /// leaves.
    fn select_splits(
        &self,
        ctx: &SplitContext<'_>,
        histograms: &SliceHistograms<Self::Elem>,
    ) -> Result<Vec<Option<SplitDecision>>>;
}

/// Outcome of materialising one slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitSummary {
    /// Nodes split
    pub split: usize,
    /// Nodes kept as leaves
    pub retained: usize,
}

/// Writes selected splits into the tree and back to the device.
#[derive(Debug, Clone, Copy)]
pub struct SplitLearner<'a> {
    params: &'a TrainerParams,
}

impl<'a> SplitLearner<'a> {
    /// Learner drawing split parameters from `params`.
    pub fn new(params: &'a TrainerParams) -> Self {
        SplitLearner { params }
    }

    /// Applies `decisions` (one per slice node) to `tree` and `stats`.
    ///
    /// The split node's feature and threshold are regenerated from the hash
    /// chain, so they equal the candidate the histogram scored.
    pub fn apply(
        &self,
        tree: &mut Tree,
        stats: &mut NodeStatistics,
        slice: &FrontierSlice,
        decisions: &[Option<SplitDecision>],
        device: &DeviceContext,
    ) -> Result<SplitSummary> {
        let mut summary = SplitSummary::default();
        let mut feature = vec![0.0 as FeatureValue; tree.feat_dim()];
        let mut last_changed: Option<NodeIndex> = None;

        for (node, decision) in slice.nodes().iter().copied().zip(decisions) {
            let Some(decision) = decision else {
                log::debug!(
                    "node {} kept as leaf: best feature is not discriminative enough",
                    node
                );
                summary.retained += 1;
                continue;
            };

            sample_feature(tree.id(), node, decision.feature_idx, self.params, &mut feature);
            let threshold = sample_threshold(
                tree.id(),
                node,
                decision.feature_idx,
                decision.threshold_idx,
                self.params,
            );
            tree.split(
                node,
                &feature,
                threshold,
                &decision.left_output,
                &decision.right_output,
            )?;

            let (left, right) = (2 * node + 1, 2 * node + 2);
            if stats.n_classes() > 0 {
                stats.set_class_counts(left, &decision.left_counts);
                stats.set_class_counts(right, &decision.right_counts);
            } else {
                stats.set_total(left, decision.left_counts.iter().sum());
                stats.set_total(right, decision.right_counts.iter().sum());
            }
            log::trace!(
                "node {} split on candidate ({}, {}): {} | {} samples",
                node,
                decision.feature_idx,
                decision.threshold_idx,
                stats.total(left),
                stats.total(right)
            );
            summary.split += 1;
            last_changed = Some(right);
        }

        if let Some(end) = last_changed {
            device.upload_tree_range(tree, slice.start_node(), end)?;
        }
        Ok(summary)
    }
}
