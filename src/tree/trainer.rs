//! Depth-synchronous tree trainer.
//!
//! For every depth the trainer computes the frontier, cuts it into slices
//! that fit the histogram budget, runs the histogram pipeline over the whole
//! training set once per slice and materialises the selected splits before
//! moving on.

use crate::config::TrainerParams;
use crate::core::error::{ForestError, Result};
use crate::core::types::SampleCount;
use crate::dataset::TrainingSet;
use crate::device::{DeviceContext, SlotCapacity};
use crate::tree::frontier::{Frontier, HistogramCapacity};
use crate::tree::histogram::{select_accumulator, HistogramPipeline, RecordAccumulator, SliceHistograms};
use crate::tree::split::{
    EntropyCriterion, RotationCriterion, SplitContext, SplitCriterion, SplitLearner,
};
use crate::tree::statistics::NodeStatistics;
use crate::tree::tree::Tree;
use std::time::{Duration, Instant};

/// Statistics of one trained depth.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthReport {
    /// Training depth (1 = root)
    pub depth: usize,
    /// Frontier nodes
    pub frontier_size: usize,
    /// Histogram slices processed
    pub slices: usize,
    /// Nodes split
    pub splits: usize,
    /// Frontier nodes kept as leaves
    pub retained: usize,
    /// Images streamed through the device (summed over slices)
    pub processed_images: usize,
    /// Images skipped as irrelevant (summed over slices)
    pub skipped_images: usize,
    /// Wall time of the depth
    pub elapsed: Duration,
}

/// Summary of one `train` call.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    /// Tree id
    pub tree_id: u32,
    /// One entry per trained depth
    pub depths: Vec<DepthReport>,
    /// Histogram slots available per slice
    pub histogram_slots: usize,
    /// Samples that reached each node
    pub node_samples: Vec<SampleCount>,
    /// Total wall time
    pub elapsed: Duration,
}

impl TrainingReport {
    /// Splits over all depths.
    pub fn total_splits(&self) -> usize {
        self.depths.iter().map(|d| d.splits).sum()
    }
}

/// Grows trees on one device with one split criterion.
pub struct TreeTrainer<S: SplitCriterion> {
    device: DeviceContext,
    criterion: S,
    accumulator: Box<dyn RecordAccumulator>,
}

/// Per-pixel classification trainer.
pub type ClassificationTrainer = TreeTrainer<EntropyCriterion>;

/// Rotation-regression trainer.
pub type RegressionTrainer = TreeTrainer<RotationCriterion>;

impl ClassificationTrainer {
    /// Entropy trainer on `device`.
    pub fn classification(device: DeviceContext) -> Self {
        Self::new(device, EntropyCriterion)
    }
}

impl RegressionTrainer {
    /// Rotation trainer on `device`.
    pub fn regression(device: DeviceContext) -> Self {
        Self::new(device, RotationCriterion)
    }
}

impl<S: SplitCriterion> TreeTrainer<S> {
    /// Trainer using `criterion` on `device`.
    pub fn new(device: DeviceContext, criterion: S) -> Self {
        let accumulator = select_accumulator(device.config().use_simd);
        log::debug!("histogram accumulation uses the {} kernels", accumulator.name());
        TreeTrainer {
            device,
            criterion,
            accumulator,
        }
    }

    /// Device the trainer runs on.
    pub fn device(&self) -> &DeviceContext {
        &self.device
    }

    /// Releases the device.
    pub fn into_device(self) -> DeviceContext {
        self.device
    }

    fn check_inputs(
        &self,
        tree: &Tree,
        set: &TrainingSet,
        params: &TrainerParams,
        start_depth: usize,
        end_depth: usize,
    ) -> Result<()> {
        if start_depth != 1 {
            return Err(ForestError::not_implemented(format!(
                "resuming training at depth {}",
                start_depth
            )));
        }
        if end_depth == 0 || end_depth > tree.depth() {
            return Err(ForestError::invalid_parameter(
                "end_depth",
                end_depth.to_string(),
                format!("must be in 1..={}", tree.depth()),
            ));
        }
        let task = self.criterion.task();
        if tree.task() != task || set.kind() != task {
            return Err(ForestError::training(format!(
                "{} trainer got a {} tree and a {} training set",
                task,
                tree.task(),
                set.kind()
            )));
        }
        let output_dim = self.criterion.output_dim(set.n_classes());
        if tree.output_dim() != output_dim {
            return Err(ForestError::dimension_mismatch(
                format!("tree output dimension {}", output_dim),
                format!("{}", tree.output_dim()),
            ));
        }
        if tree.feat_dim() != self.device.feat_dim() {
            return Err(ForestError::dimension_mismatch(
                format!("feature dimension {}", self.device.feat_dim()),
                format!("{}", tree.feat_dim()),
            ));
        }
        params.validate(tree.feat_dim())
    }

    /// Grows `tree` from its root down to `end_depth` levels.
    ///
    /// The tree is reset first. Only `start_depth == 1` is supported.
    pub fn train(
        &mut self,
        tree: &mut Tree,
        set: &TrainingSet,
        params: &TrainerParams,
        start_depth: usize,
        end_depth: usize,
    ) -> Result<TrainingReport> {
        self.check_inputs(tree, set, params, start_depth, end_depth)?;
        let started = Instant::now();

        let pairs = params.pairs_per_node();
        let row_bytes = params.local_histogram_bytes();
        self.device.set_params(params.clone());
        self.device.allocate_image_slots(SlotCapacity {
            width: set.max_width(),
            height: set.max_height(),
            channels: set.channels(),
            max_samples: set.max_samples(),
            histogram_row_bytes: row_bytes,
        })?;

        tree.reset();
        tree.set_leaf(0, &self.criterion.root_output(set))?;
        let mut stats = NodeStatistics::for_training_set(tree.num_nodes(), set);
        self.device.load_tree(tree)?;

        let slot_len = self.criterion.slot_len(pairs, set.n_classes());
        let per_node_bytes = (slot_len * std::mem::size_of::<S::Elem>()) as u64;
        let capacity = HistogramCapacity::compute(
            end_depth,
            per_node_bytes,
            self.device.config().histogram_memory_budget,
        )?;
        let mut histograms = SliceHistograms::<S::Elem>::new(capacity.slots, slot_len)?;
        log::info!(
            "training tree {} to depth {}: {} images, {} samples, {} histogram slots of {} bytes",
            tree.id(),
            end_depth,
            set.len(),
            set.total_samples(),
            capacity.slots,
            per_node_bytes
        );

        let pipeline = HistogramPipeline::new(
            &self.device,
            set,
            &self.criterion,
            self.accumulator.as_ref(),
            pairs,
            row_bytes,
        );
        let learner = SplitLearner::new(params);
        let mut skipped = vec![false; set.len()];
        let mut depths = Vec::new();

        for depth in start_depth..end_depth {
            let depth_started = Instant::now();
            let frontier = Frontier::init(tree, depth, &stats, params.per_leaf_samples_thr)?;
            if frontier.is_empty() {
                log::info!("depth {}: no splittable node left", depth);
                break;
            }
            let slices = frontier.slices(capacity.slots);
            if slices.len() > 1 {
                log::warn!(
                    "depth {}: {} frontier nodes exceed {} histogram slots, using {} slices",
                    depth,
                    frontier.len(),
                    capacity.slots,
                    slices.len()
                );
            }

            let mut report = DepthReport {
                depth,
                frontier_size: frontier.len(),
                slices: slices.len(),
                splits: 0,
                retained: 0,
                processed_images: 0,
                skipped_images: 0,
                elapsed: Duration::ZERO,
            };
            let mut to_skip = vec![true; set.len()];

            for slice in &slices {
                log::debug!(
                    "depth {} slice {}: nodes {}..={} ({} slots)",
                    depth,
                    slice.index(),
                    slice.start_node(),
                    slice.end_node(),
                    slice.len()
                );
                let outcome = pipeline.traverse(
                    depth,
                    slice,
                    &mut histograms,
                    &skipped,
                    &stats,
                    params.per_leaf_samples_thr,
                )?;
                for (skip, contributed) in to_skip.iter_mut().zip(&outcome.contributing) {
                    if *contributed {
                        *skip = false;
                    }
                }
                report.processed_images += outcome.processed_images;
                report.skipped_images += outcome.skipped_images;

                let ctx = SplitContext {
                    device: &self.device,
                    params,
                    stats: &stats,
                    slice,
                };
                let decisions = self.criterion.select_splits(&ctx, &histograms)?;
                let summary = learner.apply(tree, &mut stats, slice, &decisions, &self.device)?;
                report.splits += summary.split;
                report.retained += summary.retained;
            }

            skipped = to_skip;
            report.elapsed = depth_started.elapsed();
            log::info!(
                "depth {}: {} frontier nodes, {} split, {} kept as leaves ({:.2?})",
                depth,
                report.frontier_size,
                report.splits,
                report.retained,
                report.elapsed
            );
            depths.push(report);
        }

        self.device.finish()?;
        Ok(TrainingReport {
            tree_id: tree.id(),
            depths,
            histogram_slots: capacity.slots,
            node_samples: stats.totals().to_vec(),
            elapsed: started.elapsed(),
        })
    }
}
