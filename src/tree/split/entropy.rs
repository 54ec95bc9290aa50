//! Information-gain criterion for per-pixel classification.
//!
//! The slot of a node is laid out `[class][feature][threshold]` and counts the
//! samples each candidate pair sends left; right counts follow from the
//! node's per-class totals.

use crate::core::error::Result;
use crate::core::types::{PixelIndex, SampleCount, TaskKind};
use crate::dataset::{TrainingImage, TrainingSet};
use crate::tree::histogram::{RecordAccumulator, SliceHistograms};
use crate::tree::split::{SplitContext, SplitCriterion, SplitDecision};

/// Shannon entropy (bits) of a count vector.
pub fn entropy(counts: &[SampleCount]) -> f64 {
    let total: SampleCount = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .iter()
        .filter(|c| **c > 0)
        .map(|c| {
            let p = *c as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// Sample-weighted entropy of two children.
pub fn weighted_entropy(left: &[SampleCount], right: &[SampleCount]) -> f64 {
    let n_left: SampleCount = left.iter().sum();
    let n_right: SampleCount = right.iter().sum();
    let total = n_left + n_right;
    if total == 0 {
        return 0.0;
    }
    (n_left as f64 * entropy(left) + n_right as f64 * entropy(right)) / total as f64
}

fn posterior(counts: &[SampleCount]) -> Vec<f32> {
    let total: SampleCount = counts.iter().sum();
    counts
        .iter()
        .map(|c| if total > 0 { *c as f32 / total as f32 } else { 0.0 })
        .collect()
}

/// Entropy criterion evaluated by the device learn kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntropyCriterion;

impl SplitCriterion for EntropyCriterion {
    type Elem = u32;

    fn task(&self) -> TaskKind {
        TaskKind::Classification
    }

    fn output_dim(&self, n_classes: usize) -> usize {
        n_classes
    }

    fn slot_len(&self, pairs: usize, n_classes: usize) -> usize {
        pairs * n_classes
    }

    #[inline]
    fn accumulate(
        &self,
        slot: &mut [u32],
        bits: &[u8],
        image: &TrainingImage,
        pixel: PixelIndex,
        pairs: usize,
        accumulator: &dyn RecordAccumulator,
    ) -> bool {
        match image.class_of(pixel) {
            Some(class) => {
                accumulator.add_bits(&mut slot[class * pairs..(class + 1) * pairs], bits);
                true
            }
            None => false,
        }
    }

    fn root_output(&self, set: &TrainingSet) -> Vec<f32> {
        set.priors().to_vec()
    }

    fn select_splits(
        &self,
        ctx: &SplitContext<'_>,
        histograms: &SliceHistograms<u32>,
    ) -> Result<Vec<Option<SplitDecision>>> {
        let nodes = ctx.slice.nodes();
        let n_classes = ctx.stats.n_classes();
        let pairs = ctx.pairs();
        let n_thresholds = ctx.params.n_thresholds;
        let batch = ctx.device.config().parallel_learnt_nodes.max(1);
        let mut decisions = Vec::with_capacity(nodes.len());

        for (batch_index, batch_nodes) in nodes.chunks(batch).enumerate() {
            let first_slot = batch_index * batch;
            let totals: Vec<SampleCount> = batch_nodes
                .iter()
                .flat_map(|node| ctx.stats.class_counts(*node).iter().copied())
                .collect();
            let best = ctx.device.learn_best_features(
                histograms.block(first_slot, batch_nodes.len()),
                &totals,
                n_classes,
            )?;

            for (k, node) in batch_nodes.iter().enumerate() {
                let pair = best[k].feature as usize * n_thresholds + best[k].threshold as usize;
                let slot = histograms.slot(first_slot + k);
                let node_totals = ctx.stats.class_counts(*node);
                let left: Vec<SampleCount> = (0..n_classes)
                    .map(|c| SampleCount::from(slot[c * pairs + pair]))
                    .collect();
                let right: Vec<SampleCount> = node_totals
                    .iter()
                    .zip(&left)
                    .map(|(total, l)| total.saturating_sub(*l))
                    .collect();

                let n_left: SampleCount = left.iter().sum();
                let n_right: SampleCount = right.iter().sum();
                if n_left == 0 || n_right == 0 {
                    log::debug!(
                        "node {}: best pair sends all {} samples to one side",
                        node,
                        n_left + n_right
                    );
                    decisions.push(None);
                    continue;
                }

                decisions.push(Some(SplitDecision {
                    feature_idx: best[k].feature as usize,
                    threshold_idx: best[k].threshold as usize,
                    score: f64::from(best[k].entropy),
                    left_output: posterior(&left),
                    right_output: posterior(&right),
                    left_counts: left,
                    right_counts: right,
                }));
            }
        }
        Ok(decisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfig, TrainerParams};
    use crate::device::{DeviceContext, PixelProbeFeature};
    use crate::tree::frontier::FrontierSlice;
    use crate::tree::statistics::NodeStatistics;
    use approx::assert_relative_eq;

    fn device(params: &TrainerParams) -> DeviceContext {
        let mut device =
            DeviceContext::cpu(PixelProbeFeature::new(), DeviceConfig::new().with_num_threads(2))
                .unwrap();
        device.set_params(params.clone());
        device
    }

    #[test]
    fn test_entropy_values() {
        assert_eq!(entropy(&[4, 0]), 0.0);
        assert_relative_eq!(entropy(&[3, 3]), 1.0);
        assert_relative_eq!(entropy(&[1, 1, 1, 1]), 2.0);
        assert_eq!(entropy(&[0, 0]), 0.0);
        assert_relative_eq!(weighted_entropy(&[2, 2], &[4, 0]), 0.5);
    }

    #[test]
    fn test_all_left_pair_keeps_node_a_leaf() {
        let params = TrainerParams::new().with_n_features(1).with_n_thresholds(1);
        let device = device(&params);
        let mut stats = NodeStatistics::new(3, 2);
        stats.set_class_counts(0, &[6, 4]);
        let slice = FrontierSlice::new(0, &[0]);
        let mut histograms = SliceHistograms::<u32>::new(1, 2).unwrap();
        histograms.slot_mut(0).copy_from_slice(&[6, 4]);

        let ctx = SplitContext {
            device: &device,
            params: &params,
            stats: &stats,
            slice: &slice,
        };
        let decisions = EntropyCriterion.select_splits(&ctx, &histograms).unwrap();
        assert_eq!(decisions, vec![None]);
    }

    #[test]
    fn test_selects_separating_pair_with_posteriors() {
        let params = TrainerParams::new().with_n_features(2).with_n_thresholds(2);
        let device = device(&params);
        let mut stats = NodeStatistics::new(7, 2);
        stats.set_class_counts(1, &[8, 8]);
        stats.set_class_counts(2, &[5, 0]);
        let slice = FrontierSlice::new(0, &[1, 2]);
        let mut histograms = SliceHistograms::<u32>::new(2, 8).unwrap();
        // Node 1: pair (1, 0) separates the classes.
        histograms
            .slot_mut(0)
            .copy_from_slice(&[4, 4, 8, 2, /* class 1 */ 4, 4, 0, 6]);
        // Node 2 holds a single class.
        histograms
            .slot_mut(1)
            .copy_from_slice(&[5, 0, 5, 5, 0, 0, 0, 0]);

        let ctx = SplitContext {
            device: &device,
            params: &params,
            stats: &stats,
            slice: &slice,
        };
        let decisions = EntropyCriterion.select_splits(&ctx, &histograms).unwrap();
        let first = decisions[0].as_ref().unwrap();
        assert_eq!((first.feature_idx, first.threshold_idx), (1, 0));
        assert_eq!(first.left_counts, vec![8, 0]);
        assert_eq!(first.right_counts, vec![0, 8]);
        assert_eq!(first.left_output, vec![1.0, 0.0]);
        assert_eq!(first.score, 0.0);
        // Node 2 is pure: every pair scores zero and the first one, which
        // sends every sample left, wins.
        assert!(decisions[1].is_none());
    }
}
