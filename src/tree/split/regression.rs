//! Rotation-averaging regression criterion.
//!
//! Slot layout: two halves (`left`, `right`), each `[feature][threshold]`
//! records of [`ROTATION_RECORD_LEN`] doubles. A candidate's score is the
//! sample-weighted mean of `6 N - 2 <Sum, R>` over both children, `R` being
//! the proper rotation closest to the child's matrix sum.

use crate::core::error::Result;
use crate::core::types::{PixelIndex, SampleCount, TaskKind, ROTATION_OUTPUT_DIM, ROTATION_RECORD_LEN};
use crate::dataset::{TrainingImage, TrainingSet};
use crate::tree::histogram::{RecordAccumulator, SliceHistograms};
use crate::tree::split::rotation::{
    closest_rotation, euler_from_rotation, record_sum, rotation_score, Matrix3,
};
use crate::tree::split::{SplitContext, SplitCriterion, SplitDecision};
use rayon::prelude::*;

/// Best candidate of one node histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationCandidate {
    /// Pair index (`feature * n_thresholds + threshold`)
    pub pair: usize,
    /// Weighted score
    pub score: f64,
    /// Closest rotation of the left child
    pub left: Matrix3,
    /// Closest rotation of the right child
    pub right: Matrix3,
    /// Samples sent left
    pub n_left: f64,
    /// Samples sent right
    pub n_right: f64,
}

/// Scores every pair of one node histogram and returns the lowest, ties
/// going to the lowest pair index. `None` when every pair leaves one child
/// empty.
pub fn best_rotation_split(slot: &[f64], pairs: usize) -> Option<RotationCandidate> {
    let (left_half, right_half) = slot.split_at(pairs * ROTATION_RECORD_LEN);
    let mut best: Option<RotationCandidate> = None;

    for pair in 0..pairs {
        let record = pair * ROTATION_RECORD_LEN..(pair + 1) * ROTATION_RECORD_LEN;
        let (left_sum, n_left) = record_sum(&left_half[record.clone()]);
        let (right_sum, n_right) = record_sum(&right_half[record]);
        if n_left <= 0.0 || n_right <= 0.0 {
            continue;
        }
        let left = closest_rotation(&left_sum);
        let right = closest_rotation(&right_sum);
        let score = (n_left * rotation_score(&left_sum, n_left, &left)
            + n_right * rotation_score(&right_sum, n_right, &right))
            / (n_left + n_right);

        if best.map_or(true, |b| score < b.score) {
            best = Some(RotationCandidate {
                pair,
                score,
                left,
                right,
                n_left,
                n_right,
            });
        }
    }
    best
}

fn euler_output(rotation: &Matrix3) -> Vec<f32> {
    euler_from_rotation(rotation)
        .iter()
        .map(|a| *a as f32)
        .collect()
}

/// Rotation criterion, scored on the host across nodes in parallel.
#[derive(Debug, Clone, Copy, Default)]
pub struct RotationCriterion;

impl SplitCriterion for RotationCriterion {
    type Elem = f64;

    fn task(&self) -> TaskKind {
        TaskKind::RotationRegression
    }

    fn output_dim(&self, _n_classes: usize) -> usize {
        ROTATION_OUTPUT_DIM
    }

    fn slot_len(&self, pairs: usize, _n_classes: usize) -> usize {
        2 * pairs * ROTATION_RECORD_LEN
    }

    #[inline]
    fn accumulate(
        &self,
        slot: &mut [f64],
        bits: &[u8],
        image: &TrainingImage,
        _pixel: PixelIndex,
        pairs: usize,
        accumulator: &dyn RecordAccumulator,
    ) -> bool {
        let record = image.rotation_record();
        let half = pairs * ROTATION_RECORD_LEN;
        for pair in 0..pairs {
            let goes_left = (bits[pair >> 3] >> (pair & 7)) & 1 == 1;
            let offset = if goes_left { 0 } else { half } + pair * ROTATION_RECORD_LEN;
            accumulator.add_record(&mut slot[offset..offset + ROTATION_RECORD_LEN], record);
        }
        true
    }

    fn root_output(&self, set: &TrainingSet) -> Vec<f32> {
        let mut total = [0.0f64; ROTATION_RECORD_LEN];
        for image in set.images() {
            let weight = image.num_samples() as f64;
            for (acc, value) in total.iter_mut().zip(image.rotation_record()) {
                *acc += weight * value;
            }
        }
        let (sum, _) = record_sum(&total);
        euler_output(&closest_rotation(&sum))
    }

    fn select_splits(
        &self,
        ctx: &SplitContext<'_>,
        histograms: &SliceHistograms<f64>,
    ) -> Result<Vec<Option<SplitDecision>>> {
        let pairs = ctx.pairs();
        let n_thresholds = ctx.params.n_thresholds.max(1);
        let decisions = ctx
            .slice
            .nodes()
            .par_iter()
            .enumerate()
            .map(|(k, node)| {
                let candidate = best_rotation_split(histograms.slot(k), pairs)?;
                let parent_total = ctx.stats.total(*node);
                let n_left = candidate.n_left.round() as SampleCount;
                Some(SplitDecision {
                    feature_idx: candidate.pair / n_thresholds,
                    threshold_idx: candidate.pair % n_thresholds,
                    score: candidate.score,
                    left_output: euler_output(&candidate.left),
                    right_output: euler_output(&candidate.right),
                    left_counts: vec![n_left],
                    right_counts: vec![parent_total.saturating_sub(n_left)],
                })
            })
            .collect::<Vec<_>>();

        for (node, decision) in ctx.slice.nodes().iter().zip(&decisions) {
            if decision.is_none() {
                log::debug!("node {}: no pair splits its samples", node);
            }
        }
        Ok(decisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::split::rotation::{rotation_from_euler, rotation_record};
    use approx::assert_abs_diff_eq;

    fn slot_with(pairs: usize, entries: &[(usize, bool, [f64; 3], f64)]) -> Vec<f64> {
        let mut slot = vec![0.0; 2 * pairs * ROTATION_RECORD_LEN];
        for (pair, left, euler, weight) in entries {
            let record = rotation_record(&rotation_from_euler(*euler));
            let half = if *left { 0 } else { pairs * ROTATION_RECORD_LEN };
            let offset = half + pair * ROTATION_RECORD_LEN;
            for (dst, src) in slot[offset..offset + ROTATION_RECORD_LEN].iter_mut().zip(record) {
                *dst += weight * src;
            }
        }
        slot
    }

    #[test]
    fn test_one_sided_pairs_are_never_selected() {
        let slot = slot_with(1, &[(0, true, [0.1, 0.0, 0.0], 4.0)]);
        assert!(best_rotation_split(&slot, 1).is_none());
    }

    #[test]
    fn test_coherent_split_scores_zero() {
        let a = [0.3, 0.0, 0.0];
        let b = [0.0, 0.0, 1.2];
        let slot = slot_with(
            2,
            &[
                // Pair 0 mixes both orientations on each side.
                (0, true, a, 2.0),
                (0, true, b, 2.0),
                (0, false, a, 1.0),
                (0, false, b, 1.0),
                // Pair 1 separates them.
                (1, true, a, 3.0),
                (1, false, b, 3.0),
            ],
        );
        let best = best_rotation_split(&slot, 2).unwrap();
        assert_eq!(best.pair, 1);
        assert_abs_diff_eq!(best.score, 0.0, epsilon = 1e-9);
        let left = euler_from_rotation(&best.left);
        assert_abs_diff_eq!(left[0], 0.3, epsilon = 1e-9);
        let right = euler_from_rotation(&best.right);
        assert_abs_diff_eq!(right[2], 1.2, epsilon = 1e-9);
        assert_eq!(best.n_left, 3.0);
    }

    #[test]
    fn test_accumulate_routes_by_bit() {
        use crate::dataset::Image;
        use crate::tree::histogram::ScalarAccumulator;

        let image = TrainingImage::regression(Image::new(2, 1, 1), [0.0, 0.0, 0.0], vec![0]).unwrap();
        let mut slot = vec![0.0; RotationCriterion.slot_len(2, 0)];
        // Pair 0 goes left, pair 1 goes right.
        RotationCriterion.accumulate(&mut slot, &[0b01], &image, 0, 2, &ScalarAccumulator);
        assert_eq!(slot[ROTATION_RECORD_LEN - 1], 1.0);
        assert_eq!(slot[2 * ROTATION_RECORD_LEN - 1], 0.0);
        assert_eq!(slot[4 * ROTATION_RECORD_LEN - 1], 1.0);
        assert_eq!(slot[3 * ROTATION_RECORD_LEN - 1], 0.0);
    }
}
