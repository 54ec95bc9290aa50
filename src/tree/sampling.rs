//! Reproducible per-node feature and threshold sampling.
//!
//! Candidate `f` of node `n` in tree `t` is never stored anywhere: the device
//! regenerates it from the hash chain seeded with `(t, n, f, 0)` whenever it
//! evaluates the candidate, and the split learner regenerates it once more
//! to materialise the winning split. Thresholds use the chain seeded with
//! `(t, n, f, 1)`; threshold `k` is word `k % 4` of block `k / 4`.

use crate::config::TrainerParams;
use crate::core::prng::{unit_interval, HashChain};
use crate::core::types::{FeatureValue, NodeIndex};

const FEATURE_STREAM: u32 = 0;
const THRESHOLD_STREAM: u32 = 1;

fn seed(tree_id: u32, node: NodeIndex, feature_idx: usize, stream: u32) -> [u32; 4] {
    [tree_id, node as u32, feature_idx as u32, stream]
}

fn lut_index(word: u32, rows: usize) -> usize {
    let idx = (unit_interval(word) * rows as f32).floor() as usize;
    idx.min(rows.saturating_sub(1))
}

/// Writes candidate feature `feature_idx` of `node` into `out`
/// (`out.len()` is the feature dimensionality).
pub fn sample_feature(
    tree_id: u32,
    node: NodeIndex,
    feature_idx: usize,
    params: &TrainerParams,
    out: &mut [FeatureValue],
) {
    let mut chain = HashChain::new(seed(tree_id, node, feature_idx, FEATURE_STREAM));

    if params.feat_lut.is_empty() || params.n_feat_lut_samples == 0 {
        for (block_start, chunk) in (0..out.len()).step_by(4).zip(out.chunks_mut(4)) {
            let state = chain.next_block();
            for (k, value) in chunk.iter_mut().enumerate() {
                let dim = block_start + k;
                let low = params.feat_low_bounds[dim];
                let up = params.feat_up_bounds[dim];
                *value = low + unit_interval(state[k]) * (up - low);
            }
        }
        return;
    }

    let row_len = out.len() / params.n_feat_lut_samples;
    let rows = params.feat_lut.len() / row_len.max(1);
    let mut state = [0u32; 4];
    for (n, chunk) in out.chunks_mut(row_len.max(1)).enumerate() {
        if n % 4 == 0 {
            state = chain.next_block();
        }
        let row = lut_index(state[n % 4], rows);
        chunk.copy_from_slice(&params.feat_lut[row * row_len..(row + 1) * row_len]);
    }
}

/// Returns candidate threshold `threshold_idx` of feature `feature_idx`.
pub fn sample_threshold(
    tree_id: u32,
    node: NodeIndex,
    feature_idx: usize,
    threshold_idx: usize,
    params: &TrainerParams,
) -> FeatureValue {
    let mut chain = HashChain::new(seed(tree_id, node, feature_idx, THRESHOLD_STREAM));
    let mut state = [0u32; 4];
    for _ in 0..=threshold_idx / 4 {
        state = chain.next_block();
    }
    threshold_from_word(state[threshold_idx % 4], params)
}

/// Writes the first `out.len()` candidate thresholds of `feature_idx` in one
/// pass over the chain. Agrees with [`sample_threshold`] element by element.
pub fn sample_thresholds(
    tree_id: u32,
    node: NodeIndex,
    feature_idx: usize,
    params: &TrainerParams,
    out: &mut [FeatureValue],
) {
    let mut chain = HashChain::new(seed(tree_id, node, feature_idx, THRESHOLD_STREAM));
    for chunk in out.chunks_mut(4) {
        let state = chain.next_block();
        for (k, value) in chunk.iter_mut().enumerate() {
            *value = threshold_from_word(state[k], params);
        }
    }
}

fn threshold_from_word(word: u32, params: &TrainerParams) -> FeatureValue {
    if params.thr_lut.is_empty() {
        params.thr_low_bound + unit_interval(word) * (params.thr_up_bound - params.thr_low_bound)
    } else {
        params.thr_lut[lut_index(word, params.thr_lut.len())]
    }
}

/// All candidates of one node, laid out `[feature][dim]` and
/// `[feature][threshold]`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCandidates {
    /// Feature dimensionality
    pub feat_dim: usize,
    /// Thresholds per feature
    pub n_thresholds: usize,
    /// Candidate feature vectors
    pub features: Vec<FeatureValue>,
    /// Candidate thresholds
    pub thresholds: Vec<FeatureValue>,
}

impl NodeCandidates {
    /// Generates every candidate of `node`.
    pub fn generate(tree_id: u32, node: NodeIndex, feat_dim: usize, params: &TrainerParams) -> Self {
        let mut features = vec![0.0; params.n_features * feat_dim];
        let mut thresholds = vec![0.0; params.n_features * params.n_thresholds];
        for f in 0..params.n_features {
            sample_feature(
                tree_id,
                node,
                f,
                params,
                &mut features[f * feat_dim..(f + 1) * feat_dim],
            );
            sample_thresholds(
                tree_id,
                node,
                f,
                params,
                &mut thresholds[f * params.n_thresholds..(f + 1) * params.n_thresholds],
            );
        }
        NodeCandidates {
            feat_dim,
            n_thresholds: params.n_thresholds,
            features,
            thresholds,
        }
    }

    /// Feature vector of candidate `f`.
    #[inline]
    pub fn feature(&self, f: usize) -> &[FeatureValue] {
        &self.features[f * self.feat_dim..(f + 1) * self.feat_dim]
    }

    /// Thresholds of candidate `f`.
    #[inline]
    pub fn thresholds(&self, f: usize) -> &[FeatureValue] {
        &self.thresholds[f * self.n_thresholds..(f + 1) * self.n_thresholds]
    }
}
