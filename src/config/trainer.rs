//! Tree training parameters.

use crate::config::{load_document, save_document};
use crate::core::constants::*;
use crate::core::error::{ForestError, Result};
use crate::core::types::FeatureValue;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Options recognised by [`TreeTrainer::train`](crate::tree::TreeTrainer::train).
///
/// Feature vectors are drawn per node and candidate index from
/// `[feat_low_bounds, feat_up_bounds]` (or from `feat_lut`), thresholds from
/// `[thr_low_bound, thr_up_bound]` (or from `thr_lut`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerParams {
    /// Candidate features evaluated per node
    pub n_features: usize,
    /// Candidate thresholds evaluated per feature
    pub n_thresholds: usize,
    /// Per-dimension lower bound of feature components
    pub feat_low_bounds: Vec<FeatureValue>,
    /// Per-dimension upper bound of feature components
    pub feat_up_bounds: Vec<FeatureValue>,
    /// Lower bound of the threshold range
    pub thr_low_bound: FeatureValue,
    /// Upper bound of the threshold range
    pub thr_up_bound: FeatureValue,
    /// A node stays splittable only while its sample count exceeds this
    pub per_leaf_samples_thr: f32,
    /// Number of lookup-table rows composing one feature vector
    pub n_feat_lut_samples: usize,
    /// Optional feature lookup table (rows of `feat_dim / n_feat_lut_samples`)
    pub feat_lut: Vec<FeatureValue>,
    /// Optional threshold lookup table
    pub thr_lut: Vec<FeatureValue>,
}

impl Default for TrainerParams {
    fn default() -> Self {
        TrainerParams {
            n_features: DEFAULT_NUM_FEATURES,
            n_thresholds: DEFAULT_NUM_THRESHOLDS,
            feat_low_bounds: vec![DEFAULT_FEATURE_LOW_BOUND; 2],
            feat_up_bounds: vec![DEFAULT_FEATURE_UP_BOUND; 2],
            thr_low_bound: DEFAULT_THRESHOLD_LOW_BOUND,
            thr_up_bound: DEFAULT_THRESHOLD_UP_BOUND,
            per_leaf_samples_thr: DEFAULT_PER_LEAF_SAMPLES_THRESHOLD,
            n_feat_lut_samples: 0,
            feat_lut: Vec::new(),
            thr_lut: Vec::new(),
        }
    }
}

impl TrainerParams {
    /// Create parameters with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of candidate features per node
    pub fn with_n_features(mut self, n_features: usize) -> Self {
        self.n_features = n_features;
        self
    }

    /// Set the number of candidate thresholds per feature
    pub fn with_n_thresholds(mut self, n_thresholds: usize) -> Self {
        self.n_thresholds = n_thresholds;
        self
    }

    /// Set per-dimension feature bounds
    pub fn with_feature_bounds(mut self, low: Vec<FeatureValue>, up: Vec<FeatureValue>) -> Self {
        self.feat_low_bounds = low;
        self.feat_up_bounds = up;
        self
    }

    /// Set the threshold range
    pub fn with_threshold_bounds(mut self, low: FeatureValue, up: FeatureValue) -> Self {
        self.thr_low_bound = low;
        self.thr_up_bound = up;
        self
    }

    /// Set the leaf-sample threshold
    pub fn with_per_leaf_samples_thr(mut self, thr: f32) -> Self {
        self.per_leaf_samples_thr = thr;
        self
    }

    /// Sample features from a lookup table
    pub fn with_feature_lut(mut self, lut: Vec<FeatureValue>, samples_per_feature: usize) -> Self {
        self.feat_lut = lut;
        self.n_feat_lut_samples = samples_per_feature;
        self
    }

    /// Sample thresholds from a lookup table
    pub fn with_threshold_lut(mut self, lut: Vec<FeatureValue>) -> Self {
        self.thr_lut = lut;
        self
    }

    /// Candidate (feature, threshold) pairs per node
    pub fn pairs_per_node(&self) -> usize {
        self.n_features * self.n_thresholds
    }

    /// Bytes of one sample's bit-packed local histogram
    pub fn local_histogram_bytes(&self) -> usize {
        self.pairs_per_node().div_ceil(8)
    }

    /// Validate parameters against the feature dimensionality of the extractor
    pub fn validate(&self, feat_dim: usize) -> Result<()> {
        if self.n_features == 0 {
            return Err(ForestError::invalid_parameter(
                "n_features",
                "0",
                "must be positive",
            ));
        }

        if self.n_thresholds == 0 {
            return Err(ForestError::invalid_parameter(
                "n_thresholds",
                "0",
                "must be positive",
            ));
        }

        if self.pairs_per_node() > u32::MAX as usize {
            return Err(ForestError::invalid_parameter(
                "n_features * n_thresholds",
                self.pairs_per_node().to_string(),
                "must fit in 32 bits",
            ));
        }

        if self.feat_low_bounds.len() != feat_dim || self.feat_up_bounds.len() != feat_dim {
            return Err(ForestError::dimension_mismatch(
                format!("{} feature bounds", feat_dim),
                format!(
                    "{} low / {} up",
                    self.feat_low_bounds.len(),
                    self.feat_up_bounds.len()
                ),
            ));
        }

        for (dim, (low, up)) in self
            .feat_low_bounds
            .iter()
            .zip(&self.feat_up_bounds)
            .enumerate()
        {
            if !(low <= up) {
                return Err(ForestError::invalid_parameter(
                    format!("feat_low_bounds[{}]", dim),
                    low.to_string(),
                    format!("must not exceed upper bound {}", up),
                ));
            }
        }

        if !(self.thr_low_bound <= self.thr_up_bound) {
            return Err(ForestError::invalid_parameter(
                "thr_low_bound",
                self.thr_low_bound.to_string(),
                format!("must not exceed thr_up_bound {}", self.thr_up_bound),
            ));
        }

        if !(self.per_leaf_samples_thr >= 0.0) {
            return Err(ForestError::invalid_parameter(
                "per_leaf_samples_thr",
                self.per_leaf_samples_thr.to_string(),
                "must be non-negative",
            ));
        }

        if !self.feat_lut.is_empty() {
            if self.n_feat_lut_samples == 0 || feat_dim % self.n_feat_lut_samples != 0 {
                return Err(ForestError::invalid_parameter(
                    "n_feat_lut_samples",
                    self.n_feat_lut_samples.to_string(),
                    format!("must be a positive divisor of the feature dimension {}", feat_dim),
                ));
            }
            let row = feat_dim / self.n_feat_lut_samples;
            if self.feat_lut.len() % row != 0 {
                return Err(ForestError::invalid_parameter(
                    "feat_lut",
                    format!("{} entries", self.feat_lut.len()),
                    format!("must hold whole rows of {} values", row),
                ));
            }
        }

        Ok(())
    }

    /// Load parameters from a `.toml` or `.json` file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_document(path.as_ref())
    }

    /// Save parameters to a `.toml` or `.json` file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_document(self, path.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate_for_two_dims() {
        assert!(TrainerParams::default().validate(2).is_ok());
        assert!(TrainerParams::default().validate(3).is_err());
    }

    #[test]
    fn test_local_histogram_bytes_rounds_up() {
        let params = TrainerParams::new().with_n_features(3).with_n_thresholds(3);
        assert_eq!(params.pairs_per_node(), 9);
        assert_eq!(params.local_histogram_bytes(), 2);
    }

    #[test]
    fn test_rejects_inverted_ranges() {
        let params = TrainerParams::new().with_threshold_bounds(10.0, -10.0);
        assert!(params.validate(2).is_err());

        let params = TrainerParams::new().with_feature_bounds(vec![1.0, 0.0], vec![0.0, 1.0]);
        assert!(params.validate(2).is_err());
    }

    #[test]
    fn test_feature_lut_shape() {
        let params = TrainerParams::new()
            .with_feature_bounds(vec![0.0; 4], vec![1.0; 4])
            .with_feature_lut(vec![0.0; 10], 2);
        assert!(params.validate(4).is_ok());

        let params = params.with_feature_lut(vec![0.0; 9], 2);
        assert!(params.validate(4).is_err());

        let params = params.with_feature_lut(vec![0.0; 8], 3);
        assert!(params.validate(4).is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        let params = TrainerParams::new()
            .with_n_features(16)
            .with_threshold_lut(vec![1.0, 2.0]);
        params.save_to_file(&path).unwrap();
        assert_eq!(TrainerParams::load_from_file(&path).unwrap(), params);
    }
}
