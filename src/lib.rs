//! # rforest-offload
//!
//! Random Forest tree training over image data, with the per-pixel work
//! offloaded to a compute device.
//!
//! Trees are grown breadth-first, one depth at a time. For every depth the
//! trainer streams each training image through the device, which walks the
//! sampled pixels down the tree built so far and emits a bit-packed local
//! histogram of candidate split responses. A host consumer thread folds these
//! into per-node global histograms, and the split learner picks the best
//! candidate per frontier node:
//!
//! - **Classification**: minimum weighted class entropy, leaves hold class
//!   posteriors.
//! - **Rotation regression**: per-image orientation targets, children scored
//!   against the closest proper rotation of their summed rotation matrices.
//!
//! Candidate features and thresholds are never stored: they are regenerated
//! from a seeded hash of `(tree, node, feature, slot)` wherever needed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rforest_offload::{
//!     ClassificationTrainer, DeviceConfig, DeviceContext, Image, LabelMap,
//!     PixelProbeFeature, TrainerParams, TrainingSet, Tree, UniformImageSampler,
//! };
//!
//! # fn main() -> rforest_offload::Result<()> {
//! rforest_offload::init_logging();
//!
//! let image = Image::new(64, 48, 1);
//! let labels = LabelMap::from_vec(64, 48, vec![1; 64 * 48])?;
//! let sampler = UniformImageSampler::new(200, 7);
//! let set = TrainingSet::classification(vec![(image, labels)], 2, &sampler)?;
//!
//! let params = TrainerParams::new()
//!     .with_n_features(64)
//!     .with_n_thresholds(16)
//!     .with_feature_bounds(vec![-8.0, -8.0], vec![8.0, 8.0])
//!     .with_threshold_bounds(-50.0, 50.0);
//!
//! let device = DeviceContext::cpu(PixelProbeFeature::new(), DeviceConfig::default())?;
//! let mut trainer = ClassificationTrainer::classification(device);
//! let mut tree = Tree::classification(0, 8, 2, set.n_classes())?;
//! let report = trainer.train(&mut tree, &set, &params, 1, 8)?;
//! println!("{} splits", report.total_splits());
//! tree.save_to_file("tree0.json")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`core`]: errors, shared types, device buffers and the hash generator
//! - [`config`]: [`TrainerParams`] and [`DeviceConfig`]
//! - [`dataset`]: images, label maps, samplers and [`TrainingSet`]
//! - [`device`]: kernel backends, command queues and [`DeviceContext`]
//! - [`tree`]: the tree, frontier, histogram pipeline, split criteria and trainer
//! - [`prediction`]: [`ForestClassifier`] and [`ForestRegressor`]

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(rust_2018_idioms, non_snake_case, non_upper_case_globals)]

pub mod config;
pub mod core;
pub mod dataset;
pub mod device;
pub mod prediction;
pub mod tree;

pub use crate::core::{
    error::{DeviceError, ForestError, Result},
    init_logging,
    types::*,
};

pub use config::{DeviceConfig, TrainerParams};

pub use dataset::{
    ClassWeightedImageSampler, Image, ImageSampler, ImageTarget, LabelMap, TrainingImage,
    TrainingSet, UniformImageSampler,
};

pub use device::{
    CpuBackend, DepthInvariantFeature, DeviceContext, FeatureExtractor, KernelBackend,
    PixelProbeFeature,
};

pub use prediction::{ForestClassifier, ForestRegressor};

pub use tree::{
    ClassificationTrainer, DepthReport, EntropyCriterion, RegressionTrainer, RotationCriterion,
    TrainingReport, Tree, TreeTrainer,
};

pub use crate::core::constants::RFOREST_OFFLOAD_VERSION as VERSION;
