//! Training data: images, label maps, pixel samplers and training sets.
//!
//! Image decoding is left to the caller; this module starts from pixel
//! planes already in memory.

pub mod image;
pub mod sampler;
pub mod training_set;

pub use image::{Image, LabelMap};
pub use sampler::{ClassWeightedImageSampler, ImageSampler, UniformImageSampler};
pub use training_set::{ImageTarget, TrainingImage, TrainingSet};
