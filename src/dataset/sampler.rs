//! Per-image pixel samplers.
//!
//! A sampler picks the pixels of an image that take part in training. The
//! returned list is always sorted and free of duplicates. Each sampler seeds
//! its generator from a hash of the pixel data combined with its own seed, so
//! resampling the same image reproduces the same list.

use crate::core::types::{LabelValue, PixelIndex};
use crate::dataset::image::Image;
use rand::prelude::*;
use rand::rngs::StdRng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Chooses training pixels from an image.
pub trait ImageSampler: Send + Sync {
    /// Returns the sorted, unique sampled pixel indices.
    ///
    /// `labels` holds one entry per pixel; only pixels with a non-zero label
    /// are eligible, and class `label - 1` drives class-aware samplers.
    fn sample(&self, image: &Image, labels: &[LabelValue]) -> Vec<PixelIndex>;

    /// Upper bound on the number of samples drawn from one image.
    fn max_samples(&self) -> usize;
}

fn image_rng(image: &Image, seed: u64) -> StdRng {
    let mut hasher = DefaultHasher::new();
    image.width().hash(&mut hasher);
    image.height().hash(&mut hasher);
    for value in image.data() {
        value.to_bits().hash(&mut hasher);
    }
    StdRng::seed_from_u64(hasher.finish() ^ seed)
}

/// Samples uniformly, without replacement, among labelled pixels.
#[derive(Debug, Clone)]
pub struct UniformImageSampler {
    n_samples: usize,
    seed: u64,
}

impl UniformImageSampler {
    /// Creates a sampler drawing up to `n_samples` pixels per image.
    pub fn new(n_samples: usize, seed: u64) -> Self {
        UniformImageSampler { n_samples, seed }
    }
}

impl ImageSampler for UniformImageSampler {
    fn sample(&self, image: &Image, labels: &[LabelValue]) -> Vec<PixelIndex> {
        let eligible: Vec<PixelIndex> = labels
            .iter()
            .enumerate()
            .filter(|(_, label)| **label != 0)
            .map(|(pixel, _)| pixel as PixelIndex)
            .collect();

        let amount = self.n_samples.min(eligible.len());
        let mut rng = image_rng(image, self.seed);
        let mut samples: Vec<PixelIndex> = rand::seq::index::sample(&mut rng, eligible.len(), amount)
            .into_iter()
            .map(|i| eligible[i])
            .collect();
        samples.sort_unstable();
        samples
    }

    fn max_samples(&self) -> usize {
        self.n_samples
    }
}

/// Per-class reservoir sampler.
///
/// Class `c` keeps a reservoir of `ceil(weights[c] * n_samples)` pixels, so
/// rare classes are not drowned by frequent ones.
#[derive(Debug, Clone)]
pub struct ClassWeightedImageSampler {
    n_samples: usize,
    bucket_sizes: Vec<usize>,
    seed: u64,
}

impl ClassWeightedImageSampler {
    /// Creates a sampler with explicit per-class weights.
    pub fn new(n_samples: usize, weights: &[f32], seed: u64) -> Self {
        let bucket_sizes = weights
            .iter()
            .map(|w| (w.max(0.0) * n_samples as f32).ceil() as usize)
            .collect();
        ClassWeightedImageSampler {
            n_samples,
            bucket_sizes,
            seed,
        }
    }

    /// Creates a sampler giving every class the same share.
    pub fn balanced(n_samples: usize, n_classes: usize, seed: u64) -> Self {
        let weights = vec![1.0 / n_classes.max(1) as f32; n_classes];
        Self::new(n_samples, &weights, seed)
    }

    /// Reservoir size of each class.
    pub fn bucket_sizes(&self) -> &[usize] {
        &self.bucket_sizes
    }
}

impl ImageSampler for ClassWeightedImageSampler {
    fn sample(&self, image: &Image, labels: &[LabelValue]) -> Vec<PixelIndex> {
        let n_classes = self.bucket_sizes.len();
        let mut buckets: Vec<Vec<PixelIndex>> = self
            .bucket_sizes
            .iter()
            .map(|size| Vec::with_capacity(*size))
            .collect();
        let mut seen = vec![0usize; n_classes];
        let mut rng = image_rng(image, self.seed);

        for (pixel, label) in labels.iter().enumerate() {
            if *label == 0 || *label as usize > n_classes {
                continue;
            }
            let class = *label as usize - 1;
            let size = self.bucket_sizes[class];
            let bucket = &mut buckets[class];
            if bucket.len() < size {
                bucket.push(pixel as PixelIndex);
            } else {
                let j = rng.gen_range(0..=seen[class]);
                if j < size {
                    bucket[j] = pixel as PixelIndex;
                }
            }
            seen[class] += 1;
        }

        let mut samples: Vec<PixelIndex> = buckets.into_iter().flatten().collect();
        samples.sort_unstable();
        samples
    }

    fn max_samples(&self) -> usize {
        self.bucket_sizes.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image(width: usize, height: usize) -> Image {
        let data = (0..width * height).map(|v| v as f32).collect();
        Image::from_vec(width, height, 1, data).unwrap()
    }

    #[test]
    fn test_uniform_sorted_unique_and_labelled() {
        let image = gradient_image(8, 8);
        let labels: Vec<u8> = (0..64).map(|i| if i % 3 == 0 { 0 } else { 1 }).collect();
        let sampler = UniformImageSampler::new(20, 7);
        let samples = sampler.sample(&image, &labels);

        assert_eq!(samples.len(), 20);
        assert!(samples.windows(2).all(|w| w[0] < w[1]));
        assert!(samples.iter().all(|p| labels[*p as usize] != 0));
    }

    #[test]
    fn test_uniform_is_reproducible_and_seed_sensitive() {
        let image = gradient_image(16, 16);
        let labels = vec![1u8; 256];
        let a = UniformImageSampler::new(32, 1).sample(&image, &labels);
        let b = UniformImageSampler::new(32, 1).sample(&image, &labels);
        let c = UniformImageSampler::new(32, 2).sample(&image, &labels);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_uniform_takes_everything_when_short() {
        let image = gradient_image(4, 1);
        let labels = vec![0, 2, 0, 1];
        let samples = UniformImageSampler::new(10, 0).sample(&image, &labels);
        assert_eq!(samples, vec![1, 3]);
    }

    #[test]
    fn test_class_weighted_buckets() {
        let image = gradient_image(10, 10);
        let labels: Vec<u8> = (0..100).map(|i| if i < 90 { 1 } else { 2 }).collect();
        let sampler = ClassWeightedImageSampler::balanced(20, 2, 3);
        assert_eq!(sampler.bucket_sizes(), &[10, 10]);

        let samples = sampler.sample(&image, &labels);
        let class_two = samples.iter().filter(|p| **p >= 90).count();
        assert_eq!(samples.len(), 20);
        assert_eq!(class_two, 10);
        assert!(samples.windows(2).all(|w| w[0] < w[1]));
    }
}
