//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use rand::prelude::*;
use rand::rngs::StdRng;
use rforest_offload::*;

/// Routes `log` output through the test harness.
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// CPU device with a pixel probe on channel 0.
pub fn probe_device(config: DeviceConfig) -> DeviceContext {
    DeviceContext::cpu(PixelProbeFeature::new(), config).unwrap()
}

/// Small device configuration suited to tests.
pub fn test_device_config() -> DeviceConfig {
    DeviceConfig::default().with_num_threads(2)
}

/// Parameters whose features all probe the pixel itself, with thresholds in
/// `[0, 100]`.
pub fn self_probe_params(n_features: usize, n_thresholds: usize) -> TrainerParams {
    TrainerParams::new()
        .with_n_features(n_features)
        .with_n_thresholds(n_thresholds)
        .with_feature_bounds(vec![0.0, 0.0], vec![0.0, 0.0])
        .with_threshold_bounds(0.0, 100.0)
        .with_per_leaf_samples_thr(1.0)
}

/// Parameters probing up to `radius` pixels away.
pub fn offset_probe_params(n_features: usize, n_thresholds: usize, radius: f32) -> TrainerParams {
    TrainerParams::new()
        .with_n_features(n_features)
        .with_n_thresholds(n_thresholds)
        .with_feature_bounds(vec![-radius, -radius], vec![radius, radius])
        .with_threshold_bounds(0.0, 100.0)
        .with_per_leaf_samples_thr(1.0)
}

/// Image whose left half is dark (about 10, label 1) and right half bright
/// (about 90, label 2).
pub fn two_tone_pair(width: usize, height: usize, rng: &mut StdRng) -> (Image, LabelMap) {
    let mut image = Image::new(width, height, 1);
    let mut labels = LabelMap::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let (base, label) = if x < width / 2 { (10.0, 1) } else { (90.0, 2) };
            image.set(x, y, 0, base + rng.gen_range(-1.0..1.0));
            labels.set(x, y, label);
        }
    }
    (image, labels)
}

/// Two-class set of `n_images` two-tone images.
pub fn two_tone_set(n_images: usize, samples_per_image: usize, seed: u64) -> TrainingSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let pairs: Vec<_> = (0..n_images).map(|_| two_tone_pair(12, 8, &mut rng)).collect();
    let sampler = UniformImageSampler::new(samples_per_image, seed);
    TrainingSet::classification(pairs, 2, &sampler).unwrap()
}

/// Noise images with random labels in `1..=n_classes`.
pub fn noise_set(n_images: usize, n_classes: usize, samples_per_image: usize, seed: u64) -> TrainingSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let pairs: Vec<_> = (0..n_images)
        .map(|_| {
            let (width, height) = (rng.gen_range(6..14), rng.gen_range(6..14));
            let mut image = Image::new(width, height, 1);
            let mut labels = LabelMap::new(width, height);
            for y in 0..height {
                for x in 0..width {
                    image.set(x, y, 0, rng.gen_range(0.0..100.0));
                    labels.set(x, y, rng.gen_range(1..=n_classes as u8));
                }
            }
            (image, labels)
        })
        .collect();
    let sampler = UniformImageSampler::new(samples_per_image, seed);
    TrainingSet::classification(pairs, n_classes, &sampler).unwrap()
}

/// Asserts that every split node's children share its samples exactly.
pub fn assert_samples_conserved(tree: &Tree, node_samples: &[u64]) {
    for index in 0..tree.num_nodes() {
        let node = tree.node(index);
        if let (Some(left), Some(right)) = (node.left_child(), node.right_child()) {
            assert_eq!(
                node_samples[left] + node_samples[right],
                node_samples[index],
                "children of node {} lose samples",
                index
            );
        }
    }
}
