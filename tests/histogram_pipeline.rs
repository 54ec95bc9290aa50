//! Histogram pipeline against hand-computed candidate counts.

mod common;

use common::*;
use rforest_offload::device::SlotCapacity;
use rforest_offload::tree::{
    sample_threshold, select_accumulator, EntropyCriterion, FrontierSlice, HistogramPipeline,
    NodeStatistics, SliceHistograms,
};
use rforest_offload::*;

const N_FEATURES: usize = 2;
const N_THRESHOLDS: usize = 2;
const PAIRS: usize = N_FEATURES * N_THRESHOLDS;

/// Two 4x4 images. Image 0 holds `6 p` at pixel `p`, image 1 holds `6 p + 3`.
/// Even pixels are class 0, odd pixels class 1.
fn fixture() -> TrainingSet {
    let labels: Vec<u8> = (0..16).map(|p| if p % 2 == 0 { 1 } else { 2 }).collect();
    let image = |offset: f32| {
        Image::from_vec(4, 4, 1, (0..16).map(|p| p as f32 * 6.0 + offset).collect()).unwrap()
    };
    let images = vec![
        TrainingImage::classification(
            image(0.0),
            LabelMap::from_vec(4, 4, labels.clone()).unwrap(),
            vec![1, 6],
            2,
        )
        .unwrap(),
        TrainingImage::classification(
            image(3.0),
            LabelMap::from_vec(4, 4, labels).unwrap(),
            vec![0, 15],
            2,
        )
        .unwrap(),
    ];
    TrainingSet::from_images(TaskKind::Classification, 2, images).unwrap()
}

struct Harness {
    set: TrainingSet,
    params: TrainerParams,
    device: DeviceContext,
    tree: Tree,
    stats: NodeStatistics,
}

impl Harness {
    fn new(config: DeviceConfig) -> Self {
        let set = fixture();
        let params = self_probe_params(N_FEATURES, N_THRESHOLDS);
        let mut device = probe_device(config);
        device.set_params(params.clone());
        device
            .allocate_image_slots(SlotCapacity {
                width: 4,
                height: 4,
                channels: 1,
                max_samples: 2,
                histogram_row_bytes: params.local_histogram_bytes(),
            })
            .unwrap();
        let mut tree = Tree::classification(0, 3, 2, 2).unwrap();
        tree.set_leaf(0, set.priors()).unwrap();
        device.load_tree(&tree).unwrap();
        let stats = NodeStatistics::for_training_set(tree.num_nodes(), &set);
        Harness {
            set,
            params,
            device,
            tree,
            stats,
        }
    }

    /// `[class][pair]` left counts a node receiving `samples` should hold.
    fn expected(&self, node: usize, samples: &[(f32, usize)]) -> Vec<u32> {
        let mut counts = vec![0u32; 2 * PAIRS];
        for (value, class) in samples {
            for f in 0..N_FEATURES {
                for t in 0..N_THRESHOLDS {
                    let threshold = sample_threshold(self.tree.id(), node, f, t, &self.params);
                    if *value < threshold {
                        counts[class * PAIRS + f * N_THRESHOLDS + t] += 1;
                    }
                }
            }
        }
        counts
    }
}

#[test]
fn test_root_histogram_matches_candidates() {
    init_test_logging();
    let h = Harness::new(test_device_config());
    let criterion = EntropyCriterion;
    let accumulator = select_accumulator(true);
    let pipeline = HistogramPipeline::new(
        &h.device,
        &h.set,
        &criterion,
        accumulator.as_ref(),
        PAIRS,
        h.params.local_histogram_bytes(),
    );
    let slice = FrontierSlice::new(0, &[0]);
    let mut histograms = SliceHistograms::<u32>::new(1, 2 * PAIRS).unwrap();

    let outcome = pipeline
        .traverse(1, &slice, &mut histograms, &[false, false], &h.stats, 1.0)
        .unwrap();
    assert_eq!(outcome.contributing, vec![true, true]);
    assert_eq!(outcome.processed_images, 2);
    assert_eq!(outcome.accumulated_samples, 4);

    // (value, class) of every sample
    let samples = [(6.0, 1), (36.0, 0), (3.0, 0), (93.0, 1)];
    assert_eq!(histograms.slot(0), h.expected(0, &samples).as_slice());
}

#[test]
fn test_skipped_images_and_fifo_depth() {
    let h = Harness::new(test_device_config().with_fifo_capacity(1));
    let criterion = EntropyCriterion;
    let accumulator = select_accumulator(false);
    let pipeline = HistogramPipeline::new(
        &h.device,
        &h.set,
        &criterion,
        accumulator.as_ref(),
        PAIRS,
        h.params.local_histogram_bytes(),
    );
    let slice = FrontierSlice::new(0, &[0]);
    let mut histograms = SliceHistograms::<u32>::new(1, 2 * PAIRS).unwrap();

    let outcome = pipeline
        .traverse(1, &slice, &mut histograms, &[true, false], &h.stats, 1.0)
        .unwrap();
    assert_eq!(outcome.contributing, vec![false, true]);
    assert_eq!(outcome.processed_images, 1);
    assert_eq!(outcome.skipped_images, 1);
    assert_eq!(histograms.slot(0), h.expected(0, &[(3.0, 0), (93.0, 1)]).as_slice());
}

#[test]
fn test_second_depth_routes_samples_and_ignores_small_nodes() {
    let mut h = Harness::new(test_device_config());
    h.tree.split(0, &[0.0, 0.0], 45.0, &[0.7, 0.3], &[0.0, 1.0]).unwrap();
    h.stats.set_class_counts(1, &[2, 1]);
    h.stats.set_class_counts(2, &[0, 1]);
    h.device.upload_tree_range(&h.tree, 0, 2).unwrap();

    let criterion = EntropyCriterion;
    let accumulator = select_accumulator(true);
    let pipeline = HistogramPipeline::new(
        &h.device,
        &h.set,
        &criterion,
        accumulator.as_ref(),
        PAIRS,
        h.params.local_histogram_bytes(),
    );
    let slice = FrontierSlice::new(0, &[1, 2]);
    let mut histograms = SliceHistograms::<u32>::new(2, 2 * PAIRS).unwrap();

    let outcome = pipeline
        .traverse(2, &slice, &mut histograms, &[false, false], &h.stats, 1.0)
        .unwrap();
    // Node 2 holds a single sample, which is not above the leaf threshold.
    assert_eq!(outcome.accumulated_samples, 3);
    assert_eq!(
        histograms.slot(0),
        h.expected(1, &[(6.0, 1), (36.0, 0), (3.0, 0)]).as_slice()
    );
    assert!(histograms.slot(1).iter().all(|c| *c == 0));
}
