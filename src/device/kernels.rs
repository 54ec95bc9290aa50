//! The three compute programs a backend provides, and their argument views.
//!
//! Buffers handed to a kernel are plain slices over device memory. Image
//! buffers are row-padded: pixel `(x, y)` lives at `(y * stride + x)` in the
//! per-pixel buffers and at `(y * stride + x) * channels + c` in the pixel
//! buffer. Sample indices are image-linear (`y * width + x`).

use crate::config::{DeviceConfig, TrainerParams};
use crate::core::error::Result;
use crate::core::types::{ChildLink, FeatureValue, NodeIndex, PixelIndex};

/// Read-only view of a padded device image.
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    pixels: &'a [f32],
    width: usize,
    height: usize,
    stride: usize,
    channels: usize,
}

impl<'a> ImageView<'a> {
    /// Wraps a padded pixel buffer.
    pub fn new(pixels: &'a [f32], width: usize, height: usize, stride: usize, channels: usize) -> Self {
        ImageView {
            pixels,
            width,
            height,
            stride,
            channels,
        }
    }

    /// Valid width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Valid height.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Row pitch in pixels.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Channels per pixel.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Value at `(x, y, channel)`, `None` outside the valid area.
    #[inline]
    pub fn fetch(&self, x: isize, y: isize, channel: usize) -> Option<f32> {
        if x < 0 || y < 0 || channel >= self.channels {
            return None;
        }
        let (x, y) = (x as usize, y as usize);
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get((y * self.stride + x) * self.channels + channel)
            .copied()
    }

    /// Padded buffer offset of an image-linear sample index.
    #[inline]
    pub fn device_offset(&self, sample: PixelIndex) -> (usize, usize, usize) {
        let sample = sample as usize;
        let x = sample % self.width.max(1);
        let y = sample / self.width.max(1);
        (x, y, y * self.stride + x)
    }
}

/// Read-only view of the device-resident tree arrays.
#[derive(Debug, Clone, Copy)]
pub struct TreeView<'a> {
    /// Left-child links
    pub left_children: &'a [ChildLink],
    /// Split features, `feat_dim` per node
    pub features: &'a [FeatureValue],
    /// Split thresholds
    pub thresholds: &'a [FeatureValue],
    /// Node outputs, `output_dim` per node
    pub outputs: &'a [f32],
    /// Feature vector length
    pub feat_dim: usize,
    /// Output vector length
    pub output_dim: usize,
}

impl<'a> TreeView<'a> {
    /// Split feature of `node`.
    #[inline]
    pub fn feature(&self, node: NodeIndex) -> &'a [FeatureValue] {
        &self.features[node * self.feat_dim..(node + 1) * self.feat_dim]
    }
}

/// Arguments of the per-image local histogram kernel.
#[derive(Debug, Clone, Copy)]
pub struct LocalHistogramArgs<'a> {
    /// Image being processed
    pub image: ImageView<'a>,
    /// Current node of every pixel (padded layout)
    pub node_ids: &'a [i32],
    /// Sampled pixels
    pub samples: &'a [PixelIndex],
    /// Tree being trained
    pub tree: TreeView<'a>,
    /// Candidate sampling parameters
    pub params: &'a TrainerParams,
    /// Tree id seeding the candidates
    pub tree_id: u32,
    /// First node of the slice
    pub start_node: NodeIndex,
    /// Last node of the slice
    pub end_node: NodeIndex,
}

/// Arguments of the best-feature kernel for one batch of nodes.
///
/// `histograms` holds one `[class][feature][threshold]` block of left counts
/// per node, `class_totals` one `[class]` block per node.
#[derive(Debug, Clone, Copy)]
pub struct LearnArgs<'a> {
    /// Left-count histograms
    pub histograms: &'a [u32],
    /// Per-class sample totals
    pub class_totals: &'a [u64],
    /// Nodes in the batch
    pub n_nodes: usize,
    /// Classes per node
    pub n_classes: usize,
    /// Candidate features per node
    pub n_features: usize,
    /// Candidate thresholds per feature
    pub n_thresholds: usize,
    /// Pairs scanned by one worker
    pub per_thread_pairs: usize,
}

impl LearnArgs<'_> {
    /// Histogram entries of one node.
    pub fn node_len(&self) -> usize {
        self.n_classes * self.n_features * self.n_thresholds
    }
}

/// Winning candidate of one node.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BestPair {
    /// Candidate feature index
    pub feature: u32,
    /// Candidate threshold index
    pub threshold: u32,
    /// Weighted child entropy of the pair
    pub entropy: f32,
}

/// A compute backend: the compiled predict, local histogram and learn
/// programs plus the build step that prepares them.
pub trait KernelBackend: Send + Sync + 'static {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Feature vector length the programs were built for.
    fn feat_dim(&self) -> usize;

    /// Builds the programs and returns the build log.
    fn build(&self, config: &DeviceConfig) -> Result<String>;

    /// One tree level: moves every masked pixel from its node to the child
    /// its split selects. Pixels on leaves keep their node; unmasked pixels
    /// get `-1`.
    fn predict(
        &self,
        image: &ImageView<'_>,
        mask: &[u8],
        tree: &TreeView<'_>,
        node_in: &[i32],
        node_out: &mut [i32],
    ) -> Result<()>;

    /// Writes one bit-packed row per sample: bit `f * n_thresholds + t` is
    /// set when candidate pair `(f, t)` sends the sample left. Samples whose
    /// node is outside the slice or not a leaf get an all-zero row.
    fn compute_local_histogram(&self, args: &LocalHistogramArgs<'_>, out: &mut [u8]) -> Result<()>;

    /// Finds the pair with the lowest weighted child entropy per node.
    fn learn_best_feature(&self, args: &LearnArgs<'_>, out: &mut [BestPair]) -> Result<()>;

    /// Drops state cached for a previous training run.
    fn reset(&self) {}
}
