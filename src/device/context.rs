//! Device execution context: backend, command queues and resident buffers.
//!
//! Two image slots back the double buffering of the histogram pipeline:
//! slot `k` is only ever processed by queue `k`, so consecutive images
//! alternate between queues and one image's transfers overlap the other's
//! kernels. All buffers are sized once per training run and released when the
//! context (or the owning slot) is dropped.

use crate::config::{DeviceConfig, TrainerParams};
use crate::core::constants::NUM_COMMAND_QUEUES;
use crate::core::error::{DeviceError, ForestError, Result};
use crate::core::memory::{pad_to_tile, DeviceBuffer, MemoryTracker};
use crate::core::types::{ChildLink, FeatureValue, NodeIndex, PixelIndex};
use crate::dataset::Image;
use crate::device::cpu::CpuBackend;
use crate::device::features::FeatureExtractor;
use crate::device::kernels::{
    BestPair, ImageView, KernelBackend, LearnArgs, LocalHistogramArgs, TreeView,
};
use crate::device::queue::{CommandQueue, Event};
use crate::tree::tree::Tree;
use std::sync::{Arc, Mutex, RwLock};

/// Largest image and sample list the slots must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCapacity {
    /// Widest image
    pub width: usize,
    /// Tallest image
    pub height: usize,
    /// Channels per pixel
    pub channels: usize,
    /// Largest per-image sample count
    pub max_samples: usize,
    /// Bytes of one local histogram row
    pub histogram_row_bytes: usize,
}

/// Device buffers for one in-flight image.
#[derive(Debug)]
struct ImageSlot {
    width: usize,
    height: usize,
    channels: usize,
    stride: usize,
    padded_height: usize,
    n_samples: usize,
    pixels: DeviceBuffer<f32>,
    mask: DeviceBuffer<u8>,
    node_ids: DeviceBuffer<i32>,
    node_ids_next: DeviceBuffer<i32>,
    samples: DeviceBuffer<PixelIndex>,
    local_histogram: DeviceBuffer<u8>,
}

impl ImageSlot {
    fn allocate(tracker: &Arc<MemoryTracker>, capacity: &SlotCapacity, config: &DeviceConfig) -> Result<Self> {
        let stride = pad_to_tile(capacity.width.max(1), config.tile_width);
        let padded_height = pad_to_tile(capacity.height.max(1), config.tile_height);
        let pixels = stride * padded_height;
        Ok(ImageSlot {
            width: 0,
            height: 0,
            channels: capacity.channels.max(1),
            stride,
            padded_height,
            n_samples: 0,
            pixels: DeviceBuffer::new(tracker, "image", pixels * capacity.channels.max(1))?,
            mask: DeviceBuffer::new(tracker, "mask", pixels)?,
            node_ids: DeviceBuffer::new(tracker, "node ids", pixels)?,
            node_ids_next: DeviceBuffer::new(tracker, "node ids (next)", pixels)?,
            samples: DeviceBuffer::new(tracker, "samples", capacity.max_samples)?,
            local_histogram: DeviceBuffer::new(
                tracker,
                "local histogram",
                capacity.max_samples * capacity.histogram_row_bytes,
            )?,
        })
    }

    fn write_image(&mut self, image: &Image, selection: PixelSelection<'_>) -> Result<()> {
        if image.width() > self.stride
            || image.height() > self.padded_height
            || image.channels() > self.channels
        {
            return Err(DeviceError::CapacityExceeded {
                width: image.width(),
                height: image.height(),
                max_width: self.stride,
                max_height: self.padded_height,
            }
            .into());
        }
        let (width, height, channels) = (image.width(), image.height(), self.channels);
        let src_channels = image.channels();
        let data = image.data();

        let pixels = self.pixels.as_mut_slice();
        for y in 0..height {
            for x in 0..width {
                let src = (y * width + x) * src_channels;
                let dst = (y * self.stride + x) * channels;
                pixels[dst..dst + src_channels].copy_from_slice(&data[src..src + src_channels]);
            }
        }

        self.mask.clear();
        self.n_samples = 0;
        let stride = self.stride;
        let mask = self.mask.as_mut_slice();
        match selection {
            PixelSelection::Samples(samples) => {
                if samples.len() > self.samples.len() {
                    return Err(DeviceError::BufferOverflow {
                        what: "sample list".to_string(),
                        requested: samples.len(),
                        capacity: self.samples.len(),
                    }
                    .into());
                }
                for sample in samples {
                    let sample = *sample as usize;
                    mask[(sample / width) * stride + sample % width] = 1;
                }
                self.samples.write(samples)?;
                self.n_samples = samples.len();
            }
            PixelSelection::Mask(pixel_mask) => {
                if pixel_mask.len() != width * height {
                    return Err(ForestError::dimension_mismatch(
                        format!("mask of {} pixels", width * height),
                        format!("{}", pixel_mask.len()),
                    ));
                }
                for y in 0..height {
                    let row = &pixel_mask[y * width..(y + 1) * width];
                    mask[y * stride..y * stride + width].copy_from_slice(row);
                }
            }
            PixelSelection::All => {
                for y in 0..height {
                    mask[y * stride..y * stride + width].fill(1);
                }
            }
        }

        self.width = width;
        self.height = height;
        Ok(())
    }

    fn view(&self) -> ImageView<'_> {
        ImageView::new(
            self.pixels.as_slice(),
            self.width,
            self.height,
            self.stride,
            self.channels,
        )
    }
}

/// Pixels an image pass works on.
#[derive(Debug, Clone, Copy)]
pub enum PixelSelection<'a> {
    /// Training samples: only these pixels are walked and histogrammed.
    Samples(&'a [PixelIndex]),
    /// Prediction mask: non-zero pixels are walked.
    Mask(&'a [u8]),
    /// Every pixel is walked.
    All,
}

/// Work done on one image by one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePass {
    /// Tree levels to walk from the root
    pub predict_steps: usize,
    /// Node range to build the local histogram for, if any
    pub histogram_range: Option<(NodeIndex, NodeIndex)>,
}

/// Host copy of one image's local histogram.
#[derive(Debug, Clone, Default)]
pub struct LocalHistogram {
    /// Position of the image in the training set
    pub image_index: usize,
    /// Current node of each sample
    pub sample_nodes: Vec<i32>,
    /// Bit-packed rows, one per sample
    pub bits: Vec<u8>,
    /// Bytes per row
    pub row_bytes: usize,
}

impl LocalHistogram {
    /// Empty buffer for rows of `row_bytes`.
    pub fn with_row_bytes(row_bytes: usize) -> Self {
        LocalHistogram {
            row_bytes,
            ..Default::default()
        }
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.sample_nodes.len()
    }

    /// Whether no sample is held.
    pub fn is_empty(&self) -> bool {
        self.sample_nodes.is_empty()
    }

    /// Bit row of sample `s`.
    #[inline]
    pub fn row(&self, s: usize) -> &[u8] {
        &self.bits[s * self.row_bytes..(s + 1) * self.row_bytes]
    }
}

/// Device copy of the tree being trained or evaluated.
#[derive(Debug)]
struct TreeBuffers {
    id: u32,
    feat_dim: usize,
    output_dim: usize,
    left_children: DeviceBuffer<ChildLink>,
    features: DeviceBuffer<FeatureValue>,
    thresholds: DeviceBuffer<FeatureValue>,
    outputs: DeviceBuffer<f32>,
}

impl TreeBuffers {
    fn view(&self) -> TreeView<'_> {
        TreeView {
            left_children: self.left_children.as_slice(),
            features: self.features.as_slice(),
            thresholds: self.thresholds.as_slice(),
            outputs: self.outputs.as_slice(),
            feat_dim: self.feat_dim,
            output_dim: self.output_dim,
        }
    }

    fn upload(&mut self, tree: &Tree, start: NodeIndex, end: NodeIndex) -> Result<()> {
        let (fd, od) = (self.feat_dim, self.output_dim);
        self.left_children
            .write_at(start, &tree.left_children()[start..=end])?;
        self.features
            .write_at(start * fd, &tree.features()[start * fd..(end + 1) * fd])?;
        self.thresholds
            .write_at(start, &tree.thresholds()[start..=end])?;
        self.outputs
            .write_at(start * od, &tree.outputs()[start * od..(end + 1) * od])?;
        Ok(())
    }
}

/// Owns the compute backend, its two command queues and every device buffer.
pub struct DeviceContext {
    config: DeviceConfig,
    backend: Arc<dyn KernelBackend>,
    tracker: Arc<MemoryTracker>,
    queues: Vec<CommandQueue>,
    slots: Vec<Arc<Mutex<ImageSlot>>>,
    capacity: Option<SlotCapacity>,
    tree: Option<Arc<RwLock<TreeBuffers>>>,
    params: Arc<TrainerParams>,
}

impl DeviceContext {
    /// Builds the backend programs and starts the command queues.
    ///
    /// A build failure is returned with the backend's build log.
    pub fn new(backend: Arc<dyn KernelBackend>, config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        let build_log = backend.build(&config)?;
        log::debug!("{} backend built:\n{}", backend.name(), build_log);

        let queues = (0..NUM_COMMAND_QUEUES)
            .map(CommandQueue::new)
            .collect::<Result<Vec<_>>>()?;
        log::info!(
            "device context ready: {} backend, {} queues, {} byte memory limit",
            backend.name(),
            queues.len(),
            config.device_memory_limit
        );

        Ok(DeviceContext {
            tracker: MemoryTracker::new(config.device_memory_limit),
            config,
            backend,
            queues,
            slots: Vec::new(),
            capacity: None,
            tree: None,
            params: Arc::new(TrainerParams::default()),
        })
    }

    /// Context on the CPU backend with the given feature extractor.
    pub fn cpu<F: FeatureExtractor>(extractor: F, config: DeviceConfig) -> Result<Self> {
        Self::new(Arc::new(CpuBackend::new(extractor)), config)
    }

    /// Configuration the context was built with.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Feature vector length of the compiled programs.
    pub fn feat_dim(&self) -> usize {
        self.backend.feat_dim()
    }

    /// Device memory accounting.
    pub fn memory(&self) -> &MemoryTracker {
        &self.tracker
    }

    /// Current slot capacity, if allocated.
    pub fn slot_capacity(&self) -> Option<SlotCapacity> {
        self.capacity
    }

    /// Installs the candidate sampling parameters used by the histogram
    /// kernel and drops candidates cached for earlier parameters.
    pub fn set_params(&mut self, params: TrainerParams) {
        self.params = Arc::new(params);
        self.backend.reset();
    }

    /// (Re)allocates both image slots for images up to `capacity`.
    pub fn allocate_image_slots(&mut self, capacity: SlotCapacity) -> Result<()> {
        self.finish()?;
        // Release the old slots before charging the new ones.
        self.slots.clear();
        self.capacity = None;
        let mut slots = Vec::with_capacity(NUM_COMMAND_QUEUES);
        for _ in 0..NUM_COMMAND_QUEUES {
            let slot = ImageSlot::allocate(&self.tracker, &capacity, &self.config)?;
            slots.push(Arc::new(Mutex::new(slot)));
        }
        log::debug!(
            "image slots sized {}x{}x{} for {} samples ({} bytes in use)",
            capacity.width,
            capacity.height,
            capacity.channels,
            capacity.max_samples,
            self.tracker.allocated()
        );
        self.slots = slots;
        self.capacity = Some(capacity);
        Ok(())
    }

    /// Uploads the whole tree, replacing any tree already resident.
    pub fn load_tree(&mut self, tree: &Tree) -> Result<()> {
        if tree.feat_dim() != self.backend.feat_dim() {
            return Err(ForestError::dimension_mismatch(
                format!("feature dimension {}", self.backend.feat_dim()),
                format!("{}", tree.feat_dim()),
            ));
        }
        self.finish()?;
        self.tree = None;
        let n = tree.num_nodes();
        let mut buffers = TreeBuffers {
            id: tree.id(),
            feat_dim: tree.feat_dim(),
            output_dim: tree.output_dim(),
            left_children: DeviceBuffer::new(&self.tracker, "left children", n)?,
            features: DeviceBuffer::new(&self.tracker, "features", n * tree.feat_dim())?,
            thresholds: DeviceBuffer::new(&self.tracker, "thresholds", n)?,
            outputs: DeviceBuffer::new(&self.tracker, "outputs", n * tree.output_dim())?,
        };
        buffers.upload(tree, 0, n - 1)?;
        self.tree = Some(Arc::new(RwLock::new(buffers)));
        Ok(())
    }

    /// Re-uploads nodes `start..=end` after the host tree changed.
    pub fn upload_tree_range(&self, tree: &Tree, start: NodeIndex, end: NodeIndex) -> Result<()> {
        if end < start || end >= tree.num_nodes() {
            return Err(ForestError::index_out_of_bounds(end, tree.num_nodes()));
        }
        let buffers = self.tree_buffers()?;
        let mut guard = buffers.write()?;
        if guard.id != tree.id() {
            return Err(ForestError::training(format!(
                "tree {} is resident but tree {} was updated",
                guard.id,
                tree.id()
            )));
        }
        guard.upload(tree, start, end)
    }

    fn tree_buffers(&self) -> Result<&Arc<RwLock<TreeBuffers>>> {
        self.tree
            .as_ref()
            .ok_or_else(|| ForestError::internal("no tree is resident on the device"))
    }

    fn slot(&self, slot: usize) -> Result<&Arc<Mutex<ImageSlot>>> {
        self.slots
            .get(slot)
            .ok_or_else(|| ForestError::internal(format!("image slot {} is not allocated", slot)))
    }

    /// Writes `image` into `slot` and enqueues `pass` on that slot's queue.
    ///
    /// The slot must not have outstanding work: the caller waits on the
    /// previous event of the slot (and reads its results back) first.
    pub fn enqueue_image(
        &self,
        slot: usize,
        image: &Image,
        selection: PixelSelection<'_>,
        pass: ImagePass,
    ) -> Result<Event> {
        let slot_buffers = Arc::clone(self.slot(slot)?);
        let tree = Arc::clone(self.tree_buffers()?);
        slot_buffers.lock()?.write_image(image, selection)?;

        let backend = Arc::clone(&self.backend);
        let params = Arc::clone(&self.params);
        self.queues[slot].enqueue("image pass", move || {
            let mut guard = slot_buffers.lock()?;
            let tree = tree.read()?;
            let tree_view = tree.view();
            let ImageSlot {
                width,
                height,
                channels,
                stride,
                n_samples,
                pixels,
                mask,
                node_ids,
                node_ids_next,
                samples,
                local_histogram,
                ..
            } = &mut *guard;
            let image = ImageView::new(pixels.as_slice(), *width, *height, *stride, *channels);

            for (id, m) in node_ids.as_mut_slice().iter_mut().zip(mask.as_slice()) {
                *id = if *m != 0 { 0 } else { -1 };
            }
            for _ in 0..pass.predict_steps {
                backend.predict(
                    &image,
                    mask.as_slice(),
                    &tree_view,
                    node_ids.as_slice(),
                    node_ids_next.as_mut_slice(),
                )?;
                std::mem::swap(node_ids, node_ids_next);
            }

            if let Some((start_node, end_node)) = pass.histogram_range {
                let args = LocalHistogramArgs {
                    image,
                    node_ids: node_ids.as_slice(),
                    samples: &samples.as_slice()[..*n_samples],
                    tree: tree_view,
                    params: &params,
                    tree_id: tree.id,
                    start_node,
                    end_node,
                };
                backend.compute_local_histogram(&args, local_histogram.as_mut_slice())?;
            }
            Ok(())
        })
    }

    /// Copies the local histogram and sample nodes of `slot` into `out`.
    pub fn read_local_histogram(&self, slot: usize, out: &mut LocalHistogram) -> Result<()> {
        let guard = self.slot(slot)?.lock()?;
        let row_bytes = self.params.local_histogram_bytes();
        if guard.n_samples * row_bytes > guard.local_histogram.len() {
            return Err(DeviceError::BufferOverflow {
                what: "local histogram read".to_string(),
                requested: guard.n_samples * row_bytes,
                capacity: guard.local_histogram.len(),
            }
            .into());
        }
        let view = guard.view();
        out.row_bytes = row_bytes;
        out.sample_nodes.clear();
        out.sample_nodes.extend(
            guard.samples.as_slice()[..guard.n_samples]
                .iter()
                .map(|s| guard.node_ids.as_slice()[view.device_offset(*s).2]),
        );
        out.bits.clear();
        out.bits
            .extend_from_slice(&guard.local_histogram.as_slice()[..guard.n_samples * row_bytes]);
        Ok(())
    }

    /// Copies the node id of every pixel of `slot` in image-linear order.
    pub fn read_node_ids(&self, slot: usize) -> Result<Vec<i32>> {
        let guard = self.slot(slot)?.lock()?;
        let mut out = Vec::with_capacity(guard.width * guard.height);
        for y in 0..guard.height {
            let row = y * guard.stride;
            out.extend_from_slice(&guard.node_ids.as_slice()[row..row + guard.width]);
        }
        Ok(out)
    }

    /// Runs the best-feature kernel on a batch of node histograms.
    pub fn learn_best_features(
        &self,
        histograms: &[u32],
        class_totals: &[u64],
        n_classes: usize,
    ) -> Result<Vec<BestPair>> {
        let n_features = self.params.n_features;
        let n_thresholds = self.params.n_thresholds;
        let node_len = n_classes * n_features * n_thresholds;
        if node_len == 0 || histograms.len() % node_len != 0 {
            return Err(ForestError::dimension_mismatch(
                format!("a multiple of {} histogram entries", node_len),
                format!("{}", histograms.len()),
            ));
        }
        let n_nodes = histograms.len() / node_len;

        let mut device_histograms =
            DeviceBuffer::<u32>::new(&self.tracker, "learn histograms", histograms.len())?;
        device_histograms.write(histograms)?;
        let mut device_totals = DeviceBuffer::<u64>::new(&self.tracker, "class totals", class_totals.len())?;
        device_totals.write(class_totals)?;
        let mut best = DeviceBuffer::<BestPair>::new(&self.tracker, "best pairs", n_nodes)?;

        let backend = Arc::clone(&self.backend);
        let per_thread_pairs = self.config.per_thread_pairs;
        self.queues[0]
            .enqueue("learn_best_feature", move || {
                let args = LearnArgs {
                    histograms: device_histograms.as_slice(),
                    class_totals: device_totals.as_slice(),
                    n_nodes,
                    n_classes,
                    n_features,
                    n_thresholds,
                    per_thread_pairs,
                };
                backend.learn_best_feature(&args, best.as_mut_slice())?;
                Ok(best.as_slice().to_vec())
            })?
            .wait()
    }

    /// Blocks until both queues are idle.
    pub fn finish(&self) -> Result<()> {
        for queue in &self.queues {
            queue.finish()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("backend", &self.backend.name())
            .field("queues", &self.queues.len())
            .field("capacity", &self.capacity)
            .field("allocated", &self.tracker.allocated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::features::PixelProbeFeature;

    fn context() -> DeviceContext {
        let mut ctx =
            DeviceContext::cpu(PixelProbeFeature::new(), DeviceConfig::new().with_num_threads(2))
                .unwrap();
        ctx.allocate_image_slots(SlotCapacity {
            width: 4,
            height: 4,
            channels: 1,
            max_samples: 4,
            histogram_row_bytes: 1,
        })
        .unwrap();
        ctx
    }

    fn stump() -> Tree {
        let mut tree = Tree::classification(0, 2, 2, 2).unwrap();
        tree.set_leaf(0, &[0.5, 0.5]).unwrap();
        tree.split(0, &[0.0, 0.0], 50.0, &[1.0, 0.0], &[0.0, 1.0])
            .unwrap();
        tree
    }

    #[test]
    fn test_slots_are_padded_and_reallocation_releases() {
        let mut ctx = context();
        // Two slots of 16x16 padded pixels.
        let allocated = ctx.memory().allocated();
        assert!(allocated > 2 * 16 * 16 * 4);
        ctx.allocate_image_slots(ctx.slot_capacity().unwrap()).unwrap();
        assert_eq!(ctx.memory().allocated(), allocated);
    }

    #[test]
    fn test_oversized_image_is_rejected() {
        let mut ctx = context();
        ctx.load_tree(&stump()).unwrap();
        let image = Image::new(17, 2, 1);
        let pass = ImagePass {
            predict_steps: 0,
            histogram_range: None,
        };
        match ctx.enqueue_image(0, &image, PixelSelection::All, pass) {
            Err(ForestError::Device {
                source: DeviceError::CapacityExceeded { width: 17, .. },
            }) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_predict_pass_reads_back_image_layout() {
        let mut ctx = context();
        ctx.load_tree(&stump()).unwrap();
        let image = Image::from_vec(2, 2, 1, vec![10.0, 90.0, 60.0, 20.0]).unwrap();
        let pass = ImagePass {
            predict_steps: 1,
            histogram_range: None,
        };
        ctx.enqueue_image(1, &image, PixelSelection::Mask(&[1, 1, 0, 1]), pass)
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(ctx.read_node_ids(1).unwrap(), vec![1, 2, -1, 1]);
    }

    #[test]
    fn test_tree_range_upload_is_visible_to_kernels() {
        let mut ctx = context();
        let mut tree = Tree::classification(0, 2, 2, 2).unwrap();
        tree.set_leaf(0, &[0.5, 0.5]).unwrap();
        ctx.load_tree(&tree).unwrap();
        tree.split(0, &[0.0, 0.0], 50.0, &[1.0, 0.0], &[0.0, 1.0])
            .unwrap();
        ctx.upload_tree_range(&tree, 0, 2).unwrap();

        let image = Image::from_vec(1, 1, 1, vec![70.0]).unwrap();
        let pass = ImagePass {
            predict_steps: 1,
            histogram_range: None,
        };
        ctx.enqueue_image(0, &image, PixelSelection::All, pass)
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(ctx.read_node_ids(0).unwrap(), vec![2]);
    }

    #[test]
    fn test_learn_runs_on_device() {
        let mut ctx = context();
        ctx.set_params(
            TrainerParams::new()
                .with_n_features(1)
                .with_n_thresholds(2),
        );
        let best = ctx.learn_best_features(&[4, 2, 0, 2], &[4, 4], 2).unwrap();
        assert_eq!(best.len(), 1);
        assert_eq!((best[0].feature, best[0].threshold), (0, 0));
    }
}
