//! Producer/consumer pipeline filling the global histograms of one slice.
//!
//! The producer runs on the calling thread. For every image it writes the
//! pixels into the device slot of the image's parity, enqueues the predict
//! steps and the local histogram kernel on that slot's queue, and only then
//! blocks on the previous image's completion event. The finished local
//! histogram is read back into a free FIFO buffer and handed to the consumer.
//!
//! The consumer is a scoped thread that owns the global histograms for the
//! whole traversal, so no lock guards them. Buffers cycle between two bounded
//! channels: `free` holds empty buffers and `full` holds read-back ones. The
//! producer blocks on `free` once `fifo_capacity` buffers are waiting.

use crate::core::error::{ForestError, Result};
use crate::core::types::NodeIndex;
use crate::dataset::TrainingSet;
use crate::device::{DeviceContext, Event, ImagePass, LocalHistogram, PixelSelection};
use crate::tree::frontier::FrontierSlice;
use crate::tree::histogram::{RecordAccumulator, SliceHistograms};
use crate::tree::split::SplitCriterion;
use crate::tree::statistics::NodeStatistics;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::thread;

/// What one traversal did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraversalOutcome {
    /// Per image: whether any of its samples reached the slice
    pub contributing: Vec<bool>,
    /// Images sent through the device
    pub processed_images: usize,
    /// Images skipped because an earlier depth found them irrelevant
    pub skipped_images: usize,
    /// Samples folded into the histograms
    pub accumulated_samples: u64,
}

/// One traversal configuration: which set, which device, which criterion.
pub struct HistogramPipeline<'a, S: SplitCriterion> {
    device: &'a DeviceContext,
    set: &'a TrainingSet,
    criterion: &'a S,
    accumulator: &'a dyn RecordAccumulator,
    fifo_capacity: usize,
    pairs: usize,
    row_bytes: usize,
}

struct Pending {
    image_index: usize,
    slot: usize,
    event: Event,
}

impl<'a, S: SplitCriterion> HistogramPipeline<'a, S> {
    /// Binds the pipeline to its collaborators.
    pub fn new(
        device: &'a DeviceContext,
        set: &'a TrainingSet,
        criterion: &'a S,
        accumulator: &'a dyn RecordAccumulator,
        pairs: usize,
        row_bytes: usize,
    ) -> Self {
        HistogramPipeline {
            device,
            set,
            criterion,
            accumulator,
            fifo_capacity: device.config().fifo_capacity.max(1),
            pairs,
            row_bytes,
        }
    }

    /// Zeroes `histograms` and fills them with every sample of `set` that
    /// currently sits on a node of `slice`.
    ///
    /// `skipped[i]` excludes image `i` entirely. Samples on nodes outside the
    /// slice, or on nodes with at most `per_leaf_samples_thr` samples, are
    /// ignored.
    pub fn traverse(
        &self,
        depth: usize,
        slice: &FrontierSlice,
        histograms: &mut SliceHistograms<S::Elem>,
        skipped: &[bool],
        stats: &NodeStatistics,
        per_leaf_samples_thr: f32,
    ) -> Result<TraversalOutcome> {
        histograms.reset();
        let pass = ImagePass {
            predict_steps: depth - 1,
            histogram_range: Some((slice.start_node(), slice.end_node())),
        };

        let (full_tx, full_rx) = bounded::<LocalHistogram>(self.fifo_capacity);
        let (free_tx, free_rx) = bounded::<LocalHistogram>(self.fifo_capacity);
        for _ in 0..self.fifo_capacity {
            free_tx
                .send(LocalHistogram::with_row_bytes(self.row_bytes))
                .map_err(|_| ForestError::threading("histogram FIFO closed during setup"))?;
        }

        thread::scope(|scope| {
            let consumer = thread::Builder::new()
                .name("histogram-consumer".to_string())
                .spawn_scoped(scope, move || {
                    self.consume(full_rx, free_tx, histograms, slice, stats, per_leaf_samples_thr)
                })
                .map_err(|e| ForestError::threading(format!("cannot start consumer: {}", e)))?;

            let produced = self.produce(pass, skipped, full_tx, free_rx);
            let consumed = consumer
                .join()
                .map_err(|_| ForestError::threading("histogram consumer panicked"))?;

            // A failing consumer closes the channels under the producer, so
            // its error is the root cause.
            let (contributing, accumulated_samples) = consumed?;
            let (processed_images, skipped_images) = produced?;
            Ok(TraversalOutcome {
                contributing,
                processed_images,
                skipped_images,
                accumulated_samples,
            })
        })
    }

    fn produce(
        &self,
        pass: ImagePass,
        skipped: &[bool],
        full: Sender<LocalHistogram>,
        free: Receiver<LocalHistogram>,
    ) -> Result<(usize, usize)> {
        let mut pending: Option<Pending> = None;
        let mut slot = 0;
        let mut processed = 0;
        let mut skipped_count = 0;

        for (image_index, image) in self.set.images().iter().enumerate() {
            if skipped.get(image_index).copied().unwrap_or(false) || image.num_samples() == 0 {
                skipped_count += 1;
                continue;
            }
            let event = self.device.enqueue_image(
                slot,
                image.image(),
                PixelSelection::Samples(image.samples()),
                pass,
            )?;
            if let Some(previous) = pending.replace(Pending {
                image_index,
                slot,
                event,
            }) {
                self.hand_over(previous, &full, &free)?;
            }
            slot ^= 1;
            processed += 1;
        }

        if let Some(last) = pending.take() {
            self.hand_over(last, &full, &free)?;
        }
        Ok((processed, skipped_count))
    }

    fn hand_over(
        &self,
        pending: Pending,
        full: &Sender<LocalHistogram>,
        free: &Receiver<LocalHistogram>,
    ) -> Result<()> {
        pending.event.wait()?;
        let mut buffer = free
            .recv()
            .map_err(|_| ForestError::threading("histogram consumer stopped"))?;
        self.device.read_local_histogram(pending.slot, &mut buffer)?;
        buffer.image_index = pending.image_index;
        full.send(buffer)
            .map_err(|_| ForestError::threading("histogram consumer stopped"))
    }

    fn consume(
        &self,
        full: Receiver<LocalHistogram>,
        free: Sender<LocalHistogram>,
        histograms: &mut SliceHistograms<S::Elem>,
        slice: &FrontierSlice,
        stats: &NodeStatistics,
        per_leaf_samples_thr: f32,
    ) -> Result<(Vec<bool>, u64)> {
        let images = self.set.images();
        let mut contributing = vec![false; images.len()];
        let mut accumulated = 0u64;

        for buffer in full.iter() {
            let image = images
                .get(buffer.image_index)
                .ok_or_else(|| ForestError::index_out_of_bounds(buffer.image_index, images.len()))?;
            let samples = image.samples();
            if buffer.len() != samples.len() {
                return Err(ForestError::dimension_mismatch(
                    format!("{} sample nodes", samples.len()),
                    format!("{}", buffer.len()),
                ));
            }

            for (s, node) in buffer.sample_nodes.iter().enumerate() {
                if *node < 0 {
                    continue;
                }
                let node = *node as NodeIndex;
                let Some(slot) = slice.slot(node) else {
                    continue;
                };
                if stats.total(node) as f32 <= per_leaf_samples_thr {
                    continue;
                }
                if self.criterion.accumulate(
                    histograms.slot_mut(slot),
                    buffer.row(s),
                    image,
                    samples[s],
                    self.pairs,
                    self.accumulator,
                ) {
                    contributing[buffer.image_index] = true;
                    accumulated += 1;
                }
            }
            // The producer may already be done; its buffers are no longer needed.
            let _ = free.send(buffer);
        }
        Ok((contributing, accumulated))
    }
}
