//! Global histogram storage and the accumulation pipeline that fills it.
//!
//! - [`SliceHistograms`]: one accumulator per frontier slot of a slice
//! - [`pipeline`]: streams images through the device and folds their local
//!   histograms into the slots
//! - [`simd`]: the accumulation kernels used by the consumer

pub mod pipeline;
pub mod simd;

pub use pipeline::{HistogramPipeline, TraversalOutcome};
pub use simd::{select_accumulator, RecordAccumulator, ScalarAccumulator, SimdAccumulator};

use crate::core::error::{ForestError, Result};
use num_traits::Zero;
use std::fmt::Debug;

/// Scalar type stored in a global histogram.
pub trait HistogramElement: Zero + Copy + Send + Sync + Debug + 'static {}

impl HistogramElement for u32 {}
impl HistogramElement for f64 {}

/// Per-slot global histograms of one slice, stored contiguously.
#[derive(Debug, Clone)]
pub struct SliceHistograms<T: HistogramElement> {
    slots: usize,
    slot_len: usize,
    data: Vec<T>,
}

impl<T: HistogramElement> SliceHistograms<T> {
    /// Allocates `slots` zeroed histograms of `slot_len` entries.
    pub fn new(slots: usize, slot_len: usize) -> Result<Self> {
        let len = slots.checked_mul(slot_len).ok_or_else(|| {
            ForestError::memory(format!("{} slots of {} entries overflow", slots, slot_len))
        })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|e| {
            ForestError::memory(format!(
                "cannot allocate {} global histogram entries: {}",
                len, e
            ))
        })?;
        data.resize(len, T::zero());
        Ok(SliceHistograms {
            slots,
            slot_len,
            data,
        })
    }

    /// Number of slots.
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Entries per slot.
    pub fn slot_len(&self) -> usize {
        self.slot_len
    }

    /// Host memory held, in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<T>()
    }

    /// Zeroes every slot.
    pub fn reset(&mut self) {
        self.data.fill(T::zero());
    }

    /// Histogram of slot `k`.
    #[inline]
    pub fn slot(&self, k: usize) -> &[T] {
        &self.data[k * self.slot_len..(k + 1) * self.slot_len]
    }

    /// Mutable histogram of slot `k`.
    #[inline]
    pub fn slot_mut(&mut self, k: usize) -> &mut [T] {
        &mut self.data[k * self.slot_len..(k + 1) * self.slot_len]
    }

    /// Slots `start..start + count` as one contiguous block.
    pub fn block(&self, start: usize, count: usize) -> &[T] {
        let end = (start + count).min(self.slots);
        &self.data[start.min(end) * self.slot_len..end * self.slot_len]
    }
}
