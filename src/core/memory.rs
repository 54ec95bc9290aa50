//! Scoped device memory and allocation accounting.
//!
//! Every device-side allocation is a [`DeviceBuffer`]. A buffer is charged to
//! its owning [`MemoryTracker`] when constructed and released when dropped, so
//! init and cleanup paths never pair allocations with explicit frees.

use crate::core::error::{DeviceError, Result};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Thread-safe memory accounting for one device.
#[derive(Debug)]
pub struct MemoryTracker {
    limit: u64,
    allocated: AtomicU64,
    peak: AtomicU64,
}

impl MemoryTracker {
    /// Creates a tracker enforcing `limit` bytes.
    pub fn new(limit: u64) -> Arc<Self> {
        Arc::new(MemoryTracker {
            limit,
            allocated: AtomicU64::new(0),
            peak: AtomicU64::new(0),
        })
    }

    /// Bytes currently allocated.
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Acquire)
    }

    /// Highest allocation level observed.
    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::Acquire)
    }

    /// Configured limit in bytes.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Bytes still available.
    pub fn available(&self) -> u64 {
        self.limit.saturating_sub(self.allocated())
    }

    fn reserve(&self, label: &str, bytes: u64) -> Result<()> {
        let mut current = self.allocated.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(bytes);
            if next > self.limit {
                return Err(DeviceError::AllocationFailed {
                    label: label.to_string(),
                    size: bytes,
                    available: self.limit.saturating_sub(current),
                }
                .into());
            }
            match self.allocated.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.peak.fetch_max(next, Ordering::AcqRel);
                    return Ok(());
                }
                Err(observed) => current = observed,
            }
        }
    }

    fn release(&self, bytes: u64) {
        self.allocated.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// Device-resident buffer released on drop.
pub struct DeviceBuffer<T> {
    label: &'static str,
    data: Vec<T>,
    bytes: u64,
    tracker: Arc<MemoryTracker>,
}

impl<T: Copy + Default> DeviceBuffer<T> {
    /// Allocates `len` default-initialised elements on the device.
    pub fn new(tracker: &Arc<MemoryTracker>, label: &'static str, len: usize) -> Result<Self> {
        let bytes = (len * std::mem::size_of::<T>()) as u64;
        tracker.reserve(label, bytes)?;
        log::trace!("allocated device buffer '{}' ({} bytes)", label, bytes);
        Ok(DeviceBuffer {
            label,
            data: vec![T::default(); len],
            bytes,
            tracker: Arc::clone(tracker),
        })
    }

    /// Resets every element to its default value.
    pub fn clear(&mut self) {
        self.data.fill(T::default());
    }

    /// Copies `src` into the front of the buffer.
    pub fn write(&mut self, src: &[T]) -> Result<()> {
        self.write_at(0, src)
    }

    /// Copies `src` into the buffer starting at element `offset`.
    pub fn write_at(&mut self, offset: usize, src: &[T]) -> Result<()> {
        let end = offset + src.len();
        if end > self.data.len() {
            return Err(DeviceError::BufferOverflow {
                what: format!("write to '{}'", self.label),
                requested: end,
                capacity: self.data.len(),
            }
            .into());
        }
        self.data[offset..end].copy_from_slice(src);
        Ok(())
    }
}

impl<T> DeviceBuffer<T> {
    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size in bytes charged to the tracker.
    pub fn size_bytes(&self) -> u64 {
        self.bytes
    }

    /// Debug label.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Read-only view of the contents.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutable view of the contents.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> Drop for DeviceBuffer<T> {
    fn drop(&mut self) {
        self.tracker.release(self.bytes);
        log::trace!("released device buffer '{}' ({} bytes)", self.label, self.bytes);
    }
}

impl<T> fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("label", &self.label)
            .field("len", &self.data.len())
            .field("bytes", &self.bytes)
            .finish()
    }
}

/// Rounds `value` up to the next multiple of `tile`.
#[inline]
pub fn pad_to_tile(value: usize, tile: usize) -> usize {
    if tile == 0 {
        return value;
    }
    value.div_ceil(tile) * tile
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ForestError;

    #[test]
    fn test_buffer_charges_and_releases() {
        let tracker = MemoryTracker::new(1024);
        {
            let buffer = DeviceBuffer::<u32>::new(&tracker, "counts", 64).unwrap();
            assert_eq!(buffer.len(), 64);
            assert_eq!(tracker.allocated(), 256);
        }
        assert_eq!(tracker.allocated(), 0);
        assert_eq!(tracker.peak(), 256);
    }

    #[test]
    fn test_allocation_over_limit_fails() {
        let tracker = MemoryTracker::new(100);
        let _first = DeviceBuffer::<u8>::new(&tracker, "a", 80).unwrap();
        let second = DeviceBuffer::<u8>::new(&tracker, "b", 40);
        assert!(matches!(second, Err(ForestError::Device { .. })));
        assert_eq!(tracker.available(), 20);
    }

    #[test]
    fn test_write_bounds() {
        let tracker = MemoryTracker::new(1024);
        let mut buffer = DeviceBuffer::<f32>::new(&tracker, "pixels", 4).unwrap();
        buffer.write_at(2, &[1.0, 2.0]).unwrap();
        assert_eq!(buffer.as_slice(), &[0.0, 0.0, 1.0, 2.0]);
        assert!(buffer.write_at(3, &[1.0, 2.0]).is_err());
        buffer.clear();
        assert!(buffer.as_slice().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_pad_to_tile() {
        assert_eq!(pad_to_tile(0, 16), 0);
        assert_eq!(pad_to_tile(1, 16), 16);
        assert_eq!(pad_to_tile(16, 16), 16);
        assert_eq!(pad_to_tile(17, 16), 32);
    }
}
