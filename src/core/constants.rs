//! Default sizes and limits for the trainer pipeline and the device layer.
//!
//! These values seed [`DeviceConfig`](crate::config::DeviceConfig) and
//! [`TrainerParams`](crate::config::TrainerParams); nothing reads them as
//! mutable globals.

/// Depth of the FIFO between the histogram producer and consumer.
pub const GLOBAL_HISTOGRAM_FIFO_SIZE: usize = 2;

/// Byte budget for all per-node global histograms of one slice (20 GiB).
pub const GLOBAL_HISTOGRAM_MAX_SIZE: u64 = 20 * (2u64 << 29);

/// Number of nodes whose best split is learnt by one device dispatch.
pub const PARALLEL_LEARNT_NODES: usize = 8;

/// Feature/threshold pairs scanned by one worker of the learn kernel.
pub const PER_THREAD_FEAT_THR_PAIRS: usize = 64;

/// Width of a prediction work-group tile. Device images are padded to it.
pub const WG_PREDICT_WIDTH: usize = 16;

/// Height of a prediction work-group tile.
pub const WG_PREDICT_HEIGHT: usize = 16;

/// Samples handled by one local-histogram work-group.
pub const WG_LOCAL_HISTOGRAM_SIZE: usize = 256;

/// Number of command queues used for double buffering.
pub const NUM_COMMAND_QUEUES: usize = 2;

/// Default device memory limit for the CPU backend (4 GiB).
pub const DEFAULT_DEVICE_MEMORY_LIMIT: u64 = 4 << 30;

/// Default number of worker threads. 0 means "all available cores".
pub const DEFAULT_NUM_THREADS: usize = 0;

/// Default number of sampled features per node.
pub const DEFAULT_NUM_FEATURES: usize = 2048;

/// Default number of sampled thresholds per feature.
pub const DEFAULT_NUM_THRESHOLDS: usize = 20;

/// Default lower bound of each feature component.
pub const DEFAULT_FEATURE_LOW_BOUND: f32 = -60.0;

/// Default upper bound of each feature component.
pub const DEFAULT_FEATURE_UP_BOUND: f32 = 60.0;

/// Default lower bound of the threshold range.
pub const DEFAULT_THRESHOLD_LOW_BOUND: f32 = -200.0;

/// Default upper bound of the threshold range.
pub const DEFAULT_THRESHOLD_UP_BOUND: f32 = 200.0;

/// Default minimum sample count for a node to stay splittable.
pub const DEFAULT_PER_LEAF_SAMPLES_THRESHOLD: f32 = 1.0;

/// Largest value returned by one PRNG output word, used to normalise to `[0, 1]`.
pub const PRNG_WORD_MAX: f32 = u32::MAX as f32;

/// Crate version string.
pub const RFOREST_OFFLOAD_VERSION: &str = env!("CARGO_PKG_VERSION");


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_budget_is_twenty_gib() {
        assert_eq!(GLOBAL_HISTOGRAM_MAX_SIZE, 20 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_version_is_set() {
        assert!(!RFOREST_OFFLOAD_VERSION.is_empty());
    }
}
