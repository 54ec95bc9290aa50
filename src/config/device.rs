//! Device execution settings.
//!
//! Everything the trainer used to read from compile-time defines (work-group
//! tiles, FIFO depth, histogram memory budget, learn-kernel batching) lives in
//! [`DeviceConfig`], which is passed to the trainer at construction and never
//! mutated afterwards.

use crate::config::{load_document, save_document};
use crate::core::constants::*;
use crate::core::error::{ForestError, Result};
use crate::core::types::DeviceType;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Device configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Backend the kernels run on
    pub device_type: DeviceType,
    /// Worker threads for the CPU backend (0 = all cores)
    pub num_threads: usize,
    /// Completed local histograms that may wait for the consumer
    pub fifo_capacity: usize,
    /// Byte budget for the global histograms of one slice
    pub histogram_memory_budget: u64,
    /// Device memory available for buffers
    pub device_memory_limit: u64,
    /// Nodes learnt per learn-kernel dispatch
    pub parallel_learnt_nodes: usize,
    /// Feature/threshold pairs scanned per learn-kernel worker
    pub per_thread_pairs: usize,
    /// Prediction tile width; device images are padded to it
    pub tile_width: usize,
    /// Prediction tile height
    pub tile_height: usize,
    /// Samples per local-histogram work-group
    pub local_histogram_group: usize,
    /// Use vector instructions for host histogram accumulation
    pub use_simd: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            device_type: DeviceType::Cpu,
            num_threads: DEFAULT_NUM_THREADS,
            fifo_capacity: GLOBAL_HISTOGRAM_FIFO_SIZE,
            histogram_memory_budget: GLOBAL_HISTOGRAM_MAX_SIZE,
            device_memory_limit: DEFAULT_DEVICE_MEMORY_LIMIT,
            parallel_learnt_nodes: PARALLEL_LEARNT_NODES,
            per_thread_pairs: PER_THREAD_FEAT_THR_PAIRS,
            tile_width: WG_PREDICT_WIDTH,
            tile_height: WG_PREDICT_HEIGHT,
            local_histogram_group: WG_LOCAL_HISTOGRAM_SIZE,
            use_simd: true,
        }
    }
}

impl DeviceConfig {
    /// Create a new device configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of threads
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Set the producer/consumer FIFO depth
    pub fn with_fifo_capacity(mut self, capacity: usize) -> Self {
        self.fifo_capacity = capacity;
        self
    }

    /// Set the global histogram byte budget
    pub fn with_histogram_memory_budget(mut self, bytes: u64) -> Self {
        self.histogram_memory_budget = bytes;
        self
    }

    /// Set the device memory limit
    pub fn with_device_memory_limit(mut self, bytes: u64) -> Self {
        self.device_memory_limit = bytes;
        self
    }

    /// Set the learn-kernel node batch
    pub fn with_parallel_learnt_nodes(mut self, nodes: usize) -> Self {
        self.parallel_learnt_nodes = nodes;
        self
    }

    /// Set the pairs scanned per learn-kernel worker
    pub fn with_per_thread_pairs(mut self, pairs: usize) -> Self {
        self.per_thread_pairs = pairs;
        self
    }

    /// Set the prediction tile
    pub fn with_tile(mut self, width: usize, height: usize) -> Self {
        self.tile_width = width;
        self.tile_height = height;
        self
    }

    /// Enable or disable SIMD accumulation
    pub fn with_simd(mut self, enabled: bool) -> Self {
        self.use_simd = enabled;
        self
    }

    /// Worker threads actually used
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            num_cpus::get()
        } else {
            self.num_threads
        }
    }

    /// Validate device configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_threads > num_cpus::get() * 4 {
            log::warn!(
                "num_threads ({}) is much larger than available CPU cores ({})",
                self.num_threads,
                num_cpus::get()
            );
        }

        if self.fifo_capacity == 0 {
            return Err(ForestError::invalid_parameter(
                "fifo_capacity",
                self.fifo_capacity.to_string(),
                "must be at least 1",
            ));
        }

        if self.histogram_memory_budget == 0 {
            return Err(ForestError::invalid_parameter(
                "histogram_memory_budget",
                "0",
                "must be positive",
            ));
        }

        if self.device_memory_limit == 0 {
            return Err(ForestError::invalid_parameter(
                "device_memory_limit",
                "0",
                "must be positive",
            ));
        }

        if self.parallel_learnt_nodes == 0 {
            return Err(ForestError::invalid_parameter(
                "parallel_learnt_nodes",
                "0",
                "must be positive",
            ));
        }

        if self.per_thread_pairs == 0 {
            return Err(ForestError::invalid_parameter(
                "per_thread_pairs",
                "0",
                "must be positive",
            ));
        }

        for (name, value) in [
            ("tile_width", self.tile_width),
            ("tile_height", self.tile_height),
            ("local_histogram_group", self.local_histogram_group),
        ] {
            if value == 0 || !value.is_power_of_two() {
                return Err(ForestError::invalid_parameter(
                    name,
                    value.to_string(),
                    "must be a positive power of two",
                ));
            }
        }

        if self.device_type != DeviceType::Cpu {
            return Err(ForestError::not_implemented(format!(
                "{} backend",
                self.device_type
            )));
        }

        Ok(())
    }

    /// Load configuration from a `.toml` or `.json` file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: DeviceConfig = load_document(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a `.toml` or `.json` file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_document(self, path.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = DeviceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fifo_capacity, 2);
        assert_eq!(config.parallel_learnt_nodes, 8);
        assert_eq!(config.tile_width, 16);
    }

    #[test]
    fn test_builder() {
        let config = DeviceConfig::new()
            .with_num_threads(3)
            .with_fifo_capacity(4)
            .with_tile(8, 8)
            .with_simd(false);
        assert_eq!(config.effective_threads(), 3);
        assert_eq!(config.fifo_capacity, 4);
        assert!(!config.use_simd);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(DeviceConfig::new().with_fifo_capacity(0).validate().is_err());
        assert!(DeviceConfig::new().with_tile(12, 16).validate().is_err());
        assert!(DeviceConfig::new()
            .with_histogram_memory_budget(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_accelerator_is_not_implemented() {
        let mut config = DeviceConfig::default();
        config.device_type = DeviceType::Accelerator;
        assert!(matches!(
            config.validate(),
            Err(ForestError::NotImplemented { .. })
        ));
    }

    #[test]
    fn test_toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.toml");
        let config = DeviceConfig::new().with_fifo_capacity(3);
        config.save_to_file(&path).unwrap();
        let loaded = DeviceConfig::load_from_file(&path).unwrap();
        assert_eq!(config, loaded);
    }
}
