//! Error handling and error types for rforest-offload.
//!
//! Every fallible operation returns [`Result`], whose error side is the
//! crate-wide [`ForestError`]. Device-layer failures are first described by the
//! narrower [`DeviceError`] and converted at the boundary.

use std::io;
use thiserror::Error;

/// Every failure a training or prediction call can report.
#[derive(Error, Debug)]
pub enum ForestError {
    /// Rejected `TrainerParams` or `DeviceConfig`
    #[error("invalid configuration: {message}")]
    Config {
        /// What was rejected
        message: String,
    },

    /// Training-set construction failures
    #[error("training set: {message}")]
    Dataset {
        /// Offending image or sample
        message: String,
    },

    /// Image and label map (or mask) disagree on dimensions
    #[error("image dimensions disagree: {message}")]
    DataDimensionMismatch {
        /// Both sizes
        message: String,
    },

    /// A `train` call that cannot proceed
    #[error("training failed: {message}")]
    Training {
        /// Why training stopped
        message: String,
    },

    /// Invalid tree layout or node transition
    #[error("malformed tree: {message}")]
    TreeConstruction {
        /// Node and violated rule
        message: String,
    },

    /// Prediction rejected its trees or input image
    #[error("prediction failed: {message}")]
    Prediction {
        /// Why prediction stopped
        message: String,
    },

    /// Failures raised by the compute device
    #[error("device: {source}")]
    Device {
        /// Device-level cause
        #[from]
        source: DeviceError,
    },

    /// Host-side histogram storage could not be reserved
    #[error("out of host memory: {message}")]
    Memory {
        /// Requested storage
        message: String,
    },

    /// Tree or configuration document with an invalid layout
    #[error("cannot encode or decode: {message}")]
    Serialization {
        /// Offending key or value
        message: String,
    },

    /// File access failure
    #[error("file access failed: {source}")]
    IO {
        /// Underlying I/O error
        #[from]
        source: io::Error,
    },

    /// JSON encoding or decoding failure
    #[error("json: {source}")]
    Json {
        /// Underlying `serde_json` error
        #[from]
        source: serde_json::Error,
    },

    /// TOML decoding failure
    #[error("toml: {source}")]
    Toml {
        /// Underlying `toml` error
        #[from]
        source: toml::de::Error,
    },

    /// Pipeline thread or lock failures
    #[error("pipeline thread: {message}")]
    Threading {
        /// Failing thread or lock
        message: String,
    },

    /// A single parameter outside its accepted range
    #[error("parameter {parameter} = {value} rejected: {reason}")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Rejected value
        value: String,
        /// Accepted range
        reason: String,
    },

    /// Tree, set, or device disagree on a size
    #[error("size mismatch: expected {expected}, found {actual}")]
    DimensionMismatch {
        /// Required size
        expected: String,
        /// Size received
        actual: String,
    },

    /// Node or slot index past the end of its storage
    #[error("node or slot {index} outside 0..{length}")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Storage length
        length: usize,
    },

    /// Requested mode the trainer does not provide
    #[error("unsupported: {feature}")]
    NotImplemented {
        /// Unsupported mode
        feature: String,
    },

    /// Broken internal invariant
    #[error("internal invariant violated: {message}")]
    Internal {
        /// Violated invariant
        message: String,
    },
}

/// Compute device errors
#[derive(Error, Debug)]
pub enum DeviceError {
    /// A kernel program failed to build
    #[error("kernel program '{kernel}' failed to build:\n{log}")]
    KernelBuild {
        /// Kernel name
        kernel: String,
        /// Build log
        log: String,
    },

    /// A device allocation would pass the memory limit
    #[error("device allocation of '{label}' failed: requested {size} bytes, {available} available")]
    AllocationFailed {
        /// Buffer label
        label: String,
        /// Requested bytes
        size: u64,
        /// Bytes left under the limit
        available: u64,
    },

    /// Image larger than the allocated image slots
    #[error("image {width}x{height} exceeds device buffers sized {max_width}x{max_height}")]
    CapacityExceeded {
        /// Image width
        width: usize,
        /// Image height
        height: usize,
        /// Slot width
        max_width: usize,
        /// Slot height
        max_height: usize,
    },

    /// Write past the end of a device buffer
    #[error("{what}: {requested} exceeds device capacity {capacity}")]
    BufferOverflow {
        /// Buffer contents
        what: String,
        /// Requested length
        requested: usize,
        /// Buffer length
        capacity: usize,
    },

    /// Command queue worker has exited
    #[error("command queue {queue} is disconnected")]
    QueueDisconnected {
        /// Queue index
        queue: usize,
    },

    /// A kernel failed or panicked while running
    #[error("kernel '{kernel}' failed: {message}")]
    KernelExecution {
        /// Kernel name
        kernel: String,
        /// Failure description
        message: String,
    },
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ForestError>;

impl ForestError {
    /// Configuration rejection.
    pub fn config<S: Into<String>>(message: S) -> Self {
        ForestError::Config {
            message: message.into(),
        }
    }

    /// Training-set failure.
    pub fn dataset<S: Into<String>>(message: S) -> Self {
        ForestError::Dataset {
            message: message.into(),
        }
    }

    /// Image and label size disagreement.
    pub fn data_dimension_mismatch<S: Into<String>>(message: S) -> Self {
        ForestError::DataDimensionMismatch {
            message: message.into(),
        }
    }

    /// Training failure.
    pub fn training<S: Into<String>>(message: S) -> Self {
        ForestError::Training {
            message: message.into(),
        }
    }

    /// Tree layout violation.
    pub fn tree_construction<S: Into<String>>(message: S) -> Self {
        ForestError::TreeConstruction {
            message: message.into(),
        }
    }

    /// Prediction failure.
    pub fn prediction<S: Into<String>>(message: S) -> Self {
        ForestError::Prediction {
            message: message.into(),
        }
    }

    /// Host storage failure.
    pub fn memory<S: Into<String>>(message: S) -> Self {
        ForestError::Memory {
            message: message.into(),
        }
    }

    /// Document layout failure.
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        ForestError::Serialization {
            message: message.into(),
        }
    }

    /// Pipeline thread failure.
    pub fn threading<S: Into<String>>(message: S) -> Self {
        ForestError::Threading {
            message: message.into(),
        }
    }

    /// Out-of-range parameter, reported with its value.
    pub fn invalid_parameter<P, V, R>(parameter: P, value: V, reason: R) -> Self
    where
        P: Into<String>,
        V: Into<String>,
        R: Into<String>,
    {
        ForestError::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Size disagreement between two components.
    pub fn dimension_mismatch<E, A>(expected: E, actual: A) -> Self
    where
        E: Into<String>,
        A: Into<String>,
    {
        ForestError::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Index past the end of its storage.
    pub fn index_out_of_bounds(index: usize, length: usize) -> Self {
        ForestError::IndexOutOfBounds { index, length }
    }

    /// Invariant that should hold whatever the inputs.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        ForestError::Internal {
            message: message.into(),
        }
    }

    /// Unsupported mode.
    pub fn not_implemented<S: Into<String>>(feature: S) -> Self {
        ForestError::NotImplemented {
            feature: feature.into(),
        }
    }

    /// Kernel build failure carrying the build log.
    pub fn kernel_build<K: Into<String>, L: Into<String>>(kernel: K, log: L) -> Self {
        DeviceError::KernelBuild {
            kernel: kernel.into(),
            log: log.into(),
        }
        .into()
    }

    /// Kernel runtime failure.
    pub fn kernel_execution<K: Into<String>, M: Into<String>>(kernel: K, message: M) -> Self {
        DeviceError::KernelExecution {
            kernel: kernel.into(),
            message: message.into(),
        }
        .into()
    }

    /// Whether the error aborts a whole training call rather than one input.
    pub fn is_fatal(&self) -> bool {
        match self {
            ForestError::Dataset { .. } => false,
            ForestError::DataDimensionMismatch { .. } => false,
            ForestError::Prediction { .. } => false,
            _ => true,
        }
    }

    /// Short tag used in log lines.
    pub fn category(&self) -> &'static str {
        match self {
            ForestError::Config { .. } => "config",
            ForestError::Dataset { .. } => "dataset",
            ForestError::DataDimensionMismatch { .. } => "data_dimension_mismatch",
            ForestError::Training { .. } => "training",
            ForestError::TreeConstruction { .. } => "tree_construction",
            ForestError::Prediction { .. } => "prediction",
            ForestError::Device { .. } => "device",
            ForestError::Memory { .. } => "memory",
            ForestError::Serialization { .. } => "serialization",
            ForestError::IO { .. } => "io",
            ForestError::Json { .. } => "json",
            ForestError::Toml { .. } => "toml",
            ForestError::Threading { .. } => "threading",
            ForestError::InvalidParameter { .. } => "invalid_parameter",
            ForestError::DimensionMismatch { .. } => "dimension_mismatch",
            ForestError::IndexOutOfBounds { .. } => "index_out_of_bounds",
            ForestError::NotImplemented { .. } => "not_implemented",
            ForestError::Internal { .. } => "internal",
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for ForestError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        ForestError::Threading {
            message: format!("lock poisoned: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_message() {
        let err = ForestError::config("bad depth");
        assert!(matches!(err, ForestError::Config { .. }));
        assert_eq!(err.to_string(), "invalid configuration: bad depth");
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_invalid_parameter_message() {
        let err = ForestError::invalid_parameter("n_thresholds", "0", "must be positive");
        assert_eq!(
            err.to_string(),
            "parameter n_thresholds = 0 rejected: must be positive"
        );
    }

    #[test]
    fn test_kernel_build_keeps_log() {
        let err = ForestError::kernel_build("predict", "line 3: unknown symbol");
        assert_eq!(err.category(), "device");
        assert!(err.to_string().contains("line 3: unknown symbol"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_device_errors_name_the_resource() {
        let cases: Vec<(DeviceError, &str)> = vec![
            (
                DeviceError::AllocationFailed {
                    label: "histogram".to_string(),
                    size: 64,
                    available: 32,
                },
                "device allocation of 'histogram' failed: requested 64 bytes, 32 available",
            ),
            (
                DeviceError::CapacityExceeded {
                    width: 40,
                    height: 30,
                    max_width: 32,
                    max_height: 32,
                },
                "image 40x30 exceeds device buffers sized 32x32",
            ),
            (
                DeviceError::BufferOverflow {
                    what: "samples".to_string(),
                    requested: 9,
                    capacity: 8,
                },
                "samples: 9 exceeds device capacity 8",
            ),
            (
                DeviceError::QueueDisconnected { queue: 1 },
                "command queue 1 is disconnected",
            ),
        ];
        for (source, message) in cases {
            assert_eq!(source.to_string(), message);
            let err: ForestError = source.into();
            assert_eq!(err.category(), "device");
            assert_eq!(err.to_string(), format!("device: {}", message));
        }
        let err = ForestError::kernel_execution("learn", "worker panicked");
        assert_eq!(err.to_string(), "device: kernel 'learn' failed: worker panicked");
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: ForestError = io_err.into();
        assert_eq!(err.category(), "io");
    }

    #[test]
    fn test_dataset_errors_are_not_fatal() {
        assert!(!ForestError::data_dimension_mismatch("4x4 vs 4x5").is_fatal());
        assert!(ForestError::not_implemented("resume").is_fatal());
    }
}
