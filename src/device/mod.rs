//! Compute device abstraction.
//!
//! - [`kernels`]: the [`KernelBackend`] trait and kernel argument views
//! - [`cpu`]: thread-pool backend
//! - [`features`]: per-pixel feature responses
//! - [`queue`]: asynchronous command queues and events
//! - [`context`]: the [`DeviceContext`] owning queues and device buffers

pub mod context;
pub mod cpu;
pub mod features;
pub mod kernels;
pub mod queue;

pub use context::{DeviceContext, ImagePass, LocalHistogram, PixelSelection, SlotCapacity};
pub use cpu::CpuBackend;
pub use features::{DepthInvariantFeature, FeatureExtractor, PixelProbeFeature};
pub use kernels::{BestPair, ImageView, KernelBackend, LearnArgs, LocalHistogramArgs, TreeView};
pub use queue::{CommandQueue, Event};
