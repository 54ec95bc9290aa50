//! Core data types shared by the tree trainer, the device layer and prediction.
//!
//! Node identifiers follow the dense heap layout of the tree arrays: node `i`
//! has its children at `2*i+1` and `2*i+2`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense node identifier inside a tree's attribute arrays.
pub type NodeIndex = usize;

/// Encoded left-child link stored per node.
///
/// `-2` marks an uninitialised node, `-1` a leaf, any non-negative value the
/// index of the left child.
pub type ChildLink = i32;

/// Feature vector component and split threshold type.
pub type FeatureValue = f32;

/// Raw label stored in a label map. `0` means "unlabelled".
pub type LabelValue = u8;

/// Linear pixel index (`y * width + x`) of a sampled pixel.
pub type PixelIndex = u32;

/// Per-node sample counter.
pub type SampleCount = u64;

/// Link value of a node that has never been reached.
pub const NODE_UNINITIALIZED: ChildLink = -2;

/// Link value of a leaf node.
pub const NODE_LEAF: ChildLink = -1;

/// Number of entries in a rotation histogram record (3x3 matrix plus a counter
/// stored as the column-major upper 3x4 block of a homogeneous 4x4 matrix).
pub const ROTATION_RECORD_LEN: usize = 12;

/// Index of the sample counter inside a rotation record.
pub const ROTATION_RECORD_COUNT: usize = 11;

/// Number of Euler angles produced by rotation regression.
pub const ROTATION_OUTPUT_DIM: usize = 3;

/// Learning task a tree is trained for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Per-pixel class posteriors.
    Classification,
    /// Per-image orientation (Euler angles) regression.
    RotationRegression,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Classification => write!(f, "classification"),
            TaskKind::RotationRegression => write!(f, "rotation-regression"),
        }
    }
}

/// Compute backend a device context is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    /// Thread-pool fallback executing kernels on the host CPU.
    Cpu,
    /// External accelerator reached through a vendor compute API.
    Accelerator,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Cpu
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Cpu => write!(f, "cpu"),
            DeviceType::Accelerator => write!(f, "accelerator"),
        }
    }
}

/// Returns the first node id of tree level `level` (root is level 0).
#[inline]
pub fn level_start(level: usize) -> NodeIndex {
    (1usize << level) - 1
}

/// Returns the last node id of tree level `level`.
#[inline]
pub fn level_end(level: usize) -> NodeIndex {
    (1usize << (level + 1)) - 2
}

/// Number of nodes of a full binary tree of `depth` levels.
#[inline]
pub fn nodes_for_depth(depth: usize) -> usize {
    if depth == 0 {
        0
    } else {
        (1usize << depth) - 1
    }
}
