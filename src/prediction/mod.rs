//! Inference with trained trees.
//!
//! Both predictors walk every pixel down each tree with the device predict
//! kernel and then combine the reached leaves on the host:
//! - [`ForestClassifier`] averages leaf posteriors per pixel
//! - [`ForestRegressor`] averages leaf rotations and projects the mean back
//!   onto the rotation group

pub mod classifier;
pub mod regressor;

pub use classifier::ForestClassifier;
pub use regressor::ForestRegressor;

use crate::core::error::{ForestError, Result};
use crate::core::types::TaskKind;
use crate::dataset::Image;
use crate::device::{DeviceContext, ImagePass, PixelSelection, SlotCapacity};
use crate::tree::Tree;
use ndarray::Array2;
use std::path::Path;

/// Trees of one task sharing a device.
pub struct TreeEnsemble {
    trees: Vec<Tree>,
    device: DeviceContext,
    resident: Option<usize>,
}

impl TreeEnsemble {
    /// Checks that `trees` agree with each other and with `device`.
    pub fn new(trees: Vec<Tree>, device: DeviceContext, task: TaskKind) -> Result<Self> {
        let first = trees
            .first()
            .ok_or_else(|| ForestError::prediction("an ensemble needs at least one tree"))?;
        let output_dim = first.output_dim();
        for tree in &trees {
            if tree.task() != task {
                return Err(ForestError::prediction(format!(
                    "tree {} is a {} tree, expected {}",
                    tree.id(),
                    tree.task(),
                    task
                )));
            }
            if tree.output_dim() != output_dim {
                return Err(ForestError::dimension_mismatch(
                    format!("output dimension {}", output_dim),
                    format!("{} (tree {})", tree.output_dim(), tree.id()),
                ));
            }
            if tree.feat_dim() != device.feat_dim() {
                return Err(ForestError::dimension_mismatch(
                    format!("feature dimension {}", device.feat_dim()),
                    format!("{} (tree {})", tree.feat_dim(), tree.id()),
                ));
            }
        }
        Ok(TreeEnsemble {
            trees,
            device,
            resident: None,
        })
    }

    /// Reads every tree file in `paths`.
    pub fn load_trees<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Tree>> {
        paths.iter().map(Tree::load_from_file).collect()
    }

    /// Trees in ensemble order.
    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    /// Number of trees.
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    /// Always false for a constructed ensemble.
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Leaf dimension shared by all trees.
    pub fn output_dim(&self) -> usize {
        self.trees.first().map_or(0, |t| t.output_dim())
    }

    /// Position of the tree with id `tree_id`.
    pub fn position(&self, tree_id: u32) -> Result<usize> {
        self.trees
            .iter()
            .position(|t| t.id() == tree_id)
            .ok_or_else(|| ForestError::prediction(format!("no tree with id {}", tree_id)))
    }

    fn ensure_capacity(&mut self, image: &Image) -> Result<()> {
        let fits = self.device.slot_capacity().is_some_and(|c| {
            c.width >= image.width() && c.height >= image.height() && c.channels >= image.channels()
        });
        if !fits {
            self.device.allocate_image_slots(SlotCapacity {
                width: image.width(),
                height: image.height(),
                channels: image.channels(),
                max_samples: 0,
                histogram_row_bytes: 0,
            })?;
        }
        Ok(())
    }

    /// Leaf reached by every pixel of `image` in the tree at `position`,
    /// as a `[height, width]` map. Masked-out pixels hold `-1`.
    pub fn leaves_at(
        &mut self,
        position: usize,
        image: &Image,
        mask: Option<&[u8]>,
    ) -> Result<Array2<i32>> {
        let tree = self
            .trees
            .get(position)
            .ok_or_else(|| ForestError::index_out_of_bounds(position, self.trees.len()))?;
        let predict_steps = tree.depth() - 1;
        self.ensure_capacity(image)?;
        if self.resident != Some(position) {
            self.device.load_tree(&self.trees[position])?;
            self.resident = Some(position);
        }

        let selection = mask.map_or(PixelSelection::All, PixelSelection::Mask);
        let pass = ImagePass {
            predict_steps,
            histogram_range: None,
        };
        self.device.enqueue_image(0, image, selection, pass)?.wait()?;
        let ids = self.device.read_node_ids(0)?;
        Array2::from_shape_vec((image.height(), image.width()), ids)
            .map_err(|e| ForestError::prediction(format!("leaf map: {}", e)))
    }
}

impl std::fmt::Debug for TreeEnsemble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeEnsemble")
            .field("trees", &self.trees.len())
            .field("resident", &self.resident)
            .finish()
    }
}
