//! Image orientation from rotation-regression trees.

use crate::core::error::{ForestError, Result};
use crate::core::types::TaskKind;
use crate::dataset::Image;
use crate::device::DeviceContext;
use crate::prediction::TreeEnsemble;
use crate::tree::split::rotation::{
    closest_rotation, euler_from_rotation, rotation_from_euler, Matrix3,
};
use crate::tree::Tree;
use ndarray::Array2;

/// Averages the leaf rotations reached by the pixels of an image.
#[derive(Debug)]
pub struct ForestRegressor {
    ensemble: TreeEnsemble,
}

impl ForestRegressor {
    /// Wraps trained rotation-regression trees.
    pub fn new(trees: Vec<Tree>, device: DeviceContext) -> Result<Self> {
        Ok(ForestRegressor {
            ensemble: TreeEnsemble::new(trees, device, TaskKind::RotationRegression)?,
        })
    }

    /// Trees in the forest.
    pub fn trees(&self) -> &[Tree] {
        self.ensemble.trees()
    }

    /// Leaf id of every pixel in tree `tree_id` (`-1` where masked out).
    pub fn predict_leaves(
        &mut self,
        tree_id: u32,
        image: &Image,
        mask: Option<&[u8]>,
    ) -> Result<Array2<i32>> {
        let position = self.ensemble.position(tree_id)?;
        self.ensemble.leaves_at(position, image, mask)
    }

    /// Euler angles `[x, y, z]` of the proper rotation closest to the mean of
    /// the leaf rotations reached by every unmasked pixel in every tree.
    pub fn predict_rotation(&mut self, image: &Image, mask: Option<&[u8]>) -> Result<[f64; 3]> {
        let mut sum: Matrix3 = [[0.0; 3]; 3];
        let mut votes = 0usize;

        for position in 0..self.ensemble.len() {
            let leaves = self.ensemble.leaves_at(position, image, mask)?;
            let tree = &self.ensemble.trees()[position];
            for leaf in leaves.iter().filter(|l| **l >= 0) {
                let angles = tree.node(*leaf as usize).output();
                let rotation =
                    rotation_from_euler([angles[0] as f64, angles[1] as f64, angles[2] as f64]);
                for (row, r) in sum.iter_mut().zip(rotation.iter()) {
                    for (acc, v) in row.iter_mut().zip(r) {
                        *acc += v;
                    }
                }
                votes += 1;
            }
        }

        if votes == 0 {
            return Err(ForestError::prediction("no unmasked pixel reached a leaf"));
        }
        log::trace!("rotation averaged over {} leaf votes", votes);
        Ok(euler_from_rotation(&closest_rotation(&sum)))
    }
}
