//! Per-pixel class posteriors.

use crate::core::error::Result;
use crate::core::types::TaskKind;
use crate::dataset::Image;
use crate::device::DeviceContext;
use crate::prediction::TreeEnsemble;
use crate::tree::Tree;
use ndarray::{Array2, Array3};

/// Averages the leaf posteriors of a set of classification trees.
#[derive(Debug)]
pub struct ForestClassifier {
    ensemble: TreeEnsemble,
}

impl ForestClassifier {
    /// Wraps trained classification trees.
    pub fn new(trees: Vec<Tree>, device: DeviceContext) -> Result<Self> {
        Ok(ForestClassifier {
            ensemble: TreeEnsemble::new(trees, device, TaskKind::Classification)?,
        })
    }

    /// Number of classes of the leaf posteriors.
    pub fn n_classes(&self) -> usize {
        self.ensemble.output_dim()
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

    /// `[height, width, n_classes]` posterior averaged over all trees.
    /// Masked-out pixels stay zero.
    pub fn predict_posterior(&mut self, image: &Image, mask: Option<&[u8]>) -> Result<Array3<f32>> {
        let n_classes = self.n_classes();
        let mut posterior = Array3::<f32>::zeros((image.height(), image.width(), n_classes));

        for position in 0..self.ensemble.len() {
            let leaves = self.ensemble.leaves_at(position, image, mask)?;
            let tree = &self.ensemble.trees()[position];
            for ((y, x), leaf) in leaves.indexed_iter() {
                if *leaf < 0 {
                    continue;
                }
                let output = tree.node(*leaf as usize).output();
                for (c, p) in output.iter().enumerate() {
                    posterior[[y, x, c]] += *p;
                }
            }
        }
        posterior.mapv_inplace(|p| p / self.ensemble.len() as f32);
        Ok(posterior)
    }

    /// Most probable class per pixel, `None` where masked out.
    pub fn predict_labels(&mut self, image: &Image, mask: Option<&[u8]>) -> Result<Array2<Option<usize>>> {
        let posterior = self.predict_posterior(image, mask)?;
        let labels = Array2::from_shape_fn((image.height(), image.width()), |(y, x)| {
            let pixel = posterior.slice(ndarray::s![y, x, ..]);
            if pixel.iter().all(|p| *p == 0.0) {
                return None;
            }
            pixel
                .iter()
                .enumerate()
                .fold(None, |best: Option<(usize, f32)>, (c, p)| match best {
                    Some((_, bp)) if bp >= *p => best,
                    _ => Some((c, *p)),
                })
                .map(|(c, _)| c)
        });
        Ok(labels)
    }
}
