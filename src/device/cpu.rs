//! Thread-pool backend running the kernels on the host CPU with rayon.

use crate::config::{DeviceConfig, TrainerParams};
use crate::core::error::{DeviceError, ForestError, Result};
use crate::core::types::NodeIndex;
use crate::device::features::FeatureExtractor;
use crate::device::kernels::{
    BestPair, ImageView, KernelBackend, LearnArgs, LocalHistogramArgs, TreeView,
};
use crate::tree::sampling::NodeCandidates;
use crate::tree::split::entropy::weighted_entropy;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// Candidate tables are regenerated once per node and run.
type CandidateCache = HashMap<(u32, NodeIndex), Arc<NodeCandidates>>;

/// CPU implementation of [`KernelBackend`].
pub struct CpuBackend<F: FeatureExtractor> {
    extractor: F,
    pool: OnceLock<rayon::ThreadPool>,
    candidates: RwLock<CandidateCache>,
}

impl<F: FeatureExtractor> CpuBackend<F> {
    /// Creates an unbuilt backend around `extractor`.
    pub fn new(extractor: F) -> Self {
        CpuBackend {
            extractor,
            pool: OnceLock::new(),
            candidates: RwLock::new(HashMap::new()),
        }
    }

    /// Feature extractor used by every kernel.
    pub fn extractor(&self) -> &F {
        &self.extractor
    }

    fn pool(&self, kernel: &str) -> Result<&rayon::ThreadPool> {
        self.pool
            .get()
            .ok_or_else(|| ForestError::kernel_execution(kernel, "backend has not been built"))
    }

    fn node_candidates(
        &self,
        tree_id: u32,
        node: NodeIndex,
        params: &TrainerParams,
    ) -> Result<Arc<NodeCandidates>> {
        if let Some(found) = self.candidates.read()?.get(&(tree_id, node)) {
            return Ok(Arc::clone(found));
        }
        let generated = Arc::new(NodeCandidates::generate(
            tree_id,
            node,
            self.extractor.feat_dim(),
            params,
        ));
        let mut cache = self.candidates.write()?;
        Ok(Arc::clone(cache.entry((tree_id, node)).or_insert(generated)))
    }
}

impl<F: FeatureExtractor> KernelBackend for CpuBackend<F> {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn feat_dim(&self) -> usize {
        self.extractor.feat_dim()
    }

    fn build(&self, config: &DeviceConfig) -> Result<String> {
        let threads = config.effective_threads();
        let mut build_log = format!(
            "feature extractor '{}' (dim {}), {} worker threads, tile {}x{}",
            self.extractor.name(),
            self.extractor.feat_dim(),
            threads,
            config.tile_width,
            config.tile_height
        );
        if let Err(message) = self.extractor.check() {
            build_log.push_str("\nerror: ");
            build_log.push_str(&message);
            return Err(DeviceError::KernelBuild {
                kernel: "compute_local_histogram".to_string(),
                log: build_log,
            }
            .into());
        }

        if self.pool.get().is_none() {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("rforest-kernel-{}", i))
                .build()
                .map_err(|e| ForestError::kernel_build("thread pool", e.to_string()))?;
            // A concurrent build may have won; either pool is equivalent.
            let _ = self.pool.set(pool);
        }
        Ok(build_log)
    }

    fn predict(
        &self,
        image: &ImageView<'_>,
        mask: &[u8],
        tree: &TreeView<'_>,
        node_in: &[i32],
        node_out: &mut [i32],
    ) -> Result<()> {
        let pool = self.pool("predict")?;
        let stride = image.stride();
        if node_in.len() != node_out.len() || mask.len() < node_out.len() {
            return Err(ForestError::kernel_execution(
                "predict",
                "node and mask buffers differ in size",
            ));
        }
        pool.install(|| {
            node_out
                .par_chunks_mut(stride.max(1))
                .enumerate()
                .for_each(|(y, row)| {
                    for (x, out) in row.iter_mut().enumerate() {
                        let p = y * stride + x;
                        if y >= image.height() || x >= image.width() || mask[p] == 0 {
                            *out = -1;
                            continue;
                        }
                        let node = node_in[p];
                        *out = if node >= 0 && tree.left_children[node as usize] >= 0 {
                            let node = node as usize;
                            let left = tree.left_children[node];
                            let response =
                                self.extractor.response(image, x, y, tree.feature(node));
                            if response < tree.thresholds[node] {
                                left
                            } else {
                                left + 1
                            }
                        } else {
                            node
                        };
                    }
                });
        });
        Ok(())
    }

    fn compute_local_histogram(&self, args: &LocalHistogramArgs<'_>, out: &mut [u8]) -> Result<()> {
        let pool = self.pool("compute_local_histogram")?;
        let params = args.params;
        let row_bytes = params.local_histogram_bytes();
        let n_thresholds = params.n_thresholds;
        let needed = args.samples.len() * row_bytes;
        if out.len() < needed {
            return Err(DeviceError::BufferOverflow {
                what: "local histogram".to_string(),
                requested: needed,
                capacity: out.len(),
            }
            .into());
        }

        pool.install(|| {
            out[..needed]
                .par_chunks_mut(row_bytes.max(1))
                .zip(args.samples.par_iter())
                .try_for_each(|(bits, sample)| -> Result<()> {
                    bits.fill(0);
                    let (x, y, p) = args.image.device_offset(*sample);
                    let node = args.node_ids[p];
                    if node < 0 {
                        return Ok(());
                    }
                    let node = node as usize;
                    if node < args.start_node
                        || node > args.end_node
                        || args.tree.left_children[node] != -1
                    {
                        return Ok(());
                    }
                    let candidates = self.node_candidates(args.tree_id, node, params)?;
                    for f in 0..params.n_features {
                        let response = self.extractor.response(&args.image, x, y, candidates.feature(f));
                        for (t, threshold) in candidates.thresholds(f).iter().enumerate() {
                            if response < *threshold {
                                let bit = f * n_thresholds + t;
                                bits[bit >> 3] |= 1 << (bit & 7);
                            }
                        }
                    }
                    Ok(())
                })
        })
    }

    fn learn_best_feature(&self, args: &LearnArgs<'_>, out: &mut [BestPair]) -> Result<()> {
        let pool = self.pool("learn_best_feature")?;
        let node_len = args.node_len();
        let pairs = args.n_features * args.n_thresholds;
        let pair_stride = pairs;
        if args.histograms.len() < args.n_nodes * node_len
            || args.class_totals.len() < args.n_nodes * args.n_classes
            || out.len() < args.n_nodes
        {
            return Err(ForestError::kernel_execution(
                "learn_best_feature",
                "buffers are smaller than the node batch",
            ));
        }
        let chunk = args.per_thread_pairs.max(1);

        pool.install(|| {
            out[..args.n_nodes]
                .par_iter_mut()
                .enumerate()
                .for_each(|(node, best)| {
                    let histogram = &args.histograms[node * node_len..(node + 1) * node_len];
                    let totals =
                        &args.class_totals[node * args.n_classes..(node + 1) * args.n_classes];

                    let winner = (0..pairs.div_ceil(chunk))
                        .into_par_iter()
                        .map(|worker| {
                            let mut left = vec![0u64; args.n_classes];
                            let mut right = vec![0u64; args.n_classes];
                            let mut local = (f64::INFINITY, usize::MAX);
                            for pair in worker * chunk..((worker + 1) * chunk).min(pairs) {
                                for c in 0..args.n_classes {
                                    left[c] = u64::from(histogram[c * pair_stride + pair]);
                                    right[c] = totals[c].saturating_sub(left[c]);
                                }
                                let entropy = weighted_entropy(&left, &right);
                                if entropy < local.0 {
                                    local = (entropy, pair);
                                }
                            }
                            local
                        })
                        .reduce(
                            || (f64::INFINITY, usize::MAX),
                            |a, b| {
                                if b.0 < a.0 || (b.0 == a.0 && b.1 < a.1) {
                                    b
                                } else {
                                    a
                                }
                            },
                        );

                    let pair = if winner.1 == usize::MAX { 0 } else { winner.1 };
                    *best = BestPair {
                        feature: (pair / args.n_thresholds.max(1)) as u32,
                        threshold: (pair % args.n_thresholds.max(1)) as u32,
                        entropy: winner.0 as f32,
                    };
                });
        });
        Ok(())
    }

    fn reset(&self) {
        match self.candidates.write() {
            Ok(mut cache) => cache.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::features::PixelProbeFeature;

    fn built() -> CpuBackend<PixelProbeFeature> {
        let backend = CpuBackend::new(PixelProbeFeature::new());
        backend.build(&DeviceConfig::new().with_num_threads(2)).unwrap();
        backend
    }

    #[test]
    fn test_unbuilt_backend_refuses_to_run() {
        let backend = CpuBackend::new(PixelProbeFeature::new());
        let args = LearnArgs {
            histograms: &[],
            class_totals: &[],
            n_nodes: 0,
            n_classes: 1,
            n_features: 1,
            n_thresholds: 1,
            per_thread_pairs: 1,
        };
        assert!(backend.learn_best_feature(&args, &mut []).is_err());
    }

    #[test]
    fn test_build_failure_carries_log() {
        let backend = CpuBackend::new(PixelProbeFeature::new().with_background(f32::INFINITY));
        match backend.build(&DeviceConfig::new()) {
            Err(ForestError::Device {
                source: DeviceError::KernelBuild { log, .. },
            }) => assert!(log.contains("background must be finite")),
            other => panic!("unexpected build result: {:?}", other),
        }
    }

    #[test]
    fn test_predict_moves_masked_pixels_one_level() {
        let backend = built();
        // 2x1 image, stride 2: pixel values 10 and 90.
        let pixels = [10.0, 90.0];
        let image = ImageView::new(&pixels, 2, 1, 2, 1);
        let tree = TreeView {
            left_children: &[1, -1, -1],
            features: &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            thresholds: &[50.0, 0.0, 0.0],
            outputs: &[0.0; 3],
            feat_dim: 2,
            output_dim: 1,
        };
        let mut out = [0i32; 2];
        backend
            .predict(&image, &[1, 1], &tree, &[0, 0], &mut out)
            .unwrap();
        assert_eq!(out, [1, 2]);
        backend
            .predict(&image, &[1, 0], &tree, &[0, 0], &mut out)
            .unwrap();
        assert_eq!(out, [1, -1]);
    }

    #[test]
    fn test_learn_prefers_pure_split_and_lowest_index_on_ties() {
        let backend = built();
        // One node, two classes, 1 feature x 3 thresholds.
        // Class 0 left counts: [5, 5, 0]; class 1 left counts: [5, 0, 5].
        let histograms = [5, 5, 0, 5, 0, 5];
        let totals = [5u64, 5];
        let args = LearnArgs {
            histograms: &histograms,
            class_totals: &totals,
            n_nodes: 1,
            n_classes: 2,
            n_features: 1,
            n_thresholds: 3,
            per_thread_pairs: 1,
        };
        let mut out = [BestPair::default()];
        backend.learn_best_feature(&args, &mut out).unwrap();
        assert_eq!(out[0].feature, 0);
        assert_eq!(out[0].threshold, 1);
        assert_eq!(out[0].entropy, 0.0);
    }
}
