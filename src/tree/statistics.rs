//! Per-node sample counters maintained while a tree grows.

use crate::core::types::{NodeIndex, SampleCount};
use crate::dataset::TrainingSet;

/// Sample totals per node, plus per-class totals for classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatistics {
    n_classes: usize,
    totals: Vec<SampleCount>,
    per_class: Vec<SampleCount>,
}

impl NodeStatistics {
    /// Zeroed counters for `n_nodes` nodes.
    pub fn new(n_nodes: usize, n_classes: usize) -> Self {
        NodeStatistics {
            n_classes,
            totals: vec![0; n_nodes],
            per_class: vec![0; n_nodes * n_classes],
        }
    }

    /// Counters with the root seeded from every sampled pixel of `set`.
    pub fn for_training_set(n_nodes: usize, set: &TrainingSet) -> Self {
        let mut stats = Self::new(n_nodes, set.n_classes());
        if stats.n_classes == 0 {
            stats.totals[0] = set.total_samples() as SampleCount;
            return stats;
        }
        let mut root = vec![0; stats.n_classes];
        for image in set.images() {
            for pixel in image.samples() {
                if let Some(class) = image.class_of(*pixel) {
                    root[class] += 1;
                }
            }
        }
        stats.set_class_counts(0, &root);
        stats
    }

    /// Number of classes tracked (0 for regression).
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Samples that reached `node`.
    #[inline]
    pub fn total(&self, node: NodeIndex) -> SampleCount {
        self.totals[node]
    }

    /// Sets the sample total of `node`.
    pub fn set_total(&mut self, node: NodeIndex, total: SampleCount) {
        self.totals[node] = total;
    }

    /// Per-class sample counts of `node`.
    #[inline]
    pub fn class_counts(&self, node: NodeIndex) -> &[SampleCount] {
        &self.per_class[node * self.n_classes..(node + 1) * self.n_classes]
    }

    /// Sets the per-class counts of `node`; its total becomes their sum.
    pub fn set_class_counts(&mut self, node: NodeIndex, counts: &[SampleCount]) {
        let n = self.n_classes;
        self.per_class[node * n..(node + 1) * n].copy_from_slice(counts);
        self.totals[node] = counts.iter().sum();
    }

    /// All node totals.
    pub fn totals(&self) -> &[SampleCount] {
        &self.totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_counts_set_total() {
        let mut stats = NodeStatistics::new(3, 2);
        stats.set_class_counts(1, &[4, 6]);
        assert_eq!(stats.total(1), 10);
        assert_eq!(stats.class_counts(1), &[4, 6]);
        assert_eq!(stats.class_counts(2), &[0, 0]);
    }

    #[test]
    fn test_regression_counters_have_no_classes() {
        let mut stats = NodeStatistics::new(3, 0);
        stats.set_total(0, 12);
        assert_eq!(stats.totals(), &[12, 0, 0]);
        assert!(stats.class_counts(0).is_empty());
    }
}
