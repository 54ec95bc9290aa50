//! Frontier selection and histogram slicing.
//!
//! Training depth `d` grows tree level `d - 1`: the frontier at depth 1 is the
//! root, at depth `d > 1` it holds the leaves of level `d - 1` that still have
//! more samples than the leaf threshold. Frontiers larger than the histogram
//! capacity are processed in contiguous slices.

use crate::core::error::{ForestError, Result};
use crate::core::types::{level_end, level_start, NodeIndex, NODE_LEAF, NODE_UNINITIALIZED};
use crate::tree::statistics::NodeStatistics;
use crate::tree::tree::Tree;

/// Nodes eligible for splitting at one depth, in ascending id order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frontier {
    depth: usize,
    nodes: Vec<NodeIndex>,
}

impl Frontier {
    /// Computes the frontier of `tree` for training depth `depth`.
    pub fn init(
        tree: &Tree,
        depth: usize,
        stats: &NodeStatistics,
        per_leaf_samples_thr: f32,
    ) -> Result<Self> {
        if depth == 0 || depth >= tree.depth() {
            return Err(ForestError::training(format!(
                "depth {} cannot be grown in a tree of depth {}",
                depth,
                tree.depth()
            )));
        }
        if depth == 1 {
            if tree.left_child(0) == NODE_UNINITIALIZED {
                return Err(ForestError::training("root node has not been initialised"));
            }
            return Ok(Frontier {
                depth,
                nodes: vec![0],
            });
        }

        let level = depth - 1;
        let nodes = (level_start(level)..=level_end(level))
            .filter(|n| {
                tree.left_child(*n) == NODE_LEAF && stats.total(*n) as f32 > per_leaf_samples_thr
            })
            .collect();
        Ok(Frontier { depth, nodes })
    }

    /// Training depth the frontier belongs to.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Frontier node ids.
    pub fn nodes(&self) -> &[NodeIndex] {
        &self.nodes
    }

    /// Number of frontier nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node can be split.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of slices needed for `capacity` histogram slots.
    pub fn num_slices(&self, capacity: usize) -> usize {
        num_slices(self.nodes.len(), capacity)
    }

    /// Splits the frontier into slices of at most `capacity` nodes.
    pub fn slices(&self, capacity: usize) -> Vec<FrontierSlice> {
        self.nodes
            .chunks(capacity.max(1))
            .enumerate()
            .map(|(index, nodes)| FrontierSlice::new(index, nodes))
            .collect()
    }
}

/// `ceil(frontier_size / capacity)`.
pub fn num_slices(frontier_size: usize, capacity: usize) -> usize {
    if capacity == 0 {
        return 0;
    }
    frontier_size.div_ceil(capacity)
}

/// Largest frontier a tree trained to `end_depth` can produce.
pub fn max_frontier_size(end_depth: usize) -> usize {
    if end_depth > 2 {
        1 << (end_depth - 2)
    } else {
        1
    }
}

/// Contiguous run of frontier nodes sharing the global histogram slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierSlice {
    index: usize,
    nodes: Vec<NodeIndex>,
    start_node: NodeIndex,
    end_node: NodeIndex,
    slot_map: Vec<i32>,
}

impl FrontierSlice {
    /// Builds slice `index` over `nodes` (ascending, non-empty).
    pub fn new(index: usize, nodes: &[NodeIndex]) -> Self {
        let start_node = nodes.first().copied().unwrap_or(0);
        let end_node = nodes.last().copied().unwrap_or(0);
        let mut slot_map = vec![-1; end_node - start_node + 1];
        for (slot, node) in nodes.iter().enumerate() {
            slot_map[node - start_node] = slot as i32;
        }
        FrontierSlice {
            index,
            nodes: nodes.to_vec(),
            start_node,
            end_node,
            slot_map,
        }
    }

    /// Position of the slice in its frontier.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Nodes of the slice; node `k` owns histogram slot `k`.
    pub fn nodes(&self) -> &[NodeIndex] {
        &self.nodes
    }

    /// Number of slots used.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the slice is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First node id of the slice.
    pub fn start_node(&self) -> NodeIndex {
        self.start_node
    }

    /// Last node id of the slice.
    pub fn end_node(&self) -> NodeIndex {
        self.end_node
    }

    /// Whether `node` lies in `[start_node, end_node]`.
    #[inline]
    pub fn contains(&self, node: NodeIndex) -> bool {
        node >= self.start_node && node <= self.end_node
    }

    /// Histogram slot of `node`, if it belongs to the slice.
    #[inline]
    pub fn slot(&self, node: NodeIndex) -> Option<usize> {
        if !self.contains(node) {
            return None;
        }
        let slot = self.slot_map[node - self.start_node];
        (slot >= 0).then_some(slot as usize)
    }
}

/// Number of per-node global histograms that fit the memory budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramCapacity {
    /// Slots allocated for one slice.
    pub slots: usize,
    /// Bytes of one node histogram.
    pub per_node_bytes: u64,
    /// Largest frontier the training run can produce.
    pub max_frontier: usize,
}

impl HistogramCapacity {
    /// `min(max_frontier_size(end_depth), budget / per_node_bytes)`.
    pub fn compute(end_depth: usize, per_node_bytes: u64, budget: u64) -> Result<Self> {
        let max_frontier = max_frontier_size(end_depth);
        let fit = budget.checked_div(per_node_bytes).unwrap_or(0);
        let slots = (max_frontier as u64).min(fit) as usize;
        if slots == 0 {
            return Err(ForestError::memory(format!(
                "one node histogram needs {} bytes but the budget is {} bytes",
                per_node_bytes, budget
            )));
        }
        Ok(HistogramCapacity {
            slots,
            per_node_bytes,
            max_frontier,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grown_tree() -> (Tree, NodeStatistics) {
        let mut tree = Tree::classification(0, 4, 1, 1).unwrap();
        let mut stats = NodeStatistics::new(tree.num_nodes(), 1);
        tree.set_leaf(0, &[1.0]).unwrap();
        stats.set_class_counts(0, &[10]);
        tree.split(0, &[0.0], 0.0, &[1.0], &[1.0]).unwrap();
        stats.set_class_counts(1, &[9]);
        stats.set_class_counts(2, &[1]);
        tree.split(1, &[0.0], 0.0, &[1.0], &[1.0]).unwrap();
        stats.set_class_counts(3, &[5]);
        stats.set_class_counts(4, &[4]);
        (tree, stats)
    }

    #[test]
    fn test_depth_one_is_root_regardless_of_counts() {
        let (tree, _) = grown_tree();
        let empty = NodeStatistics::new(tree.num_nodes(), 1);
        let frontier = Frontier::init(&tree, 1, &empty, 100.0).unwrap();
        assert_eq!(frontier.nodes(), &[0]);
    }

    #[test]
    fn test_frontier_filters_by_threshold_and_leafness() {
        let (tree, stats) = grown_tree();
        // Level 1: node 1 is split, node 2 has a single sample.
        assert!(Frontier::init(&tree, 2, &stats, 1.0).unwrap().is_empty());
        // Level 2: nodes 3 and 4 are leaves, 5 and 6 were never reached.
        let frontier = Frontier::init(&tree, 3, &stats, 4.0).unwrap();
        assert_eq!(frontier.nodes(), &[3]);
        let frontier = Frontier::init(&tree, 3, &stats, 1.0).unwrap();
        assert_eq!(frontier.nodes(), &[3, 4]);
    }

    #[test]
    fn test_depth_must_leave_room_for_children() {
        let (tree, stats) = grown_tree();
        assert!(Frontier::init(&tree, 4, &stats, 0.0).is_err());
        assert!(Frontier::init(&tree, 0, &stats, 0.0).is_err());
    }

    #[test]
    fn test_slices_are_contiguous_with_dense_slots() {
        let frontier = Frontier {
            depth: 4,
            nodes: vec![7, 9, 10, 14],
        };
        assert_eq!(frontier.num_slices(3), 2);
        let slices = frontier.slices(3);
        assert_eq!(slices[0].start_node(), 7);
        assert_eq!(slices[0].end_node(), 10);
        assert_eq!(slices[0].slot(7), Some(0));
        assert_eq!(slices[0].slot(8), None);
        assert_eq!(slices[0].slot(10), Some(2));
        assert_eq!(slices[0].slot(14), None);
        assert_eq!(slices[1].slot(14), Some(0));
    }

    #[test]
    fn test_capacity() {
        assert_eq!(max_frontier_size(1), 1);
        assert_eq!(max_frontier_size(2), 1);
        assert_eq!(max_frontier_size(5), 8);
        let capacity = HistogramCapacity::compute(5, 100, 350).unwrap();
        assert_eq!(capacity.slots, 3);
        let capacity = HistogramCapacity::compute(5, 100, 1 << 20).unwrap();
        assert_eq!(capacity.slots, 8);
        assert!(HistogramCapacity::compute(5, 100, 99).is_err());
        assert_eq!(num_slices(9, 4), 3);
    }
}
