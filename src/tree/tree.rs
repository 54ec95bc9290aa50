//! Dense binary tree stored as one arena of per-node attribute arrays.
//!
//! Node `i` has its children at `2*i+1` and `2*i+2`. Every node of the full
//! tree is allocated up front; `left_child` tells which ones are in use.

use crate::core::error::{ForestError, Result};
use crate::core::types::{
    nodes_for_depth, ChildLink, FeatureValue, NodeIndex, TaskKind, NODE_LEAF,
    NODE_UNINITIALIZED, ROTATION_OUTPUT_DIM,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Largest supported tree depth. Node ids must fit the 32-bit PRNG seed words.
pub const MAX_TREE_DEPTH: usize = 31;

/// Decision tree with all node attributes held in contiguous arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    id: u32,
    depth: usize,
    task: TaskKind,
    feat_dim: usize,
    output_dim: usize,
    left_children: Vec<ChildLink>,
    features: Vec<FeatureValue>,
    thresholds: Vec<FeatureValue>,
    outputs: Vec<f32>,
}

/// Read-only view of one node.
#[derive(Clone, Copy)]
pub struct NodeView<'a> {
    tree: &'a Tree,
    index: NodeIndex,
}

impl<'a> NodeView<'a> {
    /// Node id.
    pub fn index(&self) -> NodeIndex {
        self.index
    }

    /// Raw left-child link.
    pub fn link(&self) -> ChildLink {
        self.tree.left_children[self.index]
    }

    /// Whether the node has been reached.
    pub fn is_initialized(&self) -> bool {
        self.link() != NODE_UNINITIALIZED
    }

    /// Whether the node is a leaf.
    pub fn is_leaf(&self) -> bool {
        self.link() == NODE_LEAF
    }

    /// Whether the node has been split.
    pub fn is_split(&self) -> bool {
        self.link() >= 0
    }

    /// Left child id when split.
    pub fn left_child(&self) -> Option<NodeIndex> {
        let link = self.link();
        (link >= 0).then_some(link as NodeIndex)
    }

    /// Right child id when split.
    pub fn right_child(&self) -> Option<NodeIndex> {
        self.left_child().map(|left| left + 1)
    }

    /// Split feature vector.
    pub fn feature(&self) -> &'a [FeatureValue] {
        let dim = self.tree.feat_dim;
        &self.tree.features[self.index * dim..(self.index + 1) * dim]
    }

    /// Split threshold.
    pub fn threshold(&self) -> FeatureValue {
        self.tree.thresholds[self.index]
    }

    /// Class posterior or regression value.
    pub fn output(&self) -> &'a [f32] {
        let dim = self.tree.output_dim;
        &self.tree.outputs[self.index * dim..(self.index + 1) * dim]
    }
}

impl fmt::Debug for NodeView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeView")
            .field("index", &self.index)
            .field("link", &self.link())
            .field("threshold", &self.threshold())
            .finish()
    }
}

impl Tree {
    /// Allocates a full tree of `depth` levels with every node uninitialised.
    pub fn new(
        id: u32,
        depth: usize,
        task: TaskKind,
        feat_dim: usize,
        output_dim: usize,
    ) -> Result<Self> {
        if depth == 0 || depth > MAX_TREE_DEPTH {
            return Err(ForestError::invalid_parameter(
                "depth",
                depth.to_string(),
                format!("must be in 1..={}", MAX_TREE_DEPTH),
            ));
        }
        if feat_dim == 0 || output_dim == 0 {
            return Err(ForestError::tree_construction(
                "feature and output dimensions must be positive",
            ));
        }
        let n_nodes = nodes_for_depth(depth);
        Ok(Tree {
            id,
            depth,
            task,
            feat_dim,
            output_dim,
            left_children: vec![NODE_UNINITIALIZED; n_nodes],
            features: vec![0.0; n_nodes * feat_dim],
            thresholds: vec![0.0; n_nodes],
            outputs: vec![0.0; n_nodes * output_dim],
        })
    }

    /// Classification tree producing `n_classes` posteriors per node.
    pub fn classification(id: u32, depth: usize, feat_dim: usize, n_classes: usize) -> Result<Self> {
        Self::new(id, depth, TaskKind::Classification, feat_dim, n_classes)
    }

    /// Rotation-regression tree producing Euler angles per node.
    pub fn regression(id: u32, depth: usize, feat_dim: usize) -> Result<Self> {
        Self::new(id, depth, TaskKind::RotationRegression, feat_dim, ROTATION_OUTPUT_DIM)
    }

    /// Tree id, used as the first PRNG seed word.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Number of levels.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Task the outputs describe.
    pub fn task(&self) -> TaskKind {
        self.task
    }

    /// Feature vector length.
    pub fn feat_dim(&self) -> usize {
        self.feat_dim
    }

    /// Output vector length.
    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    /// Allocated node count (`2^depth - 1`).
    pub fn num_nodes(&self) -> usize {
        self.left_children.len()
    }

    /// View of node `index`.
    ///
    /// # Panics
    /// When `index >= num_nodes()`.
    pub fn node(&self, index: NodeIndex) -> NodeView<'_> {
        assert!(index < self.num_nodes(), "node {} out of range", index);
        NodeView { tree: self, index }
    }

    /// Checked variant of [`Tree::node`].
    pub fn get(&self, index: NodeIndex) -> Option<NodeView<'_>> {
        (index < self.num_nodes()).then_some(NodeView { tree: self, index })
    }

    /// Raw link of node `index`.
    #[inline]
    pub fn left_child(&self, index: NodeIndex) -> ChildLink {
        self.left_children[index]
    }

    /// All links.
    pub fn left_children(&self) -> &[ChildLink] {
        &self.left_children
    }

    /// All feature vectors, `feat_dim` values per node.
    pub fn features(&self) -> &[FeatureValue] {
        &self.features
    }

    /// All thresholds.
    pub fn thresholds(&self) -> &[FeatureValue] {
        &self.thresholds
    }

    /// All outputs, `output_dim` values per node.
    pub fn outputs(&self) -> &[f32] {
        &self.outputs
    }

    fn check_node(&self, index: NodeIndex) -> Result<()> {
        if index >= self.num_nodes() {
            return Err(ForestError::index_out_of_bounds(index, self.num_nodes()));
        }
        Ok(())
    }

    fn check_output(&self, output: &[f32]) -> Result<()> {
        if output.len() != self.output_dim {
            return Err(ForestError::dimension_mismatch(
                format!("output of length {}", self.output_dim),
                format!("{}", output.len()),
            ));
        }
        Ok(())
    }

    /// Returns every node to the uninitialised state.
    pub fn reset(&mut self) {
        self.left_children.fill(NODE_UNINITIALIZED);
        self.features.fill(0.0);
        self.thresholds.fill(0.0);
        self.outputs.fill(0.0);
    }

    /// Marks `index` as a reached leaf with the given output.
    pub fn set_leaf(&mut self, index: NodeIndex, output: &[f32]) -> Result<()> {
        self.check_node(index)?;
        self.check_output(output)?;
        self.left_children[index] = NODE_LEAF;
        let dim = self.output_dim;
        self.outputs[index * dim..(index + 1) * dim].copy_from_slice(output);
        Ok(())
    }

    /// Turns leaf `index` into an internal node.
    ///
    /// Both children become leaves with the given outputs and the node keeps
    /// `feature`/`threshold` as its split parameters.
    pub fn split(
        &mut self,
        index: NodeIndex,
        feature: &[FeatureValue],
        threshold: FeatureValue,
        left_output: &[f32],
        right_output: &[f32],
    ) -> Result<()> {
        self.check_node(index)?;
        let left = 2 * index + 1;
        if left + 1 >= self.num_nodes() {
            return Err(ForestError::tree_construction(format!(
                "node {} lies on the last level of a depth-{} tree",
                index, self.depth
            )));
        }
        if self.left_children[index] != NODE_LEAF {
            return Err(ForestError::tree_construction(format!(
                "node {} is not a leaf (link {})",
                index, self.left_children[index]
            )));
        }
        if feature.len() != self.feat_dim {
            return Err(ForestError::dimension_mismatch(
                format!("feature of length {}", self.feat_dim),
                format!("{}", feature.len()),
            ));
        }

        self.set_leaf(left, left_output)?;
        self.set_leaf(left + 1, right_output)?;

        let dim = self.feat_dim;
        self.features[index * dim..(index + 1) * dim].copy_from_slice(feature);
        self.thresholds[index] = threshold;
        self.left_children[index] = left as ChildLink;
        Ok(())
    }

    /// Follows splits from the root until a leaf, asking `response` for the
    /// feature response of each visited node. Samples go left when the
    /// response is below the threshold.
    pub fn descend<F>(&self, mut response: F) -> NodeIndex
    where
        F: FnMut(NodeIndex, &[FeatureValue]) -> f32,
    {
        let mut node = 0;
        while let Some(left) = self.node(node).left_child() {
            let view = self.node(node);
            node = if response(node, view.feature()) < view.threshold() {
                left
            } else {
                left + 1
            };
        }
        node
    }

    /// Node ids currently marked as leaves.
    pub fn leaves(&self) -> Vec<NodeIndex> {
        (0..self.num_nodes())
            .filter(|i| self.left_children[*i] == NODE_LEAF)
            .collect()
    }

    /// Number of split nodes.
    pub fn num_splits(&self) -> usize {
        self.left_children.iter().filter(|l| **l >= 0).count()
    }

    /// Checks the structural invariants of the arena.
    pub fn validate(&self) -> Result<()> {
        for (index, link) in self.left_children.iter().enumerate() {
            match *link {
                NODE_UNINITIALIZED | NODE_LEAF => {}
                l if l >= 0 => {
                    let left = l as NodeIndex;
                    if left != 2 * index + 1 || left + 1 >= self.num_nodes() {
                        return Err(ForestError::tree_construction(format!(
                            "node {} links to {} instead of {}",
                            index,
                            left,
                            2 * index + 1
                        )));
                    }
                    if self.left_children[left] == NODE_UNINITIALIZED
                        || self.left_children[left + 1] == NODE_UNINITIALIZED
                    {
                        return Err(ForestError::tree_construction(format!(
                            "split node {} has an uninitialised child",
                            index
                        )));
                    }
                }
                l => {
                    return Err(ForestError::tree_construction(format!(
                        "node {} has invalid link {}",
                        index, l
                    )))
                }
            }
            if index > 0 && *link != NODE_UNINITIALIZED {
                let parent = (index - 1) / 2;
                if self.left_children[parent] < 0 {
                    return Err(ForestError::tree_construction(format!(
                        "node {} is reachable but its parent {} is not split",
                        index, parent
                    )));
                }
            }
        }
        Ok(())
    }

    /// Serialises the tree to its key-value JSON document.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&TreeDocument::from_tree(self))?)
    }

    /// Parses a tree from its key-value JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: TreeDocument = serde_json::from_str(json)?;
        document.into_tree()
    }

    /// Writes the tree to `path` as JSON.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Reads a tree written by [`Tree::save_to_file`].
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let tree = Self::from_json(&json)?;
        tree.validate()?;
        Ok(tree)
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Tree {} ({}, depth {}, {} splits)",
            self.id,
            self.task,
            self.depth,
            self.num_splits()
        )?;
        for index in 0..self.num_nodes() {
            let node = self.node(index);
            if !node.is_initialized() {
                continue;
            }
            let level = (usize::BITS - (index + 1).leading_zeros() - 1) as usize;
            let indent = "  ".repeat(level);
            match node.left_child() {
                Some(left) => writeln!(
                    f,
                    "{}[{}] {:?} < {} -> {} | {}",
                    indent,
                    index,
                    node.feature(),
                    node.threshold(),
                    left,
                    left + 1
                )?,
                None => writeln!(f, "{}[{}] leaf {:?}", indent, index, node.output())?,
            }
        }
        Ok(())
    }
}

/// On-disk form: one entry per reached node, absent nodes are uninitialised.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TreeDocument {
    tree_id: u32,
    depth: usize,
    task: TaskKind,
    feat_dim: usize,
    output_dim: usize,
    nodes: BTreeMap<NodeIndex, NodeDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeDocument {
    left_child: ChildLink,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    split_parameters: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    histogram: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

fn join_values(values: &[f32]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_values(text: &str, expected: usize, what: &str, node: NodeIndex) -> Result<Vec<f32>> {
    let values = text
        .split_whitespace()
        .map(|v| v.parse::<f32>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ForestError::serialization(format!("node {} {}: {}", node, what, e)))?;
    if values.len() != expected {
        return Err(ForestError::serialization(format!(
            "node {} {} holds {} values, expected {}",
            node,
            what,
            values.len(),
            expected
        )));
    }
    Ok(values)
}

impl TreeDocument {
    fn from_tree(tree: &Tree) -> Self {
        let mut nodes = BTreeMap::new();
        for index in 0..tree.num_nodes() {
            let node = tree.node(index);
            if !node.is_initialized() {
                continue;
            }
            let split_parameters = node.is_split().then(|| {
                let mut params = node.feature().to_vec();
                params.push(node.threshold());
                join_values(&params)
            });
            let output = Some(join_values(node.output()));
            let (histogram, value) = match tree.task {
                TaskKind::Classification => (output, None),
                TaskKind::RotationRegression => (None, output),
            };
            nodes.insert(
                index,
                NodeDocument {
                    left_child: node.link(),
                    split_parameters,
                    histogram,
                    value,
                },
            );
        }
        TreeDocument {
            tree_id: tree.id,
            depth: tree.depth,
            task: tree.task,
            feat_dim: tree.feat_dim,
            output_dim: tree.output_dim,
            nodes,
        }
    }

    fn into_tree(self) -> Result<Tree> {
        let mut tree = Tree::new(
            self.tree_id,
            self.depth,
            self.task,
            self.feat_dim,
            self.output_dim,
        )?;
        for (index, node) in self.nodes {
            tree.check_node(index)?;
            tree.left_children[index] = node.left_child;

            let output = match (tree.task, node.histogram, node.value) {
                (TaskKind::Classification, Some(text), _) => Some(text),
                (TaskKind::RotationRegression, _, Some(text)) => Some(text),
                _ => None,
            };
            if let Some(text) = output {
                let values = parse_values(&text, tree.output_dim, "output", index)?;
                let dim = tree.output_dim;
                tree.outputs[index * dim..(index + 1) * dim].copy_from_slice(&values);
            }

            if let Some(text) = node.split_parameters {
                let values = parse_values(&text, tree.feat_dim + 1, "split parameters", index)?;
                let dim = tree.feat_dim;
                tree.features[index * dim..(index + 1) * dim].copy_from_slice(&values[..dim]);
                tree.thresholds[index] = values[dim];
            }
        }
        Ok(tree)
    }
}
