//! The binary merge tree built by agglomerative clustering, and the cuts taken from it.

use crate::data_wrappers::{Merge, TreeNode};
use crate::union_find::UnionFind;
use std::collections::HashMap;

/// Records merges and answers grouping queries over them.
///
/// Two id spaces are involved. Active indices `0..leaf_count` are what the clustering loop
/// merges; the survivor of a merge keeps the smaller index. Tree node ids follow single linkage
/// tree numbering: leaves are `0..leaf_count` and the t-th merge creates node `leaf_count + t`.
pub trait Dendrogram {
    fn leaf_count(&self) -> usize;

    fn merges(&self) -> &[Merge];

    /// Joins the clusters at active indices `left` and `right`, returning the surviving index,
    /// `min(left, right)`.
    ///
    /// # Panics
    /// Implementations may panic when `left == right` or either index is not active, including
    /// indices past the leaf count. `MergeTree` does.
    fn merge_nodes(&mut self, left: usize, right: usize, distance: f64) -> usize;

    /// Tree node currently addressed by an active index, `None` once the index is retired.
    fn active_node(&self, index: usize) -> Option<usize>;

    fn left_child(&self, node: usize) -> Option<usize>;

    fn right_child(&self, node: usize) -> Option<usize>;

    /// Number of leaves below `node`.
    fn node_size(&self, node: usize) -> usize;

    /// Merge distance of `node`, zero for leaves.
    fn node_distance(&self, node: usize) -> f64;

    /// Partitions the leaves into `n_clusters` groups by undoing the last merges. Each group is
    /// sorted ascending and groups are ordered by their smallest member.
    fn generate_cluster_groupings(&self, n_clusters: usize) -> Vec<Vec<usize>>;

    /// Number of clusters left after merging while every merge keeps coherence above
    /// `threshold`.
    fn clusters_with_coherence_exceeding(&self, threshold: f64) -> usize;

    fn coherence_threshold(&self) -> Option<f64>;

    fn set_coherence_threshold(&mut self, threshold: f64);

    /// Leaves in display order.
    fn leaf_order(&self) -> Vec<usize>;

    fn set_leaf_order(&mut self, order: Vec<usize>);

    fn merge_count(&self) -> usize {
        self.merges().len()
    }

    fn is_finished(&self) -> bool {
        self.merge_count() + 1 >= self.leaf_count()
    }
}

/// Vector backed dendrogram.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeTree {
    n_samples: usize,
    merges: Vec<Merge>,
    nodes: Vec<TreeNode>,
    active: Vec<Option<usize>>,
    coherence_threshold: Option<f64>,
    leaf_order: Option<Vec<usize>>,
}

impl MergeTree {
    pub fn new(n_samples: usize) -> Self {
        MergeTree {
            n_samples,
            merges: Vec::with_capacity(n_samples.saturating_sub(1)),
            nodes: Vec::with_capacity(n_samples.saturating_sub(1)),
            active: (0..n_samples).map(Some).collect(),
            coherence_threshold: None,
            leaf_order: None,
        }
    }

    /// The top node of a finished tree.
    pub fn root(&self) -> Option<usize> {
        if self.n_samples > 0 && self.is_finished() {
            self.active[0]
        } else {
            None
        }
    }

    fn is_leaf(&self, node: usize) -> bool {
        node < self.n_samples
    }

    fn tree_node(&self, node: usize) -> Option<&TreeNode> {
        if self.is_leaf(node) {
            None
        } else {
            self.nodes.get(node - self.n_samples)
        }
    }

    fn leaves_under(&self, node: usize, leaves: &mut Vec<usize>) {
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            match self.tree_node(current) {
                Some(tree_node) => {
                    stack.push(tree_node.right_child);
                    stack.push(tree_node.left_child);
                }
                None => leaves.push(current),
            }
        }
    }
}

impl Dendrogram for MergeTree {
    fn leaf_count(&self) -> usize {
        self.n_samples
    }

    fn merges(&self) -> &[Merge] {
        &self.merges
    }

    fn merge_nodes(&mut self, left: usize, right: usize, distance: f64) -> usize {
        let nodes = (self.active_node(left), self.active_node(right));
        let (left_node, right_node) = match nodes {
            (Some(l), Some(r)) if left != right => (l, r),
            _ => panic!("Cannot merge indices {left} and {right}: both must be distinct and active"),
        };
        let left_size = self.node_size(left_node);
        let right_size = self.node_size(right_node);
        let merge_id = left.min(right);

        self.nodes.push(TreeNode {
            left_child: left_node,
            right_child: right_node,
            distance,
            size: left_size + right_size,
        });
        self.merges.push(Merge { left, right, merge_id, distance, left_size, right_size });
        self.active[merge_id] = Some(self.n_samples + self.nodes.len() - 1);
        self.active[left.max(right)] = None;
        merge_id
    }

    fn active_node(&self, index: usize) -> Option<usize> {
        self.active.get(index).copied().flatten()
    }

    fn left_child(&self, node: usize) -> Option<usize> {
        self.tree_node(node).map(|n| n.left_child)
    }

    fn right_child(&self, node: usize) -> Option<usize> {
        self.tree_node(node).map(|n| n.right_child)
    }

    fn node_size(&self, node: usize) -> usize {
        self.tree_node(node).map_or(1, |n| n.size)
    }

    fn node_distance(&self, node: usize) -> f64 {
        self.tree_node(node).map_or(0.0, |n| n.distance)
    }

    fn generate_cluster_groupings(&self, n_clusters: usize) -> Vec<Vec<usize>> {
        if self.n_samples == 0 {
            return Vec::new();
        }
        let n_clusters = n_clusters.clamp(1, self.n_samples);
        let n_replayed = (self.n_samples - n_clusters).min(self.nodes.len());

        let mut union_find = UnionFind::new(self.n_samples);
        for node in &self.nodes[..n_replayed] {
            union_find.union(node.left_child, node.right_child);
        }

        let mut group_of_root: HashMap<usize, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for leaf in 0..self.n_samples {
            let root = union_find.find(leaf);
            let group = *group_of_root.entry(root).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push(leaf);
        }
        groups
    }

    fn clusters_with_coherence_exceeding(&self, threshold: f64) -> usize {
        let coherent_merges = self
            .nodes
            .iter()
            .take_while(|node| 1.0 - node.distance > threshold)
            .count();
        self.n_samples - coherent_merges
    }

    fn coherence_threshold(&self) -> Option<f64> {
        self.coherence_threshold
    }

    fn set_coherence_threshold(&mut self, threshold: f64) {
        self.coherence_threshold = Some(threshold);
    }

    fn leaf_order(&self) -> Vec<usize> {
        if let Some(order) = &self.leaf_order {
            return order.clone();
        }
        let mut order = Vec::with_capacity(self.n_samples);
        for node in self.active.iter().flatten() {
            self.leaves_under(*node, &mut order);
        }
        order
    }

    fn set_leaf_order(&mut self, order: Vec<usize>) {
        self.leaf_order = Some(order);
    }
}
