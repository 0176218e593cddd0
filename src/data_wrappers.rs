/// One agglomerative merge, as recorded by a dendrogram.
///
/// `left` and `right` are the active indices that were joined. The survivor keeps the smaller
/// of the two indices (`merge_id`), the other index is retired for the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub merge_id: usize,
    pub distance: f64,
    pub left_size: usize,
    pub right_size: usize,
}

impl Merge {
    /// The index retired by this merge.
    pub fn retired_id(&self) -> usize {
        self.left.max(self.right)
    }

    pub fn size(&self) -> usize {
        self.left_size + self.right_size
    }
}

/// The cached nearest neighbour of an active node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Neighbour {
    pub(crate) id: usize,
    pub(crate) distance: f64,
}

/// A node in a merge tree. Leaves are `0..n_samples`, the t-th merge creates `n_samples + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TreeNode {
    pub(crate) left_child: usize,
    pub(crate) right_child: usize,
    pub(crate) distance: f64,
    pub(crate) size: usize,
}
