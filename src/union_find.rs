/// Union find over the nodes of a merge tree: the leaves `0..n_samples`, then one fresh label per
/// union, handed out in order. Replaying a tree's merges therefore reproduces its node ids.
pub(crate) struct UnionFind {
    parent: Vec<usize>,
    next_label: usize,
}

impl UnionFind {
    pub(crate) fn new(n_samples: usize) -> Self {
        let length = (2 * n_samples).saturating_sub(1);
        let parent = (0..length).collect();
        UnionFind { parent, next_label: n_samples }
    }

    /// Joins two roots under the next label and returns that label.
    pub(crate) fn union(&mut self, m: usize, n: usize) -> usize {
        let label = self.next_label;
        self.parent[m] = label;
        self.parent[n] = label;
        self.next_label += 1;
        label
    }

    pub(crate) fn find(&mut self, mut n: usize) -> usize {
        while self.parent[n] != n {
            // Path halving
            self.parent[n] = self.parent[self.parent[n]];
            n = self.parent[n];
        }
        n
    }
}
