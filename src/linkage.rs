/// Possible linkage rules used to derive the distance between a freshly merged cluster and every
/// other cluster, from the distances of its two children.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Linkage {
    /// Nearest member distance.
    Single,
    /// Farthest member distance.
    Complete,
    /// Mean member distance, i.e. the children's distances weighted by their leaf counts.
    Mean,
}

/// Combines `(d_left, d_right, left_size, right_size)` into the merged distance.
pub(crate) type Combiner = fn(f64, f64, f64, f64) -> f64;

impl Linkage {
    /// Distance from the cluster made of `left` and `right` to a third cluster.
    ///
    /// # Parameters
    /// * `d_left` - distance from the left child to the third cluster
    /// * `d_right` - distance from the right child to the third cluster
    /// * `left_size` - leaf count of the left child before the merge
    /// * `right_size` - leaf count of the right child before the merge
    pub fn combine(&self, d_left: f64, d_right: f64, left_size: usize, right_size: usize) -> f64 {
        self.combiner()(d_left, d_right, left_size as f64, right_size as f64)
    }

    pub(crate) fn combiner(&self) -> Combiner {
        match self {
            Linkage::Single => single_linkage,
            Linkage::Complete => complete_linkage,
            Linkage::Mean => mean_linkage,
        }
    }
}

fn single_linkage(d_left: f64, d_right: f64, _: f64, _: f64) -> f64 {
    d_left.min(d_right)
}

fn complete_linkage(d_left: f64, d_right: f64, _: f64, _: f64) -> f64 {
    d_left.max(d_right)
}

fn mean_linkage(d_left: f64, d_right: f64, left_size: f64, right_size: f64) -> f64 {
    (d_left * left_size + d_right * right_size) / (left_size + right_size)
}
