//! Reorders the leaves of a finished dendrogram so adjacent leaves are close together.

use crate::dendrogram::Dendrogram;
use crate::similarity::{SimilarityProvider, SimilarityScale};
use crate::task::TaskControl;
use crate::{ClusterError, Result};
use std::collections::VecDeque;

/// Greedy bottom-up orientation of every merge.
///
/// Merges are replayed in order, each cluster keeping an ordered run of leaves. When two runs
/// are joined, each may be reversed; of the four arrangements the one whose touching leaves are
/// closest wins, earlier arrangements winning ties. Returns every leaf exactly once.
pub(crate) fn minimize_interleaf_distances<S, D>(
    dendrogram: &D,
    similarities: &S,
    scale: SimilarityScale,
    control: &dyn TaskControl,
    on_progress: &dyn Fn(usize, usize),
) -> Result<Vec<usize>>
where
    S: SimilarityProvider + ?Sized,
    D: Dendrogram + ?Sized,
{
    let n = dendrogram.leaf_count();
    let n_merges = dendrogram.merge_count();
    let mut runs: Vec<Option<VecDeque<usize>>> = (0..n)
        .map(|leaf| Some(VecDeque::from([leaf])))
        .chain((0..n_merges).map(|_| None))
        .collect();
    let distance = |a: usize, b: usize| scale.distance(similarities.similarity(a, b));

    for t in 0..n_merges {
        if control.is_cancelled() {
            return Err(ClusterError::Cancelled);
        }
        let node = n + t;
        let (left, right) = match (dendrogram.left_child(node), dendrogram.right_child(node)) {
            (Some(left), Some(right)) => (left, right),
            _ => return Err(ClusterError::precondition(format!("Node {node} has no children"))),
        };
        let (mut a, mut b) = match (runs[left].take(), runs[right].take()) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(ClusterError::precondition(format!(
                    "Node {node} joins a cluster that was already merged"
                )))
            }
        };
        let ends = |run: &VecDeque<usize>| (run[0], run[run.len() - 1]);
        let ((a_first, a_last), (b_first, b_last)) = (ends(&a), ends(&b));

        // (reverse a, reverse b) for each arrangement
        let arrangements = [
            (false, false, distance(a_last, b_first)),
            (false, true, distance(a_last, b_last)),
            (true, false, distance(a_first, b_first)),
            (true, true, distance(a_first, b_last)),
        ];
        let mut best = arrangements[0];
        for arrangement in &arrangements[1..] {
            if arrangement.2 < best.2 {
                best = *arrangement;
            }
        }
        if best.0 {
            a.make_contiguous().reverse();
        }
        if best.1 {
            b.make_contiguous().reverse();
        }
        a.append(&mut b);
        runs[node] = Some(a);
        on_progress(t + 1, n_merges);
    }

    let mut order = Vec::with_capacity(n);
    for index in 0..n {
        if let Some(root) = dendrogram.active_node(index) {
            if let Some(run) = runs[root].take() {
                order.extend(run);
            }
        }
    }
    Ok(order)
}
