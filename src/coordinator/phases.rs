//! Worker bodies for each phase. Every function handles one worker's share of the work.

use crate::data_wrappers::{Merge, Neighbour};
use crate::distance_store::{pair_at, DistanceStore};
use crate::linkage::Linkage;
use crate::nearest_neighbour::{offer, NeighbourTracker};
use crate::similarity::{SimilarityProvider, SimilarityScale};
use crate::task::TaskControl;
use crate::{ClusterError, Result};
use std::ops::Range;

/// Distances buffered before a single write to the store.
const WRITE_BATCH: usize = 1024;
/// Nodes handled per batched read and write when updating distances.
const UPDATE_BATCH: usize = 256;
/// Inner loop iterations between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 256;

/// Walks the pairs stored at a range of condensed positions, in position order.
struct PairWalk {
    n: usize,
    i: usize,
    j: usize,
    remaining: usize,
}

impl PairWalk {
    fn new(n: usize, range: Range<usize>) -> Result<Self> {
        let (i, j) = if range.is_empty() { (0, 0) } else { pair_at(n, range.start)? };
        Ok(PairWalk { n, i, j, remaining: range.len() })
    }
}

impl Iterator for PairWalk {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let pair = (self.i, self.j);
        self.remaining -= 1;
        self.j += 1;
        if self.j == self.n {
            self.i += 1;
            self.j = self.i + 1;
        }
        Some(pair)
    }
}

fn check_cancelled(control: &dyn TaskControl) -> Result<()> {
    if control.is_cancelled() {
        Err(ClusterError::Cancelled)
    } else {
        Ok(())
    }
}

fn checked_similarity<S>(similarities: &S, i: usize, j: usize) -> Result<f64>
where
    S: SimilarityProvider + ?Sized,
{
    let similarity = similarities.similarity(i, j);
    if !similarity.is_finite() {
        return Err(ClusterError::NonFiniteSimilarity(format!(
            "pair ({i}, {j}) has similarity {similarity}"
        )));
    }
    Ok(similarity)
}

/// Smallest and largest similarity in `range`, or `None` for an empty range.
pub(super) fn scan_similarities<S>(
    range: Range<usize>,
    n: usize,
    similarities: &S,
    control: &dyn TaskControl,
) -> Result<Option<(f64, f64)>>
where
    S: SimilarityProvider + ?Sized,
{
    let mut extremes: Option<(f64, f64)> = None;
    for (k, (i, j)) in PairWalk::new(n, range)?.enumerate() {
        if k % CANCEL_CHECK_INTERVAL == 0 {
            check_cancelled(control)?;
        }
        let similarity = checked_similarity(similarities, i, j)?;
        extremes = match extremes {
            None => Some((similarity, similarity)),
            Some((lo, hi)) => Some((lo.min(similarity), hi.max(similarity))),
        };
    }
    Ok(extremes)
}

/// Computes and stores the distances in `range`. Returns this worker's neighbour candidates.
pub(super) fn initialize_distances<S>(
    range: Range<usize>,
    n: usize,
    similarities: &S,
    scale: SimilarityScale,
    store: &dyn DistanceStore,
    control: &dyn TaskControl,
    report: &dyn Fn(usize, usize),
) -> Result<NeighbourTracker>
where
    S: SimilarityProvider + ?Sized,
{
    let total = range.len();
    let mut candidates = NeighbourTracker::new(n);
    let mut batch = Vec::with_capacity(WRITE_BATCH.min(total));
    let mut batch_start = range.start;

    for (k, (i, j)) in PairWalk::new(n, range)?.enumerate() {
        let distance = scale.distance(checked_similarity(similarities, i, j)?);
        batch.push(distance);
        candidates.offer(i, Neighbour { id: j, distance });
        candidates.offer(j, Neighbour { id: i, distance });

        if batch.len() == WRITE_BATCH {
            store.write_run(batch_start, &batch)?;
            batch_start += batch.len();
            batch.clear();
            check_cancelled(control)?;
            report(k + 1, total);
        }
    }
    store.write_run(batch_start, &batch)?;
    report(total, total);
    Ok(candidates)
}

/// Writes the linkage distance between the merged node and every active node in `range`.
pub(super) fn update_distances(
    range: Range<usize>,
    merge: &Merge,
    linkage: Linkage,
    store: &dyn DistanceStore,
    active: &[bool],
    control: &dyn TaskControl,
) -> Result<()> {
    let combine = linkage.combiner();
    let (left_size, right_size) = (merge.left_size as f64, merge.right_size as f64);
    let targets: Vec<usize> = range
        .filter(|&k| active[k] && k != merge.left && k != merge.right)
        .collect();

    let mut to_left = Vec::with_capacity(UPDATE_BATCH);
    let mut to_right = Vec::with_capacity(UPDATE_BATCH);
    let mut to_merged = Vec::with_capacity(UPDATE_BATCH);
    let mut d_left = vec![0.0; UPDATE_BATCH];
    let mut d_right = vec![0.0; UPDATE_BATCH];

    for chunk in targets.chunks(UPDATE_BATCH) {
        check_cancelled(control)?;
        to_left.clear();
        to_right.clear();
        to_merged.clear();
        for &k in chunk {
            to_left.push((k, merge.left));
            to_right.push((k, merge.right));
            to_merged.push((merge.merge_id, k));
        }
        let count = chunk.len();
        store.get_many(&to_left, &mut d_left[..count])?;
        store.get_many(&to_right, &mut d_right[..count])?;
        let merged: Vec<f64> = d_left[..count]
            .iter()
            .zip(&d_right[..count])
            .map(|(&l, &r)| combine(l, r, left_size, right_size))
            .collect();
        store.set_many(&to_merged, &merged)?;
    }
    Ok(())
}

/// Rescans the nodes in `entries` whose neighbour the merge invalidated. `entries` starts at
/// node `start`.
pub(super) fn update_neighbours(
    start: usize,
    entries: &mut [Option<Neighbour>],
    active: &[bool],
    merge: &Merge,
    store: &dyn DistanceStore,
    control: &dyn TaskControl,
) -> Result<()> {
    let n = active.len();
    let mut row = vec![0.0; n];
    for (offset, entry) in entries.iter_mut().enumerate() {
        let id = start + offset;
        if !active[id] {
            *entry = None;
            continue;
        }
        let is_stale = id == merge.merge_id
            || match entry {
                Some(neighbour) => neighbour.id == merge.left || neighbour.id == merge.right,
                None => true,
            };
        if !is_stale {
            continue;
        }
        check_cancelled(control)?;
        store.read_row(id, &mut row)?;
        *entry = None;
        for (other, &distance) in row.iter().enumerate() {
            if other != id && active[other] {
                offer(entry, Neighbour { id: other, distance });
            }
        }
    }
    Ok(())
}
