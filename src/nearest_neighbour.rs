use crate::data_wrappers::Neighbour;

/// Cached nearest neighbour of every active node, plus the liveness of each index.
///
/// Entries are only meaningful while their node is active. An entry pointing at `id` holds the
/// store value for `(node, id)` as of the last time it was refreshed.
#[derive(Debug, Clone)]
pub(crate) struct NeighbourTracker {
    entries: Vec<Option<Neighbour>>,
    active: Vec<bool>,
    n_active: usize,
}

impl NeighbourTracker {
    pub(crate) fn new(n_samples: usize) -> Self {
        NeighbourTracker {
            entries: vec![None; n_samples],
            active: vec![true; n_samples],
            n_active: n_samples,
        }
    }

    pub(crate) fn n_active(&self) -> usize {
        self.n_active
    }

    pub(crate) fn active(&self) -> &[bool] {
        &self.active
    }

    #[cfg(test)]
    pub(crate) fn get(&self, id: usize) -> Option<Neighbour> {
        self.entries[id]
    }

    /// Keeps `candidate` for `id` if it is strictly closer than the current entry.
    pub(crate) fn offer(&mut self, id: usize, candidate: Neighbour) {
        offer(&mut self.entries[id], candidate);
    }

    /// Permanently removes `id` from the active set.
    pub(crate) fn retire(&mut self, id: usize) {
        if self.active[id] {
            self.active[id] = false;
            self.n_active -= 1;
        }
        self.entries[id] = None;
    }

    pub(crate) fn invalidate(&mut self, id: usize) {
        self.entries[id] = None;
    }

    /// Folds another tracker's entries into this one in index order, keeping strictly closer
    /// candidates only.
    pub(crate) fn absorb(&mut self, other: &NeighbourTracker) {
        for (id, candidate) in other.entries.iter().enumerate() {
            if let Some(candidate) = candidate {
                self.offer(id, *candidate);
            }
        }
    }

    /// The closest pair over all active entries as `(node, neighbour)`. Ties go to the lowest
    /// node index.
    pub(crate) fn global_minimum(&self) -> Option<(usize, Neighbour)> {
        let mut best: Option<(usize, Neighbour)> = None;
        for (id, entry) in self.entries.iter().enumerate() {
            if !self.active[id] {
                continue;
            }
            if let Some(neighbour) = entry {
                match best {
                    Some((_, current)) if neighbour.distance >= current.distance => {}
                    _ => best = Some((id, *neighbour)),
                }
            }
        }
        best
    }

    /// Splits the entries into disjoint mutable slices, one per `[start, end)` boundary pair,
    /// alongside the shared liveness flags.
    pub(crate) fn partition_mut(
        &mut self,
        boundaries: &[usize],
    ) -> (Vec<&mut [Option<Neighbour>]>, &[bool]) {
        let mut slices = Vec::with_capacity(boundaries.len().saturating_sub(1));
        let mut rest: &mut [Option<Neighbour>] = &mut self.entries;
        for window in boundaries.windows(2) {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(window[1] - window[0]);
            slices.push(head);
            rest = tail;
        }
        (slices, &self.active)
    }
}

pub(crate) fn offer(entry: &mut Option<Neighbour>, candidate: Neighbour) {
    if candidate.distance.is_nan() {
        return;
    }
    match entry {
        Some(current) if candidate.distance >= current.distance => {}
        _ => *entry = Some(candidate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbour(id: usize, distance: f64) -> Neighbour {
        Neighbour { id, distance }
    }

    #[test]
    fn offer_keeps_first_of_equal_candidates() {
        let mut tracker = NeighbourTracker::new(3);
        tracker.offer(0, neighbour(1, 0.5));
        tracker.offer(0, neighbour(2, 0.5));
        assert_eq!(Some(neighbour(1, 0.5)), tracker.get(0));
        tracker.offer(0, neighbour(2, 0.25));
        assert_eq!(Some(neighbour(2, 0.25)), tracker.get(0));
    }

    #[test]
    fn nan_candidates_never_displace_real_ones() {
        let mut tracker = NeighbourTracker::new(3);
        tracker.offer(0, neighbour(1, 0.5));
        tracker.offer(0, neighbour(2, f64::NAN));
        assert_eq!(Some(neighbour(1, 0.5)), tracker.get(0));
    }

    #[test]
    fn global_minimum_skips_retired_nodes_and_breaks_ties_low() {
        let mut tracker = NeighbourTracker::new(4);
        tracker.offer(0, neighbour(3, 0.2));
        tracker.offer(1, neighbour(2, 0.1));
        tracker.offer(2, neighbour(1, 0.1));
        tracker.offer(3, neighbour(0, 0.2));
        assert_eq!(Some((1, neighbour(2, 0.1))), tracker.global_minimum());

        tracker.retire(1);
        tracker.invalidate(2);
        assert_eq!(3, tracker.n_active());
        assert!(!tracker.active()[1]);
        assert_eq!(Some((0, neighbour(3, 0.2))), tracker.global_minimum());
    }

    #[test]
    fn retire_is_idempotent() {
        let mut tracker = NeighbourTracker::new(2);
        tracker.retire(1);
        tracker.retire(1);
        assert_eq!(1, tracker.n_active());
        assert_eq!(None, tracker.global_minimum());
    }

    #[test]
    fn absorb_folds_in_index_order() {
        let mut shared = NeighbourTracker::new(3);
        shared.offer(2, neighbour(0, 0.3));
        let mut local = NeighbourTracker::new(3);
        local.offer(2, neighbour(1, 0.3));
        local.offer(1, neighbour(2, 0.3));
        shared.absorb(&local);
        assert_eq!(Some(neighbour(0, 0.3)), shared.get(2));
        assert_eq!(Some(neighbour(2, 0.3)), shared.get(1));
    }

    #[test]
    fn partition_covers_every_entry_once() {
        let mut tracker = NeighbourTracker::new(10);
        let (slices, active) = tracker.partition_mut(&[0, 3, 3, 7, 10]);
        assert_eq!(vec![3, 0, 4, 3], slices.iter().map(|s| s.len()).collect::<Vec<_>>());
        assert_eq!(10, active.len());
    }
}
