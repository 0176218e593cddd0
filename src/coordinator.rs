//! Runs the data parallel phases of a clustering run.
//!
//! Each phase splits its work into one contiguous range per worker, fans the ranges out to a
//! thread pool built once for the run, and joins them before returning. The join is the only
//! synchronisation point: workers never wait on each other, and the caller only touches the
//! shared store and neighbour tracker between phases. With a single worker everything runs on
//! the calling thread.

use crate::data_wrappers::Merge;
use crate::distance_store::{condensed_len, DistanceStore};
use crate::linkage::Linkage;
use crate::nearest_neighbour::NeighbourTracker;
use crate::similarity::{SimilarityProvider, SimilarityScale};
use crate::task::TaskControl;
use crate::{ClusterError, Result};
use std::any::Any;
use std::fmt::{Display, Formatter};
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

mod phases;

/// The phases a coordinator can run.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    ScanSimilarities,
    InitializeDistances,
    UpdateDistances,
    UpdateNeighbours,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::ScanSimilarities => "scan similarities",
            Phase::InitializeDistances => "initialize distances",
            Phase::UpdateDistances => "update distances",
            Phase::UpdateNeighbours => "update neighbours",
        };
        write!(f, "{name}")
    }
}

pub(crate) struct PhaseCoordinator {
    n_samples: usize,
    n_workers: usize,
    distance_bounds: Vec<usize>,
    node_bounds: Vec<usize>,
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
}

impl PhaseCoordinator {
    /// # Parameters
    /// * `n_samples` - number of records being clustered
    /// * `requested_workers` - worker count asked for, or `None` for the available parallelism
    pub(crate) fn new(n_samples: usize, requested_workers: Option<usize>) -> Self {
        let n_workers = Self::clamp_workers(n_samples, requested_workers);
        let n_distances = condensed_len(n_samples);

        #[cfg(feature = "parallel")]
        let (n_workers, pool) = Self::build_pool(n_workers);

        debug!(n_samples, n_workers, "Starting phase coordinator");
        PhaseCoordinator {
            n_samples,
            n_workers,
            distance_bounds: proportional_bounds(n_distances, n_workers),
            node_bounds: proportional_bounds(n_samples, n_workers),
            #[cfg(feature = "parallel")]
            pool,
        }
    }

    fn clamp_workers(n_samples: usize, requested_workers: Option<usize>) -> usize {
        let requested = requested_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        if cfg!(not(feature = "parallel")) && requested > 1 {
            warn!(requested, "Built without the parallel feature, running on a single worker");
            return 1;
        }
        requested
            .min(n_samples)
            .min(condensed_len(n_samples))
            .max(1)
    }

    #[cfg(feature = "parallel")]
    fn build_pool(n_workers: usize) -> (usize, Option<rayon::ThreadPool>) {
        if n_workers == 1 {
            return (1, None);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_workers)
            .thread_name(|i| format!("agglomerate-worker-{i}"))
            .build();
        match pool {
            Ok(pool) => (n_workers, Some(pool)),
            Err(err) => {
                warn!(n_workers, %err, "Unable to start worker pool, running on a single worker");
                (1, None)
            }
        }
    }

    pub(crate) fn n_workers(&self) -> usize {
        self.n_workers
    }

    fn distance_ranges(&self) -> Vec<Range<usize>> {
        self.distance_bounds.windows(2).map(|w| w[0]..w[1]).collect()
    }

    fn node_ranges(&self) -> Vec<Range<usize>> {
        self.node_bounds.windows(2).map(|w| w[0]..w[1]).collect()
    }

    /// Releases the worker threads.
    pub(crate) fn shutdown(self) {
        debug!(n_workers = self.n_workers, "Shutting down phase coordinator");
    }

    /// Runs `work` once per task, one task per worker, and waits for all of them.
    ///
    /// Results come back in task order. The first error in task order is returned, except that
    /// a real failure takes precedence over a cancellation. A panicking worker is reported as a
    /// `PhaseFailure`.
    fn fan_out<T, R, F>(&self, phase: Phase, tasks: Vec<T>, work: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(usize, T) -> Result<R> + Sync,
    {
        let started = Instant::now();
        let guarded = |(worker, task): (usize, T)| {
            catch_unwind(AssertUnwindSafe(|| work(worker, task)))
                .unwrap_or_else(|payload| Err(phase_failure(phase, payload)))
        };

        #[cfg(feature = "parallel")]
        let results: Vec<Result<R>> = match &self.pool {
            Some(pool) => {
                pool.install(|| tasks.into_par_iter().enumerate().map(guarded).collect())
            }
            None => tasks.into_iter().enumerate().map(guarded).collect(),
        };
        #[cfg(not(feature = "parallel"))]
        let results: Vec<Result<R>> = tasks.into_iter().enumerate().map(guarded).collect();

        debug!(%phase, elapsed = ?started.elapsed(), "Phase joined");
        join_results(results)
    }

    /// Smallest and largest similarity over all pairs.
    pub(crate) fn scan_similarities<S>(
        &self,
        similarities: &S,
        control: &dyn TaskControl,
    ) -> Result<(f64, f64)>
    where
        S: SimilarityProvider + ?Sized,
    {
        let n = self.n_samples;
        let extremes = self.fan_out(Phase::ScanSimilarities, self.distance_ranges(), |_, range| {
            phases::scan_similarities(range, n, similarities, control)
        })?;
        Ok(extremes
            .into_iter()
            .flatten()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), (lo, hi)| {
                (min.min(lo), max.max(hi))
            }))
    }

    /// Fills `store` with the distance of every pair and seeds `tracker` with each node's
    /// nearest neighbour.
    ///
    /// Workers collect neighbour candidates into private trackers which are folded into the
    /// shared one in worker order. Worker ranges are ascending position ranges, so the fold sees
    /// candidates in the same order a single worker would and picks the same neighbours.
    pub(crate) fn initialize_distances<S>(
        &self,
        similarities: &S,
        scale: SimilarityScale,
        store: &dyn DistanceStore,
        tracker: &mut NeighbourTracker,
        control: &dyn TaskControl,
        on_progress: &(dyn Fn(usize, usize) + Sync),
    ) -> Result<()>
    where
        S: SimilarityProvider + ?Sized,
    {
        let n = self.n_samples;
        let locals = self.fan_out(Phase::InitializeDistances, self.distance_ranges(), |worker, range| {
            let report = |done: usize, total: usize| {
                if worker == 0 {
                    on_progress(done, total);
                }
            };
            phases::initialize_distances(range, n, similarities, scale, store, control, &report)
        })?;
        for local in &locals {
            tracker.absorb(local);
        }
        Ok(())
    }

    /// Writes the distance from the merged node to every other active node.
    pub(crate) fn update_distances(
        &self,
        merge: &Merge,
        linkage: Linkage,
        store: &dyn DistanceStore,
        tracker: &NeighbourTracker,
        control: &dyn TaskControl,
    ) -> Result<()> {
        let active = tracker.active();
        self.fan_out(Phase::UpdateDistances, self.node_ranges(), |_, range| {
            phases::update_distances(range, merge, linkage, store, active, control)
        })?;
        Ok(())
    }

    /// Refreshes the neighbour of every node the merge invalidated.
    pub(crate) fn update_neighbours(
        &self,
        merge: &Merge,
        store: &dyn DistanceStore,
        tracker: &mut NeighbourTracker,
        control: &dyn TaskControl,
    ) -> Result<()> {
        let (slices, active) = tracker.partition_mut(&self.node_bounds);
        let tasks: Vec<_> = self.node_bounds.iter().copied().zip(slices).collect();
        self.fan_out(Phase::UpdateNeighbours, tasks, |_, (start, entries)| {
            phases::update_neighbours(start, entries, active, merge, store, control)
        })?;
        Ok(())
    }
}

/// `parts + 1` boundaries splitting `0..total` into contiguous shares, each boundary the
/// rounded proportional share of the cumulative total.
pub(crate) fn proportional_bounds(total: usize, parts: usize) -> Vec<usize> {
    let parts = parts.max(1) as u128;
    (0..=parts)
        .map(|w| ((total as u128 * w + parts / 2) / parts) as usize)
        .collect()
}

fn join_results<R>(results: Vec<Result<R>>) -> Result<Vec<R>> {
    let mut values = Vec::with_capacity(results.len());
    let mut cancelled = false;
    let mut failure = None;
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(ClusterError::Cancelled) => cancelled = true,
            Err(err) => {
                failure.get_or_insert(err);
            }
        }
    }
    match (failure, cancelled) {
        (Some(err), _) => Err(err),
        (None, true) => Err(ClusterError::Cancelled),
        (None, false) => Ok(values),
    }
}

fn phase_failure(phase: Phase, payload: Box<dyn Any + Send>) -> ClusterError {
    let message = if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("worker panicked")
    };
    ClusterError::PhaseFailure { phase, message }
}
