//! Progress reporting and cooperative cancellation for long clustering runs.

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// The stages of a clustering run, each owning a fixed share of the overall progress.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stage {
    CreateStore,
    InitializeDistances,
    Merge,
    MinimizeInterleafDistances,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::CreateStore => "create store",
            Stage::InitializeDistances => "initialize distances",
            Stage::Merge => "merge",
            Stage::MinimizeInterleafDistances => "minimize interleaf distances",
        };
        write!(f, "{name}")
    }
}

/// Hooks a caller can implement to follow, and stop, a clustering run.
///
/// Methods may be called from worker threads, hence the `Sync` bound. Every method has a no-op
/// default.
pub trait TaskControl: Sync {
    /// A stage has started and owns `budget` of the overall progress.
    fn begin_stage(&self, _stage: Stage, _budget: f64) {}

    /// Overall progress, from 0 to 1.
    fn progress(&self, _fraction: f64) {}

    /// Polled frequently by workers. Returning true stops the run with
    /// `ClusterError::Cancelled`.
    fn is_cancelled(&self) -> bool {
        false
    }

    /// A fatal error ended the run.
    fn fatal(&self, _message: &str) {}
}

/// Task control that never cancels and ignores progress.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoControl;

impl TaskControl for NoControl {}

/// Shareable cancellation flag. Clones observe the same flag.
#[derive(Debug, Default, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

impl TaskControl for CancellationToken {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

const CREATE_STORE_BUDGET: f64 = 0.05;
const INITIALIZE_DISTANCES_BUDGET: f64 = 0.10;
const MERGE_BUDGET: f64 = 0.85;
const INTERLEAF_BUDGET: f64 = 0.10;

/// Maps stage local progress onto the overall fraction reported to a `TaskControl`.
pub(crate) struct ProgressBudget<'a> {
    control: &'a dyn TaskControl,
    with_interleaf: bool,
    offset: f64,
    budget: f64,
}

impl<'a> ProgressBudget<'a> {
    pub(crate) fn new(control: &'a dyn TaskControl, with_interleaf: bool) -> Self {
        ProgressBudget { control, with_interleaf, offset: 0.0, budget: 0.0 }
    }

    pub(crate) fn budget_of(&self, stage: Stage) -> f64 {
        match (stage, self.with_interleaf) {
            (Stage::CreateStore, _) => CREATE_STORE_BUDGET,
            (Stage::InitializeDistances, _) => INITIALIZE_DISTANCES_BUDGET,
            (Stage::Merge, false) => MERGE_BUDGET,
            (Stage::Merge, true) => MERGE_BUDGET - INTERLEAF_BUDGET,
            (Stage::MinimizeInterleafDistances, _) => INTERLEAF_BUDGET,
        }
    }

    /// Closes the current stage and opens `stage`.
    pub(crate) fn begin(&mut self, stage: Stage) {
        self.offset += self.budget;
        self.budget = self.budget_of(stage);
        self.control.begin_stage(stage, self.budget);
        self.report(self.offset);
    }

    /// Reports `done` out of `total` units of the current stage.
    pub(crate) fn step(&self, done: usize, total: usize) {
        let local = if total == 0 { 1.0 } else { done as f64 / total as f64 };
        self.report(self.offset + self.budget * local.min(1.0));
    }

    pub(crate) fn finish(&mut self) {
        self.offset = 1.0;
        self.budget = 0.0;
        self.report(1.0);
    }

    fn report(&self, fraction: f64) {
        trace!(fraction, "Clustering progress");
        self.control.progress(fraction.min(1.0));
    }
}
