use crate::coordinator::PhaseCoordinator;
use crate::data_wrappers::Merge;
use crate::dendrogram::{Dendrogram, MergeTree};
use crate::distance_store::DistanceStore;
use crate::hyper_parameters::{AgglomerativeHyperParams, ClusterCut};
use crate::leaf_order;
use crate::nearest_neighbour::NeighbourTracker;
use crate::similarity::{SimilarityProvider, SimilarityScale};
use crate::task::{NoControl, ProgressBudget, Stage, TaskControl};
use crate::validation::DataValidator;
use crate::{ClusterError, Result};
use std::time::Instant;
use tracing::{debug, error, trace, warn};

/// The outcome of a clustering run: the requested cut and the full merge tree it was taken
/// from.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering<D> {
    /// Record indices per cluster, each sorted ascending, clusters ordered by their smallest
    /// member.
    pub groups: Vec<Vec<usize>>,
    pub dendrogram: D,
}

/// Agglomerative hierarchical clustering over pairwise similarities.
pub struct Agglomerative<'a, S: ?Sized> {
    similarities: &'a S,
    n_samples: usize,
    hyper_params: AgglomerativeHyperParams,
}

impl<'a, S: SimilarityProvider + ?Sized> Agglomerative<'a, S> {
    /// Creates a clustering model using a custom hyper parameter configuration.
    ///
    /// # Parameters
    /// * `similarities` - pairwise similarities between the records to cluster
    /// * `hyper_params` - the hyper parameter configuration
    ///
    /// # Returns
    /// * The clustering model instance.
    ///
    /// # Examples
    /// ```
    ///use agglomerate::{Agglomerative, AgglomerativeHyperParams, Linkage, SimilarityMatrix};
    ///
    ///let similarities = SimilarityMatrix::new(vec![
    ///    vec![1.0, 0.9, 0.2, 0.1],
    ///    vec![0.9, 1.0, 0.3, 0.2],
    ///    vec![0.2, 0.3, 1.0, 0.8],
    ///    vec![0.1, 0.2, 0.8, 1.0],
    ///]).unwrap();
    ///let config = AgglomerativeHyperParams::builder()
    ///    .linkage(Linkage::Complete)
    ///    .n_clusters(2)
    ///    .build();
    ///let clusterer = Agglomerative::new(&similarities, config);
    /// ```
    pub fn new(similarities: &'a S, hyper_params: AgglomerativeHyperParams) -> Self {
        let n_samples = similarities.record_count();
        Agglomerative { similarities, n_samples, hyper_params }
    }

    /// Creates a clustering model using the default hyper parameters.
    pub fn default(similarities: &'a S) -> Self {
        Agglomerative::new(similarities, AgglomerativeHyperParams::default())
    }

    /// Clusters the records and returns the configured cut.
    ///
    /// # Returns
    /// * A result that, if successful, contains the record indices of each cluster. An error is
    ///   returned if there are no records, a similarity is not finite, the distance matrix is too
    ///   large, or the distance store fails.
    ///
    /// # Examples
    /// ```
    ///use agglomerate::{Agglomerative, AgglomerativeHyperParams, Linkage, SimilarityMatrix};
    ///
    ///let similarities = SimilarityMatrix::new(vec![
    ///    vec![1.0, 0.9, 0.2, 0.1],
    ///    vec![0.9, 1.0, 0.3, 0.2],
    ///    vec![0.2, 0.3, 1.0, 0.8],
    ///    vec![0.1, 0.2, 0.8, 1.0],
    ///]).unwrap();
    ///let config = AgglomerativeHyperParams::builder()
    ///    .linkage(Linkage::Complete)
    ///    .n_clusters(2)
    ///    .build();
    ///let groups = Agglomerative::new(&similarities, config).cluster().unwrap();
    ///assert_eq!(groups, vec![vec![0, 1], vec![2, 3]]);
    /// ```
    pub fn cluster(&self) -> Result<Vec<Vec<usize>>> {
        let clustering = self.cluster_with(MergeTree::new(self.n_samples), &NoControl)?;
        Ok(clustering.groups)
    }

    /// Clusters the records into `dendrogram`, reporting to and polling `control`.
    ///
    /// A pristine dendrogram is filled with all merges. A finished one, from an earlier run over
    /// the same records, is only cut again, which makes trying several cuts cheap.
    ///
    /// # Parameters
    /// * `dendrogram` - a pristine or finished dendrogram with one leaf per record
    /// * `control` - progress, cancellation and fatal error hooks
    ///
    /// # Returns
    /// * The groups and the dendrogram. Cancelling returns `ClusterError::Cancelled` and no
    ///   dendrogram. Any other error is also reported to `control` as fatal.
    pub fn cluster_with<D: Dendrogram>(
        &self,
        dendrogram: D,
        control: &dyn TaskControl,
    ) -> Result<Clustering<D>> {
        let started = Instant::now();
        match self.run(dendrogram, control) {
            Ok(clustering) => {
                debug!(
                    n_samples = self.n_samples,
                    n_clusters = clustering.groups.len(),
                    elapsed = ?started.elapsed(),
                    "Clustering finished"
                );
                Ok(clustering)
            }
            Err(err) if err.is_fatal() => {
                error!(%err, "Clustering failed");
                control.fatal(&err.to_string());
                Err(err)
            }
            Err(err) => {
                debug!(elapsed = ?started.elapsed(), "Clustering cancelled");
                Err(err)
            }
        }
    }

    fn run<D: Dendrogram>(&self, mut dendrogram: D, control: &dyn TaskControl) -> Result<Clustering<D>> {
        DataValidator::new(self.n_samples, &dendrogram, &self.hyper_params)
            .declared_range(self.similarities.min_possible(), self.similarities.max_possible())
            .validate_input_data()?;
        let minimize_interleaf = self.hyper_params.minimize_interleaf_distances;
        let mut budget = ProgressBudget::new(control, minimize_interleaf);
        let coordinator = PhaseCoordinator::new(self.n_samples, self.hyper_params.n_threads);
        let mut scale = None;

        if dendrogram.is_finished() {
            debug!(merges = dendrogram.merge_count(), "Dendrogram already finished, reusing it");
        } else {
            let resolved = self.resolve_scale(&mut scale, &coordinator, control)?;
            self.build_dendrogram(&mut dendrogram, resolved, &coordinator, &mut budget, control)?;
        }
        if minimize_interleaf {
            let resolved = self.resolve_scale(&mut scale, &coordinator, control)?;
            budget.begin(Stage::MinimizeInterleafDistances);
            let order = leaf_order::minimize_interleaf_distances(
                &dendrogram,
                self.similarities,
                resolved,
                control,
                &|done, total| budget.step(done, total),
            )?;
            dendrogram.set_leaf_order(order);
        }
        coordinator.shutdown();
        budget.finish();

        let groups = self.cut(&mut dendrogram);
        Ok(Clustering { groups, dendrogram })
    }

    /// The similarity to distance mapping, from the provider's declared range when both bounds
    /// are finite, otherwise from a scan of every pair. Resolved at most once per run.
    fn resolve_scale(
        &self,
        cached: &mut Option<SimilarityScale>,
        coordinator: &PhaseCoordinator,
        control: &dyn TaskControl,
    ) -> Result<SimilarityScale> {
        if let Some(scale) = cached {
            return Ok(*scale);
        }
        let declared = (self.similarities.min_possible(), self.similarities.max_possible());
        let (min, max) = match declared {
            (Some(min), Some(max)) if min.is_finite() && max.is_finite() => (min, max),
            _ if self.n_samples < 2 => (0.0, 0.0),
            (min, max) => {
                let non_finite = |bound: Option<f64>| bound.is_some_and(|b| !b.is_finite());
                if non_finite(min) || non_finite(max) {
                    warn!(?min, ?max, "Ignoring non-finite declared similarity bounds");
                }
                let (min, max) = coordinator.scan_similarities(self.similarities, control)?;
                debug!(min, max, "Scanned similarity range");
                (min, max)
            }
        };
        let scale = SimilarityScale::new(min, max);
        *cached = Some(scale);
        Ok(scale)
    }

    fn build_dendrogram<D: Dendrogram>(
        &self,
        dendrogram: &mut D,
        scale: SimilarityScale,
        coordinator: &PhaseCoordinator,
        budget: &mut ProgressBudget,
        control: &dyn TaskControl,
    ) -> Result<()> {
        budget.begin(Stage::CreateStore);
        let store = self.hyper_params.store_factory().create(self.n_samples)?;
        budget.step(1, 1);

        budget.begin(Stage::InitializeDistances);
        let mut tracker = NeighbourTracker::new(self.n_samples);
        let started = Instant::now();
        coordinator.initialize_distances(
            self.similarities,
            scale,
            store.as_ref(),
            &mut tracker,
            control,
            &|done, total| budget.step(done, total),
        )?;
        debug!(
            n_workers = coordinator.n_workers(),
            elapsed = ?started.elapsed(),
            "Distances initialised"
        );

        budget.begin(Stage::Merge);
        self.merge_all(dendrogram, store.as_ref(), &mut tracker, coordinator, budget, control)
    }

    fn merge_all<D: Dendrogram>(
        &self,
        dendrogram: &mut D,
        store: &dyn DistanceStore,
        tracker: &mut NeighbourTracker,
        coordinator: &PhaseCoordinator,
        budget: &ProgressBudget,
        control: &dyn TaskControl,
    ) -> Result<()> {
        let n_merges = self.n_samples - 1;
        let linkage = self.hyper_params.linkage;
        for t in 0..n_merges {
            if control.is_cancelled() {
                return Err(ClusterError::Cancelled);
            }
            let (left, nearest) = tracker
                .global_minimum()
                .ok_or(ClusterError::NoNeighboursFound { active: tracker.n_active() })?;
            let right = nearest.id;
            let left_size = self.active_size(dendrogram, left)?;
            let right_size = self.active_size(dendrogram, right)?;

            let merge_id = dendrogram.merge_nodes(left, right, nearest.distance);
            let merge = Merge { left, right, merge_id, distance: nearest.distance, left_size, right_size };
            trace!(left, right, distance = nearest.distance, size = merge.size(), "Merged");

            tracker.retire(merge.retired_id());
            tracker.invalidate(merge_id);
            if !dendrogram.is_finished() {
                coordinator.update_distances(&merge, linkage, store, tracker, control)?;
                coordinator.update_neighbours(&merge, store, tracker, control)?;
            }
            budget.step(t + 1, n_merges);
        }
        Ok(())
    }

    fn active_size<D: Dendrogram>(&self, dendrogram: &D, index: usize) -> Result<usize> {
        dendrogram
            .active_node(index)
            .map(|node| dendrogram.node_size(node))
            .ok_or_else(|| {
                ClusterError::precondition(format!("Index {index} is not active in the dendrogram"))
            })
    }

    fn cut<D: Dendrogram>(&self, dendrogram: &mut D) -> Vec<Vec<usize>> {
        let n_clusters = match self.hyper_params.cut {
            ClusterCut::Count(n_clusters) => n_clusters,
            ClusterCut::Coherence(threshold) => {
                dendrogram.set_coherence_threshold(threshold);
                dendrogram.clusters_with_coherence_exceeding(threshold)
            }
        };
        debug!(n_clusters, "Cutting dendrogram");
        dendrogram.generate_cluster_groupings(n_clusters)
    }
}
