use crate::distance_store::{StoreFactory, FILE_THRESHOLD_DEFAULT, RAM_THRESHOLD_DEFAULT};
use crate::linkage::Linkage;
use std::path::PathBuf;
use tracing::warn;

// Defaults for parameters
const LINKAGE_DEFAULT: Linkage = Linkage::Mean;
const CLUSTER_CUT_DEFAULT: ClusterCut = ClusterCut::Count(1);
const MINIMIZE_INTERLEAF_DISTANCES_DEFAULT: bool = false;

// Valid minimums/left bounds of parameters
const N_THREADS_MINIMUM: usize = 1;
const N_CLUSTERS_MINIMUM: usize = 1;

/// Where the finished dendrogram is cut to produce the returned groups.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ClusterCut {
    /// A fixed number of clusters, clamped to the number of records.
    Count(usize),
    /// As many clusters as remain when only merges with coherence above the threshold are kept.
    Coherence(f64),
}

/// A wrapper around the various hyper parameters used in agglomerative clustering.
/// Only use if you want to tune hyper parameters. Otherwise use
/// `AgglomerativeHyperParams::default()`, which merges with mean linkage down to a single
/// cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct AgglomerativeHyperParams {
    pub(crate) linkage: Linkage,
    pub(crate) n_threads: Option<usize>,
    pub(crate) cut: ClusterCut,
    pub(crate) ram_threshold_bytes: u64,
    pub(crate) file_threshold_bytes: u64,
    pub(crate) temp_dir: Option<PathBuf>,
    pub(crate) minimize_interleaf_distances: bool,
}

/// Builder object to set custom hyper parameters.
pub struct HyperParamBuilder {
    linkage: Option<Linkage>,
    n_threads: Option<usize>,
    cut: Option<ClusterCut>,
    ram_threshold_bytes: Option<u64>,
    file_threshold_bytes: Option<u64>,
    temp_dir: Option<PathBuf>,
    minimize_interleaf_distances: Option<bool>,
}

impl Default for AgglomerativeHyperParams {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl AgglomerativeHyperParams {
    /// Enters the builder pattern, allowing custom hyper parameters to be set using
    /// various setter methods.
    ///
    /// # Returns
    /// * the hyper parameter configuration builder
    pub fn builder() -> HyperParamBuilder {
        HyperParamBuilder {
            linkage: None,
            n_threads: None,
            cut: None,
            ram_threshold_bytes: None,
            file_threshold_bytes: None,
            temp_dir: None,
            minimize_interleaf_distances: None,
        }
    }

    pub fn linkage(&self) -> Linkage {
        self.linkage
    }

    pub fn cut(&self) -> ClusterCut {
        self.cut
    }

    pub(crate) fn store_factory(&self) -> StoreFactory {
        StoreFactory::new(self.ram_threshold_bytes, self.file_threshold_bytes)
            .with_temp_dir(self.temp_dir.clone())
    }
}

impl HyperParamBuilder {
    /// Sets the linkage rule - how the distance from a merged cluster to every other cluster is
    /// derived from the distances of its two children. Defaults to Mean.
    ///
    /// # Parameters
    /// * linkage - the linkage rule
    ///
    /// # Returns
    /// * the hyper parameter configuration builder
    pub fn linkage(mut self, linkage: Linkage) -> HyperParamBuilder {
        self.linkage = Some(linkage);
        self
    }

    /// Sets the number of worker threads used by the parallel phases. The count is further
    /// limited by the amount of work available. Defaults to the available parallelism.
    ///
    /// # Parameters
    /// * n_threads - the number of worker threads
    ///
    /// # Returns
    /// * the hyper parameter configuration builder
    pub fn n_threads(mut self, n_threads: usize) -> HyperParamBuilder {
        let valid_n_threads =
            HyperParamBuilder::validate_input_left_bound(n_threads, N_THREADS_MINIMUM, "n_threads");
        self.n_threads = Some(valid_n_threads);
        self
    }

    /// Cuts the dendrogram into a fixed number of clusters. Counts larger than the number of
    /// records yield one cluster per record. Defaults to 1.
    ///
    /// # Parameters
    /// * n_clusters - the number of clusters to return
    ///
    /// # Returns
    /// * the hyper parameter configuration builder
    pub fn n_clusters(mut self, n_clusters: usize) -> HyperParamBuilder {
        let valid_n_clusters = HyperParamBuilder::validate_input_left_bound(
            n_clusters,
            N_CLUSTERS_MINIMUM,
            "n_clusters",
        );
        self.cut = Some(ClusterCut::Count(valid_n_clusters));
        self
    }

    /// Cuts the dendrogram by coherence instead of by count. A merge's coherence is one minus
    /// its merge distance, so a threshold of 0.8 keeps merging while merged clusters are at most
    /// 0.2 apart. Replaces any count set with `n_clusters`.
    ///
    /// # Parameters
    /// * coherence_threshold - the coherence every kept merge must exceed
    ///
    /// # Returns
    /// * the hyper parameter configuration builder
    pub fn coherence_threshold(mut self, coherence_threshold: f64) -> HyperParamBuilder {
        self.cut = Some(ClusterCut::Coherence(coherence_threshold));
        self
    }

    /// Sets the largest distance matrix, in bytes, kept in memory. Larger matrices are stored
    /// in a temporary file. Defaults to 512 MiB.
    ///
    /// # Parameters
    /// * ram_threshold_bytes - the in-memory size limit
    ///
    /// # Returns
    /// * the hyper parameter configuration builder
    pub fn ram_threshold_bytes(mut self, ram_threshold_bytes: u64) -> HyperParamBuilder {
        self.ram_threshold_bytes = Some(ram_threshold_bytes);
        self
    }

    /// Sets the largest distance matrix, in bytes, accepted at all. Larger inputs are rejected
    /// with a capacity error. Defaults to 256 GiB.
    ///
    /// # Parameters
    /// * file_threshold_bytes - the file backed size limit
    ///
    /// # Returns
    /// * the hyper parameter configuration builder
    pub fn file_threshold_bytes(mut self, file_threshold_bytes: u64) -> HyperParamBuilder {
        self.file_threshold_bytes = Some(file_threshold_bytes);
        self
    }

    /// Sets the directory file backed distance matrices are created in. Defaults to the
    /// system temporary directory.
    ///
    /// # Returns
    /// * the hyper parameter configuration builder
    pub fn temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> HyperParamBuilder {
        self.temp_dir = Some(temp_dir.into());
        self
    }

    /// Sets whether to reorder the leaves of the finished dendrogram so that neighbouring leaves
    /// are as similar as possible. Only affects `Dendrogram::leaf_order`. Defaults to false.
    ///
    /// # Returns
    /// * the hyper parameter configuration builder
    pub fn minimize_interleaf_distances(mut self, minimize: bool) -> HyperParamBuilder {
        self.minimize_interleaf_distances = Some(minimize);
        self
    }

    /// Finishes the building of the hyper parameter configuration. A call to this method is
    /// required to exit the builder pattern and complete the construction of the hyper
    /// parameters.
    ///
    /// # Returns
    /// * The completed hyper parameter configuration.
    pub fn build(self) -> AgglomerativeHyperParams {
        let ram_threshold_bytes = self.ram_threshold_bytes.unwrap_or(RAM_THRESHOLD_DEFAULT);
        let mut file_threshold_bytes = self.file_threshold_bytes.unwrap_or(FILE_THRESHOLD_DEFAULT);
        if file_threshold_bytes < ram_threshold_bytes {
            warn!(
                file_threshold_bytes,
                ram_threshold_bytes,
                "file_threshold_bytes cannot be lower than ram_threshold_bytes, raising it"
            );
            file_threshold_bytes = ram_threshold_bytes;
        }
        AgglomerativeHyperParams {
            linkage: self.linkage.unwrap_or(LINKAGE_DEFAULT),
            n_threads: self.n_threads,
            cut: self.cut.unwrap_or(CLUSTER_CUT_DEFAULT),
            ram_threshold_bytes,
            file_threshold_bytes,
            temp_dir: self.temp_dir,
            minimize_interleaf_distances: self
                .minimize_interleaf_distances
                .unwrap_or(MINIMIZE_INTERLEAF_DISTANCES_DEFAULT),
        }
    }

    fn validate_input_left_bound(input_param: usize, left_bound: usize, param: &str) -> usize {
        if input_param < left_bound {
            warn!("{param} ({input_param}) cannot be lower than {left_bound}. Set to {left_bound}.");
            left_bound
        } else {
            input_param
        }
    }
}
