//! Agglomerative hierarchical clustering over pairwise similarities, in Rust.
//!
//! Records are described only by how similar each pair is. Clustering starts with every record
//! in its own cluster and repeatedly merges the two closest clusters until one remains, recording
//! each merge in a dendrogram. The dendrogram is then cut, either into a fixed number of clusters
//! or wherever merges stop being coherent enough.
//!
//! The main features of this implementation are that:
//!  1. The distance matrix is held in memory when it is small and in a temporary file when it is
//!     not, so inputs far larger than RAM can be clustered;
//!  2. Distance initialisation and the per merge updates run on a pool of worker threads, with
//!     results that do not depend on the number of workers; and
//!  3. A finished dendrogram can be cut again without recomputing any distances.
//!
//! Similarities are turned into distances in `[0, 1]` with `(max - similarity) / (max - min)`,
//! where `max` and `min` are either declared by the similarity provider or found by a scan.
//!
//! # Examples
//! ```
//!use agglomerate::{cluster, AgglomerativeHyperParams, Linkage, SimilarityMatrix};
//!
//!let similarities = SimilarityMatrix::new(vec![
//!    vec![1.0, 0.9, 0.2, 0.1],
//!    vec![0.9, 1.0, 0.3, 0.2],
//!    vec![0.2, 0.3, 1.0, 0.8],
//!    vec![0.1, 0.2, 0.8, 1.0],
//!]).unwrap();
//!let config = AgglomerativeHyperParams::builder()
//!    .linkage(Linkage::Complete)
//!    .n_clusters(2)
//!    .build();
//!let groups = cluster(&similarities, config).unwrap();
//!assert_eq!(groups, vec![vec![0, 1], vec![2, 3]]);
//! ```

pub use crate::agglomerative::{Agglomerative, Clustering};
pub use crate::coordinator::Phase;
pub use crate::data_wrappers::Merge;
pub use crate::dendrogram::{Dendrogram, MergeTree};
pub use crate::distance_store::{
    condensed_len, pair_at, position, DistanceStore, FileStore, MemoryStore, StoreBackend,
    StoreFactory,
};
pub use crate::error::{ClusterError, Result};
pub use crate::hyper_parameters::{AgglomerativeHyperParams, ClusterCut, HyperParamBuilder};
pub use crate::linkage::Linkage;
pub use crate::similarity::{FnSimilarity, SimilarityMatrix, SimilarityProvider, SimilarityScale};
pub use crate::task::{CancellationToken, NoControl, Stage, TaskControl};

mod agglomerative;
mod coordinator;
mod data_wrappers;
mod dendrogram;
mod distance_store;
mod error;
mod hyper_parameters;
mod leaf_order;
mod linkage;
mod nearest_neighbour;
mod similarity;
mod task;
mod union_find;
mod validation;

/// Clusters `similarities` with the given configuration and returns the resulting groups.
///
/// # Parameters
/// * `similarities` - pairwise similarities between the records to cluster
/// * `hyper_params` - the hyper parameter configuration
///
/// # Returns
/// * The record indices of each cluster, each sorted ascending, clusters ordered by their
///   smallest member.
pub fn cluster<S>(similarities: &S, hyper_params: AgglomerativeHyperParams) -> Result<Vec<Vec<usize>>>
where
    S: SimilarityProvider + ?Sized,
{
    Agglomerative::new(similarities, hyper_params).cluster()
}
