use agglomerate::{
    cluster, Agglomerative, AgglomerativeHyperParams, CancellationToken, ClusterError,
    Dendrogram, FnSimilarity, HyperParamBuilder, Linkage, MergeTree, NoControl,
    SimilarityMatrix, SimilarityProvider, Stage, TaskControl,
};
use parking_lot::Mutex;
use std::path::Path;

pub type Configure = fn(HyperParamBuilder) -> HyperParamBuilder;

fn two_pairs() -> SimilarityMatrix<f64> {
    SimilarityMatrix::new(vec![
        vec![1.0, 0.9, 0.2, 0.1],
        vec![0.9, 1.0, 0.3, 0.2],
        vec![0.2, 0.3, 1.0, 0.8],
        vec![0.1, 0.2, 0.8, 1.0],
    ])
    .unwrap()
}

/// Three loose groups on a line, with plenty of tied similarities.
fn line_groups(n: usize) -> FnSimilarity<impl Fn(usize, usize) -> f64 + Sync> {
    let position = |i: usize| ((i % 3) * 10) as f64 + ((i * 7) % 5) as f64 * 0.25;
    FnSimilarity::new(n, move |i, j| -(position(i) - position(j)).abs())
}

/// Similarities from a closure, with whatever bounds the test wants to declare.
struct DeclaredBounds<F> {
    n: usize,
    min: Option<f64>,
    max: Option<f64>,
    similarity: F,
}

impl<F: Fn(usize, usize) -> f64 + Sync> SimilarityProvider for DeclaredBounds<F> {
    fn record_count(&self) -> usize {
        self.n
    }

    fn similarity(&self, i: usize, j: usize) -> f64 {
        (self.similarity)(i, j)
    }

    fn min_possible(&self) -> Option<f64> {
        self.min
    }

    fn max_possible(&self) -> Option<f64> {
        self.max
    }
}

/// Follows a run's stages, cancels once progress passes `cancel_after` and keeps every fatal
/// report.
#[derive(Default)]
struct Watcher {
    cancel_after: Option<f64>,
    token: CancellationToken,
    stage: Mutex<Option<Stage>>,
    cancelled_in: Mutex<Option<Stage>>,
    fatal: Mutex<Vec<(Option<Stage>, String)>>,
}

impl Watcher {
    fn cancelling_after(fraction: f64) -> Self {
        Watcher { cancel_after: Some(fraction), ..Watcher::default() }
    }
}

impl TaskControl for Watcher {
    fn begin_stage(&self, stage: Stage, _budget: f64) {
        *self.stage.lock() = Some(stage);
    }

    fn progress(&self, fraction: f64) {
        if self.cancel_after.is_some_and(|after| fraction > after) && !self.token.is_cancelled() {
            *self.cancelled_in.lock() = *self.stage.lock();
            self.token.cancel();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn fatal(&self, message: &str) {
        self.fatal.lock().push((*self.stage.lock(), message.to_string()));
    }
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).unwrap().count() == 0
}

fn distance_of<S: SimilarityProvider>(similarities: &S) -> impl Fn(usize, usize) -> f64 + '_ {
    let n = similarities.record_count();
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for i in 0..n {
        for j in (i + 1)..n {
            min = min.min(similarities.similarity(i, j));
            max = max.max(similarities.similarity(i, j));
        }
    }
    move |i, j| (max - similarities.similarity(i, j)) / (max - min)
}

pub fn test_two_pairs_complete_linkage(configure: Configure) {
    let similarities = two_pairs();
    let hp = configure(AgglomerativeHyperParams::builder())
        .linkage(Linkage::Complete)
        .n_clusters(2)
        .build();
    let groups = cluster(&similarities, hp).unwrap();
    assert_eq!(vec![vec![0, 1], vec![2, 3]], groups);
}

pub fn test_single_record(configure: Configure) {
    let similarities = SimilarityMatrix::new(vec![vec![1.0_f32]]).unwrap();
    let hp = configure(AgglomerativeHyperParams::builder()).n_clusters(3).build();
    let clustering = Agglomerative::new(&similarities, hp)
        .cluster_with(MergeTree::new(1), &NoControl)
        .unwrap();
    assert_eq!(0, clustering.dendrogram.merge_count());
    assert_eq!(vec![vec![0]], clustering.groups);
}

pub fn test_every_record_is_merged(configure: Configure) {
    for n in [2, 3, 17, 40] {
        let similarities = line_groups(n);
        let hp = configure(AgglomerativeHyperParams::builder()).build();
        let clustering = Agglomerative::new(&similarities, hp)
            .cluster_with(MergeTree::new(n), &NoControl)
            .unwrap();
        assert_eq!(n, clustering.dendrogram.leaf_count());
        assert_eq!(n - 1, clustering.dendrogram.merge_count());
        assert_eq!(vec![(0..n).collect::<Vec<_>>()], clustering.groups);
    }
}

pub fn test_file_backend_matches_memory(configure: Configure) {
    let similarities = line_groups(30);
    let temp_dir = tempfile::tempdir().unwrap();
    let in_memory = configure(AgglomerativeHyperParams::builder()).n_clusters(3).build();
    let in_file = configure(AgglomerativeHyperParams::builder())
        .n_clusters(3)
        .ram_threshold_bytes(0)
        .temp_dir(temp_dir.path())
        .build();

    let expected = Agglomerative::new(&similarities, in_memory)
        .cluster_with(MergeTree::new(30), &NoControl)
        .unwrap();
    let actual = Agglomerative::new(&similarities, in_file)
        .cluster_with(MergeTree::new(30), &NoControl)
        .unwrap();
    assert_eq!(expected, actual);
    // The temporary file is gone once the run ends
    assert_eq!(0, std::fs::read_dir(temp_dir.path()).unwrap().count());
}

pub fn test_same_result_as_one_worker(configure: Configure) {
    let similarities = line_groups(61);
    for linkage in [Linkage::Single, Linkage::Complete, Linkage::Mean] {
        let reference = AgglomerativeHyperParams::builder().linkage(linkage).n_threads(1).build();
        let configured = configure(AgglomerativeHyperParams::builder()).linkage(linkage).build();
        let expected = Agglomerative::new(&similarities, reference)
            .cluster_with(MergeTree::new(61), &NoControl)
            .unwrap();
        let actual = Agglomerative::new(&similarities, configured)
            .cluster_with(MergeTree::new(61), &NoControl)
            .unwrap();
        assert_eq!(expected.dendrogram.merges(), actual.dendrogram.merges());
    }
}

pub fn test_linkage_matches_brute_force(configure: Configure) {
    let n = 24;
    let similarities = line_groups(n);
    let distance = distance_of(&similarities);
    for linkage in [Linkage::Single, Linkage::Complete, Linkage::Mean] {
        let hp = configure(AgglomerativeHyperParams::builder()).linkage(linkage).build();
        let clustering = Agglomerative::new(&similarities, hp)
            .cluster_with(MergeTree::new(n), &NoControl)
            .unwrap();

        let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
        for merge in clustering.dendrogram.merges() {
            let cross: Vec<f64> = members[merge.left]
                .iter()
                .flat_map(|&a| members[merge.right].iter().map(move |&b| (a, b)))
                .map(|(a, b)| distance(a, b))
                .collect();
            let expected = match linkage {
                Linkage::Single => cross.iter().cloned().fold(f64::INFINITY, f64::min),
                Linkage::Complete => cross.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                Linkage::Mean => cross.iter().sum::<f64>() / cross.len() as f64,
            };
            assert!(
                (expected - merge.distance).abs() < 1e-9,
                "{linkage:?} merge of {} and {}: expected {expected}, got {}",
                merge.left,
                merge.right,
                merge.distance
            );
            assert_eq!(members[merge.left].len(), merge.left_size);
            assert_eq!(members[merge.right].len(), merge.right_size);

            let mut joined = std::mem::take(&mut members[merge.retired_id()]);
            joined.append(&mut members[merge.merge_id]);
            members[merge.merge_id] = joined;
        }
    }
}

pub fn test_coherence_cut(configure: Configure) {
    let similarities = two_pairs().with_bounds(0.0, 1.0).unwrap();
    let hp = configure(AgglomerativeHyperParams::builder())
        .linkage(Linkage::Complete)
        .coherence_threshold(0.5)
        .build();
    let clustering = Agglomerative::new(&similarities, hp)
        .cluster_with(MergeTree::new(4), &NoControl)
        .unwrap();
    assert_eq!(vec![vec![0, 1], vec![2, 3]], clustering.groups);
    assert_eq!(Some(0.5), clustering.dendrogram.coherence_threshold());

    let hp = configure(AgglomerativeHyperParams::builder())
        .linkage(Linkage::Complete)
        .coherence_threshold(0.85)
        .build();
    let groups = cluster(&similarities, hp).unwrap();
    assert_eq!(vec![vec![0, 1], vec![2], vec![3]], groups);
}

pub fn test_reuse_finished_dendrogram(configure: Configure) {
    let similarities = two_pairs();
    let hp = configure(AgglomerativeHyperParams::builder())
        .linkage(Linkage::Complete)
        .build();
    let first = Agglomerative::new(&similarities, hp)
        .cluster_with(MergeTree::new(4), &NoControl)
        .unwrap();
    assert_eq!(1, first.groups.len());

    let merges = first.dendrogram.merges().to_vec();
    let hp = configure(AgglomerativeHyperParams::builder()).n_clusters(2).build();
    let second = Agglomerative::new(&similarities, hp)
        .cluster_with(first.dendrogram, &NoControl)
        .unwrap();
    assert_eq!(vec![vec![0, 1], vec![2, 3]], second.groups);
    assert_eq!(merges, second.dendrogram.merges());
}

pub fn test_leaf_count_mismatch(configure: Configure) {
    let similarities = two_pairs();
    let hp = configure(AgglomerativeHyperParams::builder()).build();
    let result = Agglomerative::new(&similarities, hp).cluster_with(MergeTree::new(3), &NoControl);
    assert!(matches!(result, Err(ClusterError::Precondition(..))));
}

pub fn test_capacity_exceeded(configure: Configure) {
    let similarities = two_pairs();
    let hp = configure(AgglomerativeHyperParams::builder())
        .ram_threshold_bytes(0)
        .file_threshold_bytes(40)
        .build();
    let result = cluster(&similarities, hp);
    assert!(matches!(result, Err(ClusterError::Capacity { bytes: 48, limit: 40 })));
}

pub fn test_cancelled_run(configure: Configure) {
    let similarities = line_groups(20);
    let token = CancellationToken::new();
    token.cancel();
    let hp = configure(AgglomerativeHyperParams::builder()).build();
    let result = Agglomerative::new(&similarities, hp).cluster_with(MergeTree::new(20), &token);
    assert!(matches!(result, Err(ClusterError::Cancelled)));
}

pub fn test_non_finite_similarity(configure: Configure) {
    let similarities = FnSimilarity::new(5, |i, j| if i * j == 6 { f64::NAN } else { 0.5 });
    let hp = configure(AgglomerativeHyperParams::builder()).build();
    let result = cluster(&similarities, hp);
    assert!(matches!(result, Err(ClusterError::NonFiniteSimilarity(..))));
}

pub fn test_empty_data(configure: Configure) {
    let similarities = SimilarityMatrix::<f64>::new(Vec::new()).unwrap();
    let hp = configure(AgglomerativeHyperParams::builder()).build();
    let result = cluster(&similarities, hp);
    assert!(matches!(result, Err(ClusterError::EmptyDataset)));
}

pub fn test_interleaf_order_is_a_permutation(configure: Configure) {
    let n = 25;
    let similarities = line_groups(n);
    let hp = configure(AgglomerativeHyperParams::builder())
        .minimize_interleaf_distances(true)
        .build();
    let clustering = Agglomerative::new(&similarities, hp)
        .cluster_with(MergeTree::new(n), &NoControl)
        .unwrap();
    let mut order = clustering.dendrogram.leaf_order();
    assert_eq!(n, order.len());
    order.sort_unstable();
    assert_eq!((0..n).collect::<Vec<_>>(), order);
}

pub fn test_non_finite_declared_bounds_are_scanned(configure: Configure) {
    let matrix = two_pairs();
    let hp = configure(AgglomerativeHyperParams::builder()).build();
    let expected = Agglomerative::new(&matrix, hp)
        .cluster_with(MergeTree::new(4), &NoControl)
        .unwrap();
    for (min, max) in [(Some(f64::NAN), Some(f64::NAN)), (Some(0.0), Some(f64::INFINITY))] {
        let similarities =
            DeclaredBounds { n: 4, min, max, similarity: |i, j| matrix.similarity(i, j) };
        let hp = configure(AgglomerativeHyperParams::builder()).build();
        let actual = Agglomerative::new(&similarities, hp)
            .cluster_with(MergeTree::new(4), &NoControl)
            .unwrap();
        // Same merges, at the same distances, as with the range scanned from scratch
        assert_eq!(expected.dendrogram.merges(), actual.dendrogram.merges());
    }
}

pub fn test_inverted_declared_bounds(configure: Configure) {
    let temp_dir = tempfile::tempdir().unwrap();
    let similarities = DeclaredBounds {
        n: 4,
        min: Some(1.0),
        max: Some(0.0),
        similarity: |i, j| two_pairs().similarity(i, j),
    };
    let watcher = Watcher::default();
    let hp = configure(AgglomerativeHyperParams::builder())
        .ram_threshold_bytes(0)
        .temp_dir(temp_dir.path())
        .build();
    let result = Agglomerative::new(&similarities, hp).cluster_with(MergeTree::new(4), &watcher);
    assert!(matches!(result, Err(ClusterError::Precondition(..))));
    // Rejected before any stage started
    let stages: Vec<Option<Stage>> = watcher.fatal.lock().iter().map(|(stage, _)| *stage).collect();
    assert_eq!(vec![None], stages);
    assert!(is_empty_dir(temp_dir.path()));
}

pub fn test_widest_declared_bounds(configure: Configure) {
    let similarities = DeclaredBounds {
        n: 12,
        min: Some(f64::MIN),
        max: Some(f64::MAX),
        similarity: |i, j| if i % 2 == j % 2 { f64::MAX } else { f64::MIN },
    };
    let hp = configure(AgglomerativeHyperParams::builder()).n_clusters(2).build();
    let clustering = Agglomerative::new(&similarities, hp)
        .cluster_with(MergeTree::new(12), &NoControl)
        .unwrap();
    assert_eq!(11, clustering.dendrogram.merge_count());
    assert_eq!(
        vec![vec![0, 2, 4, 6, 8, 10], vec![1, 3, 5, 7, 9, 11]],
        clustering.groups
    );
    assert_eq!(1.0, clustering.dendrogram.merges()[10].distance);
}

pub fn test_cancelled_while_merging(configure: Configure) {
    let n = 40;
    let similarities = line_groups(n);
    let temp_dir = tempfile::tempdir().unwrap();
    let watcher = Watcher::cancelling_after(0.5);
    let hp = configure(AgglomerativeHyperParams::builder())
        .ram_threshold_bytes(0)
        .temp_dir(temp_dir.path())
        .build();
    let result = Agglomerative::new(&similarities, hp).cluster_with(MergeTree::new(n), &watcher);
    assert!(matches!(result, Err(ClusterError::Cancelled)));
    assert_eq!(Some(Stage::Merge), *watcher.cancelled_in.lock());
    assert!(watcher.fatal.lock().is_empty());
    assert!(is_empty_dir(temp_dir.path()));
}

pub fn test_fatal_error_while_initializing(configure: Configure) {
    let n = 30;
    let position = |i: usize| ((i % 3) * 10) as f64 + ((i * 7) % 5) as f64 * 0.25;
    // Declared bounds skip the scan, so the bad pair is only met once the file store exists
    let similarities = DeclaredBounds {
        n,
        min: Some(-30.0),
        max: Some(0.0),
        similarity: move |i: usize, j: usize| match (i.min(j), i.max(j)) {
            (17, 23) => f64::NAN,
            _ => -(position(i) - position(j)).abs(),
        },
    };
    let temp_dir = tempfile::tempdir().unwrap();
    let watcher = Watcher::default();
    let hp = configure(AgglomerativeHyperParams::builder())
        .ram_threshold_bytes(0)
        .temp_dir(temp_dir.path())
        .build();
    let result = Agglomerative::new(&similarities, hp).cluster_with(MergeTree::new(n), &watcher);
    assert!(matches!(result, Err(ClusterError::NonFiniteSimilarity(..))));
    let fatal = watcher.fatal.lock();
    assert_eq!(1, fatal.len());
    assert_eq!(Some(Stage::InitializeDistances), fatal[0].0);
    assert!(is_empty_dir(temp_dir.path()));
}
