use crate::coordinator::Phase;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClusterError>;

/// Possible errors that arise while clustering. Everything except `Cancelled` is fatal to the
/// run; `Cancelled` only means the caller asked the run to stop.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("The similarity input is empty")]
    EmptyDataset,
    #[error("Precondition failed: {0}")]
    Precondition(String),
    #[error("Non finite similarity: {0}")]
    NonFiniteSimilarity(String),
    #[error("Distance matrix needs {bytes} bytes, more than the file backed limit of {limit} bytes")]
    Capacity { bytes: u64, limit: u64 },
    #[error("Pair ({i}, {j}) is not a valid distance index for {n} records")]
    Index { i: usize, j: usize, n: usize },
    #[error("Positions {start}..{end} fall outside a distance store of length {len}")]
    PositionOutOfRange { start: usize, end: usize, len: usize },
    #[error("Distance store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("No nearest neighbours found while {active} nodes are still active")]
    NoNeighboursFound { active: usize },
    #[error("The {phase} phase failed: {message}")]
    PhaseFailure { phase: Phase, message: String },
    #[error("Clustering was cancelled")]
    Cancelled,
}

impl ClusterError {
    pub(crate) fn precondition(message: impl Into<String>) -> Self {
        ClusterError::Precondition(message.into())
    }

    /// Whether this is a genuine failure rather than a cooperative stop.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ClusterError::Cancelled)
    }
}
