//! Condensed storage of the pairwise distance matrix.
//!
//! Only the strict upper triangle is kept, flattened row by row, so `n` records need
//! `n(n-1)/2` slots. A pair `(i, j)` with `i < j` lives at
//!
//! ```text
//! position(i, j) = n(n-1)/2 - (n-i)(n-i-1)/2 + j - i - 1
//! ```
//!
//! Small matrices are held in memory, larger ones in a temporary file. Both backends expose the
//! same `&self` interface so that workers can share a single store, each touching a disjoint set
//! of positions.

use crate::{ClusterError, Result};
use std::path::PathBuf;
use tracing::debug;

pub(crate) mod file;
pub(crate) mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

const DISTANCE_BYTES: u64 = std::mem::size_of::<f64>() as u64;
pub(crate) const RAM_THRESHOLD_DEFAULT: u64 = 512 * 1024 * 1024;
pub(crate) const FILE_THRESHOLD_DEFAULT: u64 = 256 * 1024 * 1024 * 1024;

/// Where a distance store keeps its values.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    File,
}

/// A condensed, symmetric distance matrix over `n` records.
pub trait DistanceStore: Send + Sync {
    /// Number of records the store was created for.
    fn n(&self) -> usize;

    fn backend(&self) -> StoreBackend;

    /// Reads `out.len()` consecutive positions starting at `start`.
    fn read_run(&self, start: usize, out: &mut [f64]) -> Result<()>;

    /// Writes `values` to consecutive positions starting at `start`.
    fn write_run(&self, start: usize, values: &[f64]) -> Result<()>;

    /// Number of stored distances.
    fn len(&self) -> usize {
        condensed_len(self.n())
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, i: usize, j: usize) -> Result<f64> {
        let mut value = [0.0];
        self.read_run(position(self.n(), i, j)?, &mut value)?;
        Ok(value[0])
    }

    fn set(&self, i: usize, j: usize, value: f64) -> Result<()> {
        self.write_run(position(self.n(), i, j)?, &[value])
    }

    /// Reads the distance of every pair into `out`. Pairs whose positions follow each other
    /// are fetched with one call to the backend. `out` must hold one value per pair.
    fn get_many(&self, pairs: &[(usize, usize)], out: &mut [f64]) -> Result<()> {
        check_buffer(pairs.len(), out.len())?;
        let positions = positions_of(self.n(), pairs)?;
        for (from, to) in contiguous_runs(&positions) {
            self.read_run(positions[from], &mut out[from..to])?;
        }
        Ok(())
    }

    /// Writes `values[k]` at `pairs[k]`, batching contiguous positions like `get_many`.
    fn set_many(&self, pairs: &[(usize, usize)], values: &[f64]) -> Result<()> {
        check_buffer(pairs.len(), values.len())?;
        let positions = positions_of(self.n(), pairs)?;
        for (from, to) in contiguous_runs(&positions) {
            self.write_run(positions[from], &values[from..to])?;
        }
        Ok(())
    }

    /// Reads every distance from record `i` into `out`, which must hold `n` values.
    /// `out[i]` is left untouched.
    fn read_row(&self, i: usize, out: &mut [f64]) -> Result<()> {
        let n = self.n();
        if i >= n {
            return Err(ClusterError::Index { i, j: i, n });
        }
        if out.len() < n {
            return Err(ClusterError::precondition(format!(
                "Row buffer holds {} values but a row has {n}",
                out.len()
            )));
        }
        let column: Vec<(usize, usize)> = (0..i).map(|k| (k, i)).collect();
        self.get_many(&column, &mut out[..i])?;
        if i + 1 < n {
            self.read_run(position(n, i, i + 1)?, &mut out[i + 1..n])?;
        }
        Ok(())
    }
}

/// Number of slots needed for `n` records.
pub fn condensed_len(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

/// Position of the pair `(i, j)` in the condensed layout. The order of `i` and `j` does not
/// matter.
pub fn position(n: usize, i: usize, j: usize) -> Result<usize> {
    if i == j || i >= n || j >= n {
        return Err(ClusterError::Index { i, j, n });
    }
    let (i, j) = if i < j { (i, j) } else { (j, i) };
    Ok(condensed_len(n) - (n - i) * (n - i - 1) / 2 + j - i - 1)
}

/// Inverse of `position`: the pair `(i, j)`, `i < j`, stored at `pos`.
///
/// Row `i` holds `m = n - i - 1` pairs, so the number of slots from `pos` to the end of the
/// layout, `r`, satisfies `m(m-1)/2 < r <= m(m+1)/2`. `m` is solved from the quadratic and
/// then nudged to absorb floating point error.
pub fn pair_at(n: usize, pos: usize) -> Result<(usize, usize)> {
    let len = condensed_len(n);
    if pos >= len {
        return Err(ClusterError::PositionOutOfRange { start: pos, end: pos + 1, len });
    }
    let remaining = len - pos;
    let estimate = ((1.0 + 8.0 * remaining as f64).sqrt() - 1.0) / 2.0;
    let mut m = estimate.ceil() as usize;
    while m * (m + 1) / 2 < remaining {
        m += 1;
    }
    while m > 1 && (m - 1) * m / 2 >= remaining {
        m -= 1;
    }
    let i = n - 1 - m;
    let row_start = len - (n - i) * (n - i - 1) / 2;
    Ok((i, pos - row_start + i + 1))
}

fn positions_of(n: usize, pairs: &[(usize, usize)]) -> Result<Vec<usize>> {
    pairs.iter().map(|&(i, j)| position(n, i, j)).collect()
}

/// Splits `positions` into maximal `[from, to)` index ranges of consecutive positions.
fn contiguous_runs(positions: &[usize]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut from = 0;
    for k in 1..=positions.len() {
        if k == positions.len() || positions[k] != positions[k - 1] + 1 {
            runs.push((from, k));
            from = k;
        }
    }
    runs
}

fn check_buffer(pairs: usize, values: usize) -> Result<()> {
    if pairs != values {
        return Err(ClusterError::precondition(format!(
            "{pairs} pairs but the buffer holds {values} values"
        )));
    }
    Ok(())
}

pub(crate) fn check_run(start: usize, count: usize, len: usize) -> Result<()> {
    if start + count > len {
        return Err(ClusterError::PositionOutOfRange { start, end: start + count, len });
    }
    Ok(())
}

/// Chooses the storage backend for a distance matrix from its size in bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreFactory {
    ram_threshold: u64,
    file_threshold: u64,
    temp_dir: Option<PathBuf>,
}

impl Default for StoreFactory {
    fn default() -> Self {
        StoreFactory::new(RAM_THRESHOLD_DEFAULT, FILE_THRESHOLD_DEFAULT)
    }
}

impl StoreFactory {
    /// # Parameters
    /// * `ram_threshold` - largest matrix, in bytes, kept in memory
    /// * `file_threshold` - largest matrix, in bytes, kept in a temporary file
    pub fn new(ram_threshold: u64, file_threshold: u64) -> Self {
        StoreFactory { ram_threshold, file_threshold, temp_dir: None }
    }

    /// Directory for file backed stores. Defaults to the system temporary directory.
    pub fn with_temp_dir(mut self, temp_dir: Option<PathBuf>) -> Self {
        self.temp_dir = temp_dir;
        self
    }

    /// Bytes needed to hold the distances between `n` records.
    pub fn required_bytes(n: usize) -> u64 {
        let n = n as u128;
        let slots = n * n.saturating_sub(1) / 2;
        (slots * DISTANCE_BYTES as u128).min(u64::MAX as u128) as u64
    }

    /// The backend a store for `n` records would get, or a capacity error.
    pub fn select_backend(&self, n: usize) -> Result<StoreBackend> {
        let bytes = Self::required_bytes(n);
        if bytes <= self.ram_threshold {
            Ok(StoreBackend::Memory)
        } else if bytes <= self.file_threshold && n <= u32::MAX as usize {
            Ok(StoreBackend::File)
        } else {
            Err(ClusterError::Capacity { bytes, limit: self.file_threshold })
        }
    }

    /// Creates a zeroed store for `n` records.
    pub fn create(&self, n: usize) -> Result<Box<dyn DistanceStore>> {
        let backend = self.select_backend(n)?;
        debug!(
            n_samples = n,
            bytes = Self::required_bytes(n),
            ?backend,
            "Allocating distance store"
        );
        match backend {
            StoreBackend::Memory => Ok(Box::new(MemoryStore::new(n))),
            StoreBackend::File => Ok(Box::new(FileStore::create(n, self.temp_dir.as_deref())?)),
        }
    }
}
