use crate::{ClusterError, Result};
use num_traits::Float;

/// Source of pairwise similarities between the records being clustered.
///
/// Larger values mean more similar. Implementations are read from several worker threads at
/// once, hence the `Sync` bound.
pub trait SimilarityProvider: Sync {
    /// Number of records.
    fn record_count(&self) -> usize;

    /// Similarity between records `i` and `j`, `i != j`. Must be symmetric.
    fn similarity(&self, i: usize, j: usize) -> f64;

    /// Largest similarity the provider can produce, if known up front. When either bound is
    /// unknown or not finite both are found by scanning every pair. A declared minimum above
    /// the declared maximum is rejected before clustering starts.
    fn max_possible(&self) -> Option<f64> {
        None
    }

    /// Smallest similarity the provider can produce, if known up front.
    fn min_possible(&self) -> Option<f64> {
        None
    }
}

/// Maps similarities onto distances in `[0, 1]`: `(max - similarity) / (max - min)`, or 0 when
/// all similarities are equal.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SimilarityScale {
    half_max: f64,
    half_range: f64,
}

impl SimilarityScale {
    /// Everything is held at half scale so that `max - min` cannot overflow for finite bounds.
    /// Halving is exact, so distances are unchanged.
    pub fn new(min: f64, max: f64) -> Self {
        SimilarityScale { half_max: max / 2.0, half_range: max / 2.0 - min / 2.0 }
    }

    pub fn distance(&self, similarity: f64) -> f64 {
        if self.half_range == 0.0 {
            0.0
        } else {
            (self.half_max - similarity / 2.0) / self.half_range
        }
    }
}

/// A dense, symmetric similarity matrix. Generic over floating point numeric types.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix<T> {
    values: Vec<Vec<T>>,
    bounds: Option<(f64, f64)>,
}

impl<T: Float + Sync> SimilarityMatrix<T> {
    /// Wraps a square, symmetric matrix of finite similarities. The diagonal is never read.
    ///
    /// # Returns
    /// * The matrix, or a precondition error if it is not square or not symmetric, or a non
    ///   finite similarity error if an off diagonal value is infinite or NaN.
    ///
    /// # Examples
    /// ```
    ///use agglomerate::SimilarityMatrix;
    ///
    ///let similarities = SimilarityMatrix::new(vec![
    ///    vec![1.0, 0.8, 0.1],
    ///    vec![0.8, 1.0, 0.2],
    ///    vec![0.1, 0.2, 1.0],
    ///]).unwrap();
    /// ```
    pub fn new(values: Vec<Vec<T>>) -> Result<Self> {
        let matrix = SimilarityMatrix { values, bounds: None };
        matrix.validate()?;
        Ok(matrix)
    }

    /// Declares the range similarities are drawn from, sparing the scan for extremes. Distances
    /// are then relative to this range rather than to the observed one.
    pub fn with_bounds(mut self, min: f64, max: f64) -> Result<Self> {
        if !(min.is_finite() && max.is_finite()) || min > max {
            return Err(ClusterError::precondition(format!(
                "Similarity bounds must be finite with min <= max, got [{min}, {max}]"
            )));
        }
        self.bounds = Some((min, max));
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        let n = self.values.len();
        if let Some(row) = self.values.iter().position(|row| row.len() != n) {
            return Err(ClusterError::precondition(format!(
                "Similarity matrix must be square: {n} rows but row {row} has {} values",
                self.values[row].len()
            )));
        }
        for i in 0..n {
            for j in (i + 1)..n {
                let (a, b) = (self.values[i][j], self.values[j][i]);
                if !a.is_finite() || !b.is_finite() {
                    return Err(ClusterError::NonFiniteSimilarity(format!(
                        "pair ({i}, {j}) is not finite"
                    )));
                }
                if (a - b).abs() > T::epsilon() {
                    return Err(ClusterError::precondition(format!(
                        "Similarity matrix must be symmetric, ({i}, {j}) differs from ({j}, {i})"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl<T: Float + Sync> SimilarityProvider for SimilarityMatrix<T> {
    fn record_count(&self) -> usize {
        self.values.len()
    }

    fn similarity(&self, i: usize, j: usize) -> f64 {
        self.values[i][j].to_f64().unwrap_or(f64::NAN)
    }

    fn max_possible(&self) -> Option<f64> {
        self.bounds.map(|(_, max)| max)
    }

    fn min_possible(&self) -> Option<f64> {
        self.bounds.map(|(min, _)| min)
    }
}

/// Similarities computed on demand by a closure.
pub struct FnSimilarity<F> {
    n: usize,
    func: F,
}

impl<F> FnSimilarity<F>
where
    F: Fn(usize, usize) -> f64 + Sync,
{
    pub fn new(n: usize, func: F) -> Self {
        FnSimilarity { n, func }
    }
}

impl<F> SimilarityProvider for FnSimilarity<F>
where
    F: Fn(usize, usize) -> f64 + Sync,
{
    fn record_count(&self) -> usize {
        self.n
    }

    fn similarity(&self, i: usize, j: usize) -> f64 {
        (self.func)(i, j)
    }
}
