use crate::dendrogram::Dendrogram;
use crate::hyper_parameters::{AgglomerativeHyperParams, ClusterCut};
use crate::{ClusterError, Result};

/// Checks a run's inputs before any distances are computed.
pub(crate) struct DataValidator<'a, D> {
    n_samples: usize,
    dendrogram: &'a D,
    hp: &'a AgglomerativeHyperParams,
    declared_range: (Option<f64>, Option<f64>),
}

impl<'a, D: Dendrogram> DataValidator<'a, D> {
    pub(crate) fn new(n_samples: usize, dendrogram: &'a D, hp: &'a AgglomerativeHyperParams) -> Self {
        Self { n_samples, dendrogram, hp, declared_range: (None, None) }
    }

    /// The similarity bounds the provider declares, if any.
    pub(crate) fn declared_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.declared_range = (min, max);
        self
    }

    pub(crate) fn validate_input_data(&self) -> Result<()> {
        if self.n_samples == 0 {
            return Err(ClusterError::EmptyDataset);
        }
        self.validate_dendrogram()?;
        self.validate_declared_range()?;
        if let ClusterCut::Coherence(threshold) = self.hp.cut {
            if !threshold.is_finite() {
                return Err(ClusterError::precondition(format!(
                    "Coherence threshold must be finite, got {threshold}"
                )));
            }
        }
        Ok(())
    }

    fn validate_dendrogram(&self) -> Result<()> {
        let leaf_count = self.dendrogram.leaf_count();
        if leaf_count != self.n_samples {
            return Err(ClusterError::precondition(format!(
                "Dendrogram has {leaf_count} leaves but there are {} records",
                self.n_samples
            )));
        }
        let merge_count = self.dendrogram.merge_count();
        if merge_count != 0 && !self.dendrogram.is_finished() {
            return Err(ClusterError::precondition(format!(
                "A reused dendrogram must be finished or empty, this one has {merge_count} of {} \
                merges",
                leaf_count - 1
            )));
        }
        Ok(())
    }

    /// Non-finite bounds are ignored and the range is scanned instead, so only finite bounds
    /// can be inverted.
    fn validate_declared_range(&self) -> Result<()> {
        if let (Some(min), Some(max)) = self.declared_range {
            if min.is_finite() && max.is_finite() && min > max {
                return Err(ClusterError::precondition(format!(
                    "Declared similarity bounds are inverted: min {min} is above max {max}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MergeTree;

    #[test]
    fn empty_dataset() {
        let hp = AgglomerativeHyperParams::default();
        let tree = MergeTree::new(0);
        let result = DataValidator::new(0, &tree, &hp).validate_input_data();
        assert!(matches!(result, Err(ClusterError::EmptyDataset)));
    }

    #[test]
    fn leaf_count_must_match() {
        let hp = AgglomerativeHyperParams::default();
        let tree = MergeTree::new(4);
        let result = DataValidator::new(5, &tree, &hp).validate_input_data();
        assert!(matches!(result, Err(ClusterError::Precondition(..))));
    }

    #[test]
    fn partially_merged_dendrogram_is_rejected() {
        let hp = AgglomerativeHyperParams::default();
        let mut tree = MergeTree::new(4);
        tree.merge_nodes(0, 1, 0.1);
        let result = DataValidator::new(4, &tree, &hp).validate_input_data();
        assert!(matches!(result, Err(ClusterError::Precondition(..))));

        tree.merge_nodes(0, 2, 0.2);
        tree.merge_nodes(0, 3, 0.3);
        assert!(DataValidator::new(4, &tree, &hp).validate_input_data().is_ok());
    }

    #[test]
    fn coherence_threshold_must_be_finite() {
        let hp = AgglomerativeHyperParams::builder()
            .coherence_threshold(f64::NAN)
            .build();
        let tree = MergeTree::new(3);
        let result = DataValidator::new(3, &tree, &hp).validate_input_data();
        assert!(matches!(result, Err(ClusterError::Precondition(..))));
    }

    #[test]
    fn declared_bounds_must_not_be_inverted() {
        let hp = AgglomerativeHyperParams::default();
        let tree = MergeTree::new(3);
        let inverted = DataValidator::new(3, &tree, &hp)
            .declared_range(Some(1.0), Some(0.0))
            .validate_input_data();
        assert!(matches!(inverted, Err(ClusterError::Precondition(..))));

        let accepted = [(Some(0.0), Some(0.0)), (Some(f64::NAN), Some(0.0)), (None, Some(-1.0))];
        for (min, max) in accepted {
            let result = DataValidator::new(3, &tree, &hp)
                .declared_range(min, max)
                .validate_input_data();
            assert!(result.is_ok());
        }
    }
}
