//! In-memory training matrices
//!
//! Row-major `f64` features with binary targets and per-row weights.
//! Missing values are carried as NaN.

use crate::errors::BoosterError;

/// Training dataset with float features and 0/1 targets
#[derive(Clone, Debug)]
pub struct Dataset {
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
    pub weights: Vec<f64>,
    pub feature_count: usize,
}

/// Per-feature summary used for logging and validation
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureStats {
    pub min: f64,
    pub max: f64,
    pub missing: usize,
}

impl Dataset {
    /// Build a dataset with unit weights
    pub fn new(features: Vec<Vec<f64>>, targets: Vec<f64>) -> Result<Self, BoosterError> {
        let weights = vec![1.0; targets.len()];
        Self::with_weights(features, targets, weights)
    }

    /// Build a dataset with explicit per-row weights
    pub fn with_weights(
        features: Vec<Vec<f64>>,
        targets: Vec<f64>,
        weights: Vec<f64>,
    ) -> Result<Self, BoosterError> {
        if features.len() != targets.len() || features.len() != weights.len() {
            return Err(BoosterError::Dataset(format!(
                "row count mismatch: {} feature rows, {} targets, {} weights",
                features.len(),
                targets.len(),
                weights.len()
            )));
        }

        let feature_count = features.first().map(|row| row.len()).unwrap_or(0);
        for row in &features {
            if row.len() != feature_count {
                return Err(BoosterError::FeatureSizeMismatch {
                    expected: feature_count,
                    actual: row.len(),
                });
            }
        }

        if let Some(bad) = targets.iter().find(|&&t| t != 0.0 && t != 1.0) {
            return Err(BoosterError::Dataset(format!(
                "targets must be 0 or 1, found {}",
                bad
            )));
        }

        Ok(Self {
            features,
            targets,
            weights,
            feature_count,
        })
    }

    /// Copy out the rows at `indices`, in the given order
    pub fn subset(&self, indices: &[usize]) -> Self {
        Self {
            features: indices.iter().map(|&i| self.features[i].clone()).collect(),
            targets: indices.iter().map(|&i| self.targets[i]).collect(),
            weights: indices.iter().map(|&i| self.weights[i]).collect(),
            feature_count: self.feature_count,
        }
    }

    /// Get number of samples
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Check if dataset is empty
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Weighted share of positive targets
    pub fn positive_rate(&self) -> f64 {
        let total: f64 = self.weights.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        let positive: f64 = self
            .targets
            .iter()
            .zip(&self.weights)
            .map(|(t, w)| t * w)
            .sum();
        positive / total
    }

    /// Get feature statistics for validation
    pub fn feature_stats(&self) -> Vec<FeatureStats> {
        let mut stats = vec![
            FeatureStats {
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
                missing: 0,
            };
            self.feature_count
        ];

        for row in &self.features {
            for (i, &val) in row.iter().enumerate() {
                if val.is_nan() {
                    stats[i].missing += 1;
                } else {
                    stats[i].min = stats[i].min.min(val);
                    stats[i].max = stats[i].max.max(val);
                }
            }
        }

        stats
    }
}
