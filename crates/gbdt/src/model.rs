//! Trained GBDT model and probability inference

use serde::{Deserialize, Serialize};

use crate::errors::BoosterError;
use crate::tree::Tree;

/// Binary classifier produced by [`crate::GbdtTrainer`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GbdtModel {
    /// Initial margin (log-odds of the training positive rate)
    pub base_score: f64,
    /// Trees with shrinkage already applied to their leaves
    pub trees: Vec<Tree>,
    pub feature_count: usize,
    /// Number of rounds kept after early stopping
    pub best_iteration: usize,
    /// Validation log-loss at `best_iteration`, if a validation set was used
    pub best_valid_loss: Option<f64>,
}

impl GbdtModel {
    /// Raw margin (log-odds) for one row
    pub fn margin(&self, features: &[f64]) -> f64 {
        self.trees
            .iter()
            .fold(self.base_score, |acc, tree| acc + tree.evaluate(features))
    }

    /// Positive-class probability for one row
    pub fn predict_row(&self, features: &[f64]) -> f64 {
        sigmoid(self.margin(features))
    }

    /// Positive-class probabilities for every row
    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, BoosterError> {
        rows.iter()
            .map(|row| {
                if row.len() != self.feature_count {
                    return Err(BoosterError::FeatureSizeMismatch {
                        expected: self.feature_count,
                        actual: row.len(),
                    });
                }
                Ok(self.predict_row(row))
            })
            .collect()
    }

    /// Validate every tree's structure
    pub fn validate(&self) -> Result<(), BoosterError> {
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate()
                .map_err(|reason| BoosterError::Dataset(format!("tree {}: {}", i, reason)))?;
        }
        Ok(())
    }
}

/// Logistic function
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
