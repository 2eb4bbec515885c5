//! Gradient Boosted Decision Tree (GBDT) trainer
//!
//! Binary log-loss boosting with exact-greedy CART trees and early stopping
//! on a held-out validation set.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cart::{CartBuilder, TreeConfig};
use crate::dataset::Dataset;
use crate::errors::BoosterError;
use crate::model::{sigmoid, GbdtModel};

/// Deepest tree the builder accepts
pub const MAX_DEPTH: usize = 32;

/// GBDT training configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GbdtConfig {
    /// Hard ceiling on boosting rounds
    pub max_rounds: usize,
    /// Stop once validation loss has not improved for this many rounds
    pub early_stopping_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub lambda: f64,
    pub min_split_gain: f64,
}

impl Default for GbdtConfig {
    fn default() -> Self {
        Self {
            max_rounds: 10_000,
            early_stopping_rounds: 100,
            learning_rate: 0.1,
            max_depth: 6,
            min_samples_leaf: 20,
            lambda: 1.0,
            min_split_gain: 0.0,
        }
    }
}

impl GbdtConfig {
    pub fn validate(&self) -> Result<(), BoosterError> {
        if self.max_rounds == 0 {
            return Err(BoosterError::InvalidParams("max_rounds must be > 0".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(BoosterError::InvalidParams(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.max_depth > MAX_DEPTH {
            return Err(BoosterError::InvalidParams(format!(
                "max_depth must be at most {}, got {}",
                MAX_DEPTH, self.max_depth
            )));
        }
        if self.lambda < 0.0 {
            return Err(BoosterError::InvalidParams(format!(
                "lambda must be non-negative, got {}",
                self.lambda
            )));
        }
        Ok(())
    }

    fn tree_config(&self) -> TreeConfig {
        TreeConfig {
            max_depth: self.max_depth,
            min_samples_leaf: self.min_samples_leaf,
            lambda: self.lambda,
            min_split_gain: self.min_split_gain,
            learning_rate: self.learning_rate,
        }
    }
}

/// GBDT trainer
#[derive(Clone, Debug)]
pub struct GbdtTrainer {
    config: GbdtConfig,
}

impl GbdtTrainer {
    pub fn new(config: GbdtConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GbdtConfig {
        &self.config
    }

    /// Train on `train`, using `valid` to decide when to stop adding trees.
    ///
    /// The returned model is truncated to the round with the lowest
    /// validation log-loss. An empty validation set disables early stopping.
    pub fn train(&self, train: &Dataset, valid: &Dataset) -> Result<GbdtModel, BoosterError> {
        self.config.validate()?;

        if train.is_empty() {
            return Err(BoosterError::Dataset("training set is empty".into()));
        }
        if !valid.is_empty() && valid.feature_count != train.feature_count {
            return Err(BoosterError::FeatureSizeMismatch {
                expected: train.feature_count,
                actual: valid.feature_count,
            });
        }

        let base_score = initial_margin(train.positive_rate());
        let mut train_margin = vec![base_score; train.len()];
        let mut valid_margin = vec![base_score; valid.len()];

        let tree_config = self.config.tree_config();
        let mut trees = Vec::new();
        let mut best_loss = f64::INFINITY;
        let mut best_round = 0usize;

        for round in 0..self.config.max_rounds {
            let (gradients, hessians) = gradients_hessians(train, &train_margin);

            let builder =
                CartBuilder::new(&train.features, &gradients, &hessians, tree_config.clone());
            let tree = builder.build();

            for (margin, row) in train_margin.iter_mut().zip(&train.features) {
                *margin += tree.evaluate(row);
            }
            for (margin, row) in valid_margin.iter_mut().zip(&valid.features) {
                *margin += tree.evaluate(row);
            }
            trees.push(tree);

            if valid.is_empty() {
                best_round = round + 1;
                continue;
            }

            let loss = log_loss(valid, &valid_margin);
            if loss < best_loss {
                best_loss = loss;
                best_round = round + 1;
            } else if round + 1 - best_round >= self.config.early_stopping_rounds {
                debug!(
                    round = round + 1,
                    best_round, best_loss, "early stopping: validation loss stalled"
                );
                break;
            }
        }

        trees.truncate(best_round);

        Ok(GbdtModel {
            base_score,
            trees,
            feature_count: train.feature_count,
            best_iteration: best_round,
            best_valid_loss: best_loss.is_finite().then_some(best_loss),
        })
    }
}

/// Log-odds of the positive rate, clamped away from 0 and 1
fn initial_margin(rate: f64) -> f64 {
    let p = rate.clamp(1e-6, 1.0 - 1e-6);
    (p / (1.0 - p)).ln()
}

/// Weighted first and second derivatives of the log-loss
fn gradients_hessians(dataset: &Dataset, margins: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = dataset.len();
    let mut gradients = Vec::with_capacity(n);
    let mut hessians = Vec::with_capacity(n);

    for i in 0..n {
        let p = sigmoid(margins[i]);
        let w = dataset.weights[i];
        gradients.push((p - dataset.targets[i]) * w);
        hessians.push((p * (1.0 - p)).max(1e-16) * w);
    }

    (gradients, hessians)
}

/// Weighted mean binary log-loss
pub fn log_loss(dataset: &Dataset, margins: &[f64]) -> f64 {
    let mut total = 0.0;
    let mut weight = 0.0;

    for i in 0..dataset.len() {
        let p = sigmoid(margins[i]).clamp(1e-15, 1.0 - 1e-15);
        let y = dataset.targets[i];
        let w = dataset.weights[i];
        total -= w * (y * p.ln() + (1.0 - y) * (1.0 - p).ln());
        weight += w;
    }

    if weight > 0.0 {
        total / weight
    } else {
        0.0
    }
}
