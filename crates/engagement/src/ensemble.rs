//! K-fold ensemble training with out-of-fold evaluation
//!
//! One model is fitted per fold on the fold's training rows, with the
//! fold's validation rows driving early stopping. Each row's out-of-fold
//! prediction comes from the single model that held it out. The fitted
//! models form the [`Ensemble`] whose averaged output scores new batches.

use outreach_gbdt::{BoosterError, Dataset, GbdtConfig, GbdtModel, GbdtTrainer};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EnsembleConfig;
use crate::errors::{PipelineError, Result};
use crate::folds::{FoldSplit, KFold};
use crate::materialize::TrainingSet;
use crate::metrics::roc_auc;
use crate::table::FeatureTable;

/// A fitted binary classifier usable as an ensemble member
pub trait Classifier: Send + Sync {
    /// Positive-class probability for each row
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>>;

    /// Boosting rounds kept after early stopping, if meaningful
    fn iterations(&self) -> Option<usize> {
        None
    }
}

impl Classifier for GbdtModel {
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        GbdtModel::predict(self, rows).map_err(PipelineError::from)
    }

    fn iterations(&self) -> Option<usize> {
        Some(self.best_iteration)
    }
}

/// Fits one classifier from a training subset and a validation subset
pub trait Learner: Sync {
    type Model: Classifier;

    fn fit(&self, train: &Dataset, valid: &Dataset) -> Result<Self::Model>;
}

/// [`Learner`] backed by the gradient-boosting trainer
#[derive(Debug, Clone)]
pub struct GbdtLearner {
    trainer: GbdtTrainer,
}

impl GbdtLearner {
    pub fn new(config: GbdtConfig) -> Self {
        Self {
            trainer: GbdtTrainer::new(config),
        }
    }
}

impl Learner for GbdtLearner {
    type Model = GbdtModel;

    fn fit(&self, train: &Dataset, valid: &Dataset) -> Result<GbdtModel> {
        let model = self.trainer.train(train, valid)?;
        model.validate()?;
        Ok(model)
    }
}

/// Label counts and the negative/positive ratio
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassBalance {
    pub positives: usize,
    pub negatives: usize,
    /// `negatives / positives`; `None` without positives
    pub scale_pos_weight: Option<f64>,
}

impl ClassBalance {
    pub fn from_labels(labels: &[bool]) -> Self {
        let positives = labels.iter().filter(|&&l| l).count();
        let negatives = labels.len() - positives;
        Self {
            positives,
            negatives,
            scale_pos_weight: (positives > 0).then(|| negatives as f64 / positives as f64),
        }
    }
}

/// Outcome of a single fold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldReport {
    pub fold: usize,
    pub train_rows: usize,
    pub valid_rows: usize,
    /// `None` when the validation rows hold a single class
    pub auc: Option<f64>,
    pub iterations: Option<usize>,
}

/// Per-fold models sharing one feature layout
#[derive(Debug, Clone)]
pub struct Ensemble<M = GbdtModel> {
    pub models: Vec<M>,
    /// Training feature names, in model input order
    pub feature_names: Vec<String>,
}

impl<M: Classifier> Ensemble<M> {
    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Row-wise mean of every member's prediction over `table`, projected
    /// onto the training feature names
    pub fn predict(&self, table: &FeatureTable) -> Result<Vec<f64>> {
        let rows = table.matrix(&self.feature_names)?;
        self.predict_rows(&rows)
    }

    pub fn predict_rows(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        if self.models.is_empty() {
            return Err(BoosterError::InvalidParams("ensemble has no models".into()).into());
        }

        let mut sums = vec![0.0; rows.len()];
        for model in &self.models {
            for (sum, p) in sums.iter_mut().zip(model.predict(rows)?) {
                *sum += p;
            }
        }

        let count = self.models.len() as f64;
        Ok(sums.into_iter().map(|s| s / count).collect())
    }
}

/// Everything produced by a training run
#[derive(Debug, Clone)]
pub struct EnsembleReport<M = GbdtModel> {
    pub ensemble: Ensemble<M>,
    /// One prediction per training row, from the fold that held it out
    pub oof_predictions: Vec<f64>,
    pub folds: Vec<FoldReport>,
    pub overall_auc: Option<f64>,
    pub class_balance: ClassBalance,
}

/// Serializable view of an [`EnsembleReport`] without the models
#[derive(Debug, Clone, Serialize)]
pub struct EnsembleSummary {
    pub models: usize,
    pub feature_names: Vec<String>,
    pub folds: Vec<FoldReport>,
    pub overall_auc: Option<f64>,
    pub class_balance: ClassBalance,
    pub oof_predictions: Vec<f64>,
}

impl<M: Classifier> EnsembleReport<M> {
    pub fn summary(&self) -> EnsembleSummary {
        EnsembleSummary {
            models: self.ensemble.len(),
            feature_names: self.ensemble.feature_names.clone(),
            folds: self.folds.clone(),
            overall_auc: self.overall_auc,
            class_balance: self.class_balance,
            oof_predictions: self.oof_predictions.clone(),
        }
    }
}

/// Trains one model per fold with a [`Learner`]
#[derive(Debug, Clone)]
pub struct EnsembleTrainer<L> {
    learner: L,
    config: EnsembleConfig,
}

impl<L: Learner> EnsembleTrainer<L> {
    pub fn new(learner: L, config: EnsembleConfig) -> Self {
        Self { learner, config }
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Train on a materialized training set with the configured fold count
    pub fn train_set(&self, set: &TrainingSet) -> Result<EnsembleReport<L::Model>> {
        self.train(&set.table, &set.valid_features, &set.labels, self.config.folds)
    }

    /// Train `k` fold models over the `features` columns of `table`
    pub fn train(
        &self,
        table: &FeatureTable,
        features: &[String],
        labels: &[bool],
        k: usize,
    ) -> Result<EnsembleReport<L::Model>> {
        if table.len() != labels.len() {
            return Err(BoosterError::Dataset(format!(
                "{} table rows but {} labels",
                table.len(),
                labels.len()
            ))
            .into());
        }

        let class_balance = ClassBalance::from_labels(labels);
        info!(
            positives = class_balance.positives,
            negatives = class_balance.negatives,
            scale_pos_weight = ?class_balance.scale_pos_weight,
            "class balance"
        );

        let dataset = self.dataset(table, features, labels, &class_balance)?;
        let splits = KFold::new(k, self.config.seed).split(dataset.len())?;

        let fitted: Vec<(L::Model, Vec<f64>)> = if self.config.parallel {
            splits
                .par_iter()
                .enumerate()
                .map(|(fold, split)| self.fit_fold(fold, &dataset, split))
                .collect::<Result<_>>()?
        } else {
            splits
                .iter()
                .enumerate()
                .map(|(fold, split)| self.fit_fold(fold, &dataset, split))
                .collect::<Result<_>>()?
        };

        let mut oof_predictions = vec![f64::NAN; dataset.len()];
        let mut folds = Vec::with_capacity(k);
        let mut models = Vec::with_capacity(k);

        for (fold, (split, (model, predictions))) in splits.iter().zip(fitted).enumerate() {
            let valid_labels: Vec<bool> = split.valid.iter().map(|&i| labels[i]).collect();
            for (&row, &p) in split.valid.iter().zip(&predictions) {
                oof_predictions[row] = p;
            }

            let auc = roc_auc(&valid_labels, &predictions);
            match auc {
                Some(score) => info!(fold, score, "fold score"),
                None => warn!(
                    fold,
                    valid_rows = split.valid.len(),
                    "degenerate fold: validation rows hold a single class, skipping metric"
                ),
            }

            folds.push(FoldReport {
                fold,
                train_rows: split.train.len(),
                valid_rows: split.valid.len(),
                auc,
                iterations: model.iterations(),
            });
            models.push(model);
        }

        let overall_auc = roc_auc(labels, &oof_predictions);
        match overall_auc {
            Some(score) => info!(score, "overall score"),
            None => warn!("overall score undefined: labels hold a single class"),
        }

        Ok(EnsembleReport {
            ensemble: Ensemble {
                models,
                feature_names: features.to_vec(),
            },
            oof_predictions,
            folds,
            overall_auc,
            class_balance,
        })
    }

    fn dataset(
        &self,
        table: &FeatureTable,
        features: &[String],
        labels: &[bool],
        balance: &ClassBalance,
    ) -> Result<Dataset> {
        let matrix = table.matrix(features)?;
        let targets: Vec<f64> = labels.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();

        let positive_weight = match (self.config.use_class_weight, balance.scale_pos_weight) {
            (true, Some(weight)) => weight,
            _ => 1.0,
        };
        let weights = labels
            .iter()
            .map(|&l| if l { positive_weight } else { 1.0 })
            .collect();

        Ok(Dataset::with_weights(matrix, targets, weights)?)
    }

    fn fit_fold(
        &self,
        fold: usize,
        dataset: &Dataset,
        split: &FoldSplit,
    ) -> Result<(L::Model, Vec<f64>)> {
        let train = dataset.subset(&split.train);
        let valid = dataset.subset(&split.valid);
        debug!(fold, train_rows = train.len(), valid_rows = valid.len(), "fitting fold");

        let model = self.learner.fit(&train, &valid)?;
        let predictions = model.predict(&valid.features)?;
        Ok((model, predictions))
    }
}
