//! Outreach engagement pipeline
//!
//! Predicts whether an outreach action will be engaged with:
//!
//! - [`loader`]: chunked CSV loading into a [`RecordSet`]
//! - [`materialize`]: payload flattening, like-rate day filtering,
//!   categorical encoding and derived flags, identical for training and
//!   inference
//! - [`encoders`]: the categorical encoder registry shared by both paths
//! - [`ensemble`]: k-fold GBDT ensemble with out-of-fold AUC
//! - [`scorer`]: pending → scored → archived batch scoring

pub mod config;
pub mod encoders;
pub mod ensemble;
pub mod errors;
pub mod folds;
pub mod loader;
pub mod materialize;
pub mod metrics;
pub mod scorer;
pub mod table;

use std::path::Path;

use tracing::info;

pub use config::{
    DerivedFlag, EnsembleConfig, FeatureConfig, LoaderConfig, LoggingConfig, PipelineConfig,
    ScoringConfig,
};
pub use encoders::{CategoricalEncoder, Encoded, EncodedColumn, EncoderRegistry};
pub use ensemble::{
    ClassBalance, Classifier, Ensemble, EnsembleReport, EnsembleSummary, EnsembleTrainer,
    FoldReport, GbdtLearner, Learner,
};
pub use errors::{PipelineError, Result};
pub use folds::{FoldSplit, KFold};
pub use loader::RecordLoader;
pub use materialize::{
    FeatureMaterializer, InferenceSet, MaterializeRequest, Materialized, TrainingSet,
};
pub use metrics::roc_auc;
pub use scorer::{BatchJob, BatchScorer, BatchState, DirLock, ScoreRow, ScoringSummary};
pub use table::{Cell, FeatureTable, RecordSet};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Artifacts of one training run, ready for scoring
#[derive(Debug)]
pub struct TrainedPipeline {
    pub loader: RecordLoader,
    pub materializer: FeatureMaterializer,
    pub encoders: EncoderRegistry,
    pub training: TrainingSet,
    pub report: EnsembleReport,
}

impl TrainedPipeline {
    /// Scorer over the configured watch directory using this run's ensemble
    pub fn scorer(&self, config: ScoringConfig) -> BatchScorer<'_> {
        BatchScorer::new(
            config,
            &self.loader,
            &self.materializer,
            &self.encoders,
            &self.report.ensemble,
        )
    }
}

/// Load the training CSV, materialize it and train the k-fold ensemble
pub fn train_ensemble_from_csv(config: &PipelineConfig, input: &Path) -> Result<TrainedPipeline> {
    let loader = RecordLoader::new(config.loader.clone());
    let records = loader.load(input)?;

    let materializer =
        FeatureMaterializer::new(config.features.clone(), loader.payload_column());
    let mut encoders = EncoderRegistry::new();
    let training = materializer.training(&records, &mut encoders)?;

    for (name, stats) in training.table.feature_stats(&training.valid_features) {
        info!(
            feature = %name,
            min = stats.min,
            max = stats.max,
            missing = stats.missing,
            "feature stats"
        );
    }

    let trainer = EnsembleTrainer::new(
        GbdtLearner::new(config.booster.clone()),
        config.ensemble.clone(),
    );
    let report = trainer.train_set(&training)?;

    Ok(TrainedPipeline {
        loader,
        materializer,
        encoders,
        training,
        report,
    })
}
