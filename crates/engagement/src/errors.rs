use std::path::PathBuf;

use outreach_gbdt::BoosterError;
use thiserror::Error;

/// Errors raised by the engagement pipeline.
///
/// Unseen categories and single-class folds are not errors: they resolve
/// to a fallback code and a skipped metric respectively.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to load '{source_name}': {reason}")]
    Load { source_name: String, reason: String },

    #[error("no fitted encoder for categorical column '{column}' (training must run first)")]
    EncoderNotFound { column: String },

    #[error("required column '{column}' is missing")]
    MissingColumn { column: String },

    #[error("row {row}: invalid date '{value}'")]
    InvalidDate { row: usize, value: String },

    #[error("row {row}: invalid label '{value}'")]
    InvalidLabel { row: usize, value: String },

    #[error("cannot split {rows} rows into {folds} folds")]
    InvalidFolds { folds: usize, rows: usize },

    #[error("feature columns missing from table: {}", missing.join(", "))]
    FeatureMismatch { missing: Vec<String> },

    #[error("training failed: {0}")]
    Training(#[from] BoosterError),

    #[error("batch '{}' failed: {source}", path.display())]
    Batch {
        path: PathBuf,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("batch '{}' is {state}, expected {expected}", path.display())]
    InvalidTransition {
        path: PathBuf,
        state: &'static str,
        expected: &'static str,
    },

    #[error("directory '{}' is locked by another scorer: {reason}", path.display())]
    ScorerBusy { path: PathBuf, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
