use thiserror::Error;

/// Errors returned by the boosting trainer.
#[derive(Debug, Error)]
pub enum BoosterError {
    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("feature size mismatch: expected {expected}, got {actual}")]
    FeatureSizeMismatch { expected: usize, actual: usize },
}
