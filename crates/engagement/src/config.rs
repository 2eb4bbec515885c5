//! Pipeline configuration
//!
//! Every field has a default reproducing the reference deployment. Values
//! can be overridden from a TOML file and then from `OUTREACH_*` environment
//! variables, using `__` between section and key
//! (e.g. `OUTREACH_ENSEMBLE__FOLDS=10`).

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use outreach_gbdt::GbdtConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{PipelineError, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub loader: LoaderConfig,
    pub features: FeatureConfig,
    pub ensemble: EnsembleConfig,
    pub booster: GbdtConfig,
    pub scoring: ScoringConfig,
    pub logging: LoggingConfig,
}

/// Raw record loading
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Rows read per chunk
    pub chunk_size: usize,
    /// Column holding the serialized JSON payload
    pub payload_column: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            payload_column: "json".to_string(),
        }
    }
}

/// A boolean feature that records whether an optional attribute is set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedFlag {
    /// Name of the derived column
    pub name: String,
    /// Column whose presence is tested
    pub source: String,
}

/// Feature materialization rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub label_column: String,
    pub liked_column: String,
    pub date_column: String,
    /// Column added in training mode holding the truncated day
    pub day_column: String,
    /// Training days whose like rate falls below this are dropped
    pub min_daily_like_rate: f64,
    pub categorical_columns: Vec<String>,
    /// Code assigned to categories never seen during training
    pub unseen_category_code: i64,
    pub derived_flags: Vec<DerivedFlag>,
    /// Identifiers, free text, PII, raw dates and labels
    pub excluded_columns: Vec<String>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        let excluded = [
            "id",
            "requested_username",
            "insert_date",
            "liked",
            "followed_back",
            "engaged",
            "profile_pic_url",
            "hd_profile_pic_url_info",
            "hd_profile_pic_versions",
            "username",
            "biography",
            "full_name",
            "external_url",
            "profile_pic_id",
            "external_lynx_url",
            "zip",
            "category",
            "city_name",
            "public_email",
            "address_street",
            "direct_messaging",
            "public_phone_number",
            "business_contact_method",
            "public_phone_country_code",
            "day_trunc",
            "pk",
            "our_pk",
            "scanned_pk",
        ];

        Self {
            label_column: "engaged".to_string(),
            liked_column: "liked".to_string(),
            date_column: "insert_date".to_string(),
            day_column: "day_trunc".to_string(),
            min_daily_like_rate: 0.035,
            categorical_columns: vec!["action_type".to_string(), "source".to_string()],
            unseen_category_code: -1,
            derived_flags: vec![DerivedFlag {
                name: "has_zip".to_string(),
                source: "zip".to_string(),
            }],
            excluded_columns: excluded.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// K-fold ensemble training
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub folds: usize,
    pub seed: u64,
    /// Weight positives by negatives/positives during boosting
    pub use_class_weight: bool,
    /// Train folds on the rayon pool
    pub parallel: bool,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            folds: 5,
            seed: 1,
            use_class_weight: false,
            parallel: true,
        }
    }
}

/// Pending batch discovery and result hand-off
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub watch_dir: PathBuf,
    /// File-name prefix of batches waiting to be scored
    pub pending_marker: String,
    /// Replaces `pending_marker` in the result file name
    pub scored_marker: String,
    /// Sub-directory of `watch_dir` receiving consumed inputs
    pub processed_dir: String,
    pub internal_key: String,
    pub external_key: String,
    /// Highest scores logged per batch
    pub top_n: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("resources"),
            pending_marker: "users_to_score".to_string(),
            scored_marker: "user_scores".to_string(),
            processed_dir: "processed".to_string(),
            internal_key: "our_pk".to_string(),
            external_key: "pk".to_string(),
            top_n: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load defaults, then the optional TOML file, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(PipelineError::Config(format!(
                    "configuration file {} not found",
                    path.display()
                )));
            }
            info!("Loading configuration from: {}", path.display());
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("OUTREACH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: PipelineConfig = builder
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ensemble.folds < 2 {
            return Err(PipelineError::Config(format!(
                "ensemble.folds must be at least 2, got {}",
                self.ensemble.folds
            )));
        }
        if !(0.0..=1.0).contains(&self.features.min_daily_like_rate) {
            return Err(PipelineError::Config(format!(
                "features.min_daily_like_rate must be within [0, 1], got {}",
                self.features.min_daily_like_rate
            )));
        }
        self.booster
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        let scoring = &self.scoring;
        if scoring.pending_marker.is_empty() || scoring.scored_marker.is_empty() {
            return Err(PipelineError::Config(
                "scoring markers must not be empty".to_string(),
            ));
        }
        if scoring.scored_marker.contains(&scoring.pending_marker) {
            return Err(PipelineError::Config(format!(
                "scoring.scored_marker '{}' must not contain pending marker '{}'",
                scoring.scored_marker, scoring.pending_marker
            )));
        }
        if scoring.processed_dir.is_empty() {
            return Err(PipelineError::Config(
                "scoring.processed_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.features.min_daily_like_rate, 0.035);
        assert_eq!(config.ensemble.folds, 5);
        assert_eq!(config.booster.max_rounds, 10_000);
        assert_eq!(config.booster.early_stopping_rounds, 100);
        assert!(config.features.excluded_columns.contains(&"zip".to_string()));
        assert!(config.features.excluded_columns.contains(&"scanned_pk".to_string()));
    }

    #[test]
    fn test_load_from_toml_file() -> Result<()> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(file, "[ensemble]")?;
        writeln!(file, "folds = 3")?;
        writeln!(file, "[booster]")?;
        writeln!(file, "learning_rate = 0.05")?;
        writeln!(file, "[scoring]")?;
        writeln!(file, "watch_dir = \"/tmp/outreach\"")?;
        file.flush()?;

        let config = PipelineConfig::load(Some(file.path()))?;
        assert_eq!(config.ensemble.folds, 3);
        assert_eq!(config.booster.learning_rate, 0.05);
        assert_eq!(config.booster.max_rounds, 10_000);
        assert_eq!(config.scoring.watch_dir, PathBuf::from("/tmp/outreach"));
        assert_eq!(config.scoring.pending_marker, "users_to_score");
        Ok(())
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = PipelineConfig::load(Some(Path::new("/no/such/outreach.toml"))).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_rejects_overlapping_markers() {
        let mut config = PipelineConfig::default();
        config.scoring.scored_marker = "users_to_score_done".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_single_fold() {
        let mut config = PipelineConfig::default();
        config.ensemble.folds = 1;
        assert!(config.validate().is_err());
    }
}
