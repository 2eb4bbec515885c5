//! Feature materialization for training and inference
//!
//! Both call paths run the same flatten, encode, derive and filter steps so
//! that the valid-feature columns match between the training table and every
//! inference batch. Training additionally drops low like-rate days, extracts
//! labels and fits the categorical encoders; inference only reads them.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::config::FeatureConfig;
use crate::encoders::EncoderRegistry;
use crate::errors::{PipelineError, Result};
use crate::table::{Cell, FeatureTable, RecordSet};

/// Materialized training table with labels
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub table: FeatureTable,
    pub valid_features: Vec<String>,
    pub labels: Vec<bool>,
    /// Collection days removed by the like-rate filter
    pub dropped_days: Vec<NaiveDate>,
}

/// Materialized inference table; carries no labels
#[derive(Debug, Clone)]
pub struct InferenceSet {
    pub table: FeatureTable,
    pub valid_features: Vec<String>,
}

/// Which call path to run, carrying only what that path may touch
pub enum MaterializeRequest<'r> {
    Training { encoders: &'r mut EncoderRegistry },
    Inference { encoders: &'r EncoderRegistry },
}

/// Output of [`FeatureMaterializer::materialize`]
#[derive(Debug, Clone)]
pub enum Materialized {
    Training(TrainingSet),
    Inference(InferenceSet),
}

impl Materialized {
    pub fn table(&self) -> &FeatureTable {
        match self {
            Materialized::Training(set) => &set.table,
            Materialized::Inference(set) => &set.table,
        }
    }

    pub fn valid_features(&self) -> &[String] {
        match self {
            Materialized::Training(set) => &set.valid_features,
            Materialized::Inference(set) => &set.valid_features,
        }
    }
}

/// Turns raw record sets into feature tables
#[derive(Debug, Clone)]
pub struct FeatureMaterializer {
    config: FeatureConfig,
    payload_column: String,
}

impl FeatureMaterializer {
    pub fn new(config: FeatureConfig, payload_column: impl Into<String>) -> Self {
        Self {
            config,
            payload_column: payload_column.into(),
        }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn materialize(
        &self,
        records: &RecordSet,
        request: MaterializeRequest<'_>,
    ) -> Result<Materialized> {
        match request {
            MaterializeRequest::Training { encoders } => {
                self.training(records, encoders).map(Materialized::Training)
            }
            MaterializeRequest::Inference { encoders } => {
                self.inference(records, encoders).map(Materialized::Inference)
            }
        }
    }

    /// Materialize the training table, fitting one encoder per categorical column
    pub fn training(
        &self,
        records: &RecordSet,
        encoders: &mut EncoderRegistry,
    ) -> Result<TrainingSet> {
        let mut table = FeatureTable::flatten(records, &self.payload_column)?;
        let dropped_days = self.drop_low_like_rate_days(&mut table)?;
        let labels = self.extract_labels(&table)?;

        for column in &self.config.categorical_columns {
            let cells = self
                .required_column(&table, column)?
                .to_vec();
            let encoded = encoders.fit_transform(column, &cells);
            table.set_column(column, encoded);
        }

        self.derive_flags(&mut table);
        let valid_features = self.valid_features(&table);

        info!(
            rows = table.len(),
            features = valid_features.len(),
            positives = labels.iter().filter(|&&l| l).count(),
            "materialized training table"
        );

        Ok(TrainingSet {
            table,
            valid_features,
            labels,
            dropped_days,
        })
    }

    /// Materialize an inference batch with previously fitted encoders
    pub fn inference(&self, records: &RecordSet, encoders: &EncoderRegistry) -> Result<InferenceSet> {
        let mut table = FeatureTable::flatten(records, &self.payload_column)?;
        let fallback = self.config.unseen_category_code;

        for column in &self.config.categorical_columns {
            let encoded = match table.column(column) {
                Some(cells) => {
                    let encoded = encoders.transform(column, cells, fallback)?;
                    if encoded.unseen > 0 {
                        warn!(
                            column = %column,
                            unseen = encoded.unseen,
                            fallback,
                            "unseen categories mapped to fallback code"
                        );
                    }
                    encoded.cells
                }
                None => {
                    encoders.require(column)?;
                    warn!(
                        column = %column,
                        fallback,
                        "categorical column absent from batch; using fallback code"
                    );
                    vec![Cell::Integer(fallback); table.len()]
                }
            };
            table.set_column(column, encoded);
        }

        self.derive_flags(&mut table);
        let valid_features = self.valid_features(&table);

        debug!(rows = table.len(), features = valid_features.len(), "materialized inference table");

        Ok(InferenceSet {
            table,
            valid_features,
        })
    }

    /// Drop every row of a day whose mean like rate is below the threshold,
    /// adding the truncated day as its own column
    fn drop_low_like_rate_days(&self, table: &mut FeatureTable) -> Result<Vec<NaiveDate>> {
        let dates = self.required_column(table, &self.config.date_column)?;
        let days = dates
            .iter()
            .enumerate()
            .map(|(row, cell)| truncate_to_day(row, cell))
            .collect::<Result<Vec<_>>>()?;

        let liked = self.required_column(table, &self.config.liked_column)?;
        let mut per_day: BTreeMap<NaiveDate, (usize, usize)> = BTreeMap::new();
        for (day, cell) in days.iter().zip(liked) {
            let entry = per_day.entry(*day).or_default();
            entry.1 += 1;
            if cell.as_bool().unwrap_or(false) {
                entry.0 += 1;
            }
        }

        let dropped: Vec<NaiveDate> = per_day
            .iter()
            .filter(|(_, (likes, total))| {
                (*likes as f64 / *total as f64) < self.config.min_daily_like_rate
            })
            .map(|(day, _)| *day)
            .collect();

        let day_cells = days
            .iter()
            .map(|d| Cell::Text(d.format("%Y-%m-%d").to_string()))
            .collect();
        table.set_column(&self.config.day_column, day_cells);

        if !dropped.is_empty() {
            let dropped_set: HashSet<&NaiveDate> = dropped.iter().collect();
            let keep: Vec<bool> = days.iter().map(|d| !dropped_set.contains(d)).collect();
            let before = table.len();
            table.retain_rows(&keep);
            warn!(
                days = dropped.len(),
                rows = before - table.len(),
                threshold = self.config.min_daily_like_rate,
                "dropped low like-rate collection days"
            );
        }

        Ok(dropped)
    }

    fn extract_labels(&self, table: &FeatureTable) -> Result<Vec<bool>> {
        self.required_column(table, &self.config.label_column)?
            .iter()
            .enumerate()
            .map(|(row, cell)| {
                cell.as_bool().ok_or_else(|| PipelineError::InvalidLabel {
                    row,
                    value: cell.to_string(),
                })
            })
            .collect()
    }

    /// `has_<attr>` style flags; an absent source column yields all false
    fn derive_flags(&self, table: &mut FeatureTable) {
        for flag in &self.config.derived_flags {
            let cells = match table.column(&flag.source) {
                Some(source) => source.iter().map(|c| Cell::Bool(c.is_present())).collect(),
                None => vec![Cell::Bool(false); table.len()],
            };
            table.set_column(&flag.name, cells);
        }
    }

    /// Every column that is not excluded, in table order
    pub fn valid_features(&self, table: &FeatureTable) -> Vec<String> {
        let excluded: HashSet<&str> = self
            .config
            .excluded_columns
            .iter()
            .map(String::as_str)
            .chain([
                self.config.label_column.as_str(),
                self.config.day_column.as_str(),
            ])
            .collect();

        table
            .column_names()
            .into_iter()
            .filter(|name| !excluded.contains(name.as_str()))
            .collect()
    }

    fn required_column<'t>(&self, table: &'t FeatureTable, column: &str) -> Result<&'t [Cell]> {
        table.column(column).ok_or_else(|| PipelineError::MissingColumn {
            column: column.to_string(),
        })
    }
}

/// Parse the leading `%Y-%m-%d` of a timestamp cell
fn truncate_to_day(row: usize, cell: &Cell) -> Result<NaiveDate> {
    let raw = cell.to_string();
    let day = raw.split(' ').next().unwrap_or("");
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|_| PipelineError::InvalidDate { row, value: raw })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn materializer() -> FeatureMaterializer {
        FeatureMaterializer::new(FeatureConfig::default(), "json")
    }

    fn training_records() -> RecordSet {
        let headers = ["id", "insert_date", "liked", "engaged", "action_type", "source", "json"]
            .iter()
            .map(|h| h.to_string())
            .collect();
        let row = |id: &str, date: &str, liked: &str, engaged: &str, action: &str, source: &str, json: &str| {
            vec![id, date, liked, engaged, action, source, json]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        };

        RecordSet::new(
            headers,
            vec![
                row("1", "2019-11-01 10:00:00", "true", "true", "follow", "tag", r#"{"pk": 11, "follower_count": 100, "zip": "10001"}"#),
                row("2", "2019-11-01 11:00:00", "false", "false", "like", "user", r#"{"pk": 12, "follower_count": 50, "zip": ""}"#),
                row("3", "2019-11-02 09:30:00", "false", "true", "follow", "user", r#"{"pk": 13, "follower_count": 75}"#),
                row("4", "2019-11-02 12:00:00", "false", "false", "like", "tag", r#"{"pk": 14, "follower_count": 20}"#),
            ],
        )
    }

    fn inference_records(json_rows: &[&str], source: &[&str]) -> RecordSet {
        RecordSet::new(
            vec!["our_pk".into(), "source".into(), "json".into()],
            json_rows
                .iter()
                .zip(source)
                .map(|(json, src)| vec!["99".to_string(), src.to_string(), json.to_string()])
                .collect(),
        )
    }

    #[test]
    fn test_training_drops_low_like_rate_days() {
        let mut registry = EncoderRegistry::new();
        let set = materializer()
            .training(&training_records(), &mut registry)
            .unwrap();

        assert_eq!(set.dropped_days, vec![NaiveDate::from_ymd_opt(2019, 11, 2).unwrap()]);
        assert_eq!(set.table.len(), 2);
        assert_eq!(set.labels, vec![true, false]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_valid_features_exclude_identifiers_and_labels() {
        let mut registry = EncoderRegistry::new();
        let set = materializer()
            .training(&training_records(), &mut registry)
            .unwrap();

        assert_eq!(
            set.valid_features,
            vec!["action_type", "source", "follower_count", "has_zip"]
        );
        assert_eq!(
            set.table.column("has_zip").unwrap(),
            &[Cell::Bool(true), Cell::Bool(false)]
        );
    }

    #[test]
    fn test_inference_matches_training_columns() {
        let m = materializer();
        let mut registry = EncoderRegistry::new();
        let training = m.training(&training_records(), &mut registry).unwrap();

        let batch = inference_records(
            &[r#"{"pk": 21, "follower_count": 5}"#, r#"{"pk": 22, "follower_count": 8}"#],
            &["tag", "hashtag"],
        );
        let inference = m.inference(&batch, &registry).unwrap();

        let train_set: HashSet<_> = training.valid_features.iter().collect();
        let infer_set: HashSet<_> = inference.valid_features.iter().collect();
        assert_eq!(train_set, infer_set);

        // zip absent everywhere in the batch
        assert_eq!(
            inference.table.column("has_zip").unwrap(),
            &[Cell::Bool(false), Cell::Bool(false)]
        );
        // action_type absent from the batch, "hashtag" never seen in training
        assert_eq!(
            inference.table.column("action_type").unwrap(),
            &[Cell::Integer(-1), Cell::Integer(-1)]
        );
        assert_eq!(
            inference.table.column("source").unwrap(),
            &[Cell::Integer(0), Cell::Integer(-1)]
        );
    }

    #[test]
    fn test_pending_file_identifiers_are_not_features() {
        let m = materializer();
        let mut registry = EncoderRegistry::new();
        let training = m.training(&training_records(), &mut registry).unwrap();

        let batch = RecordSet::new(
            vec!["our_pk".into(), "scanned_pk".into(), "source".into(), "json".into()],
            vec![vec![
                "3".into(),
                "4411".into(),
                "tag".into(),
                r#"{"pk": 4411, "follower_count": 12}"#.into(),
            ]],
        );
        let inference = m.inference(&batch, &registry).unwrap();

        let train_set: HashSet<_> = training.valid_features.iter().collect();
        let infer_set: HashSet<_> = inference.valid_features.iter().collect();
        assert_eq!(train_set, infer_set);
        assert!(!inference.valid_features.contains(&"scanned_pk".to_string()));
    }

    #[test]
    fn test_inference_before_training_fails() {
        let batch = inference_records(&[r#"{"pk": 1}"#], &["tag"]);
        let err = materializer()
            .inference(&batch, &EncoderRegistry::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::EncoderNotFound { .. }));
    }

    #[test]
    fn test_request_dispatch() {
        let m = materializer();
        let mut registry = EncoderRegistry::new();
        let trained = m
            .materialize(
                &training_records(),
                MaterializeRequest::Training { encoders: &mut registry },
            )
            .unwrap();
        assert!(matches!(trained, Materialized::Training(_)));

        let batch = inference_records(&[r#"{"pk": 1, "follower_count": 3}"#], &["user"]);
        let inferred = m
            .materialize(&batch, MaterializeRequest::Inference { encoders: &registry })
            .unwrap();
        assert!(matches!(inferred, Materialized::Inference(_)));

        let mut trained_features = trained.valid_features().to_vec();
        let mut inferred_features = inferred.valid_features().to_vec();
        trained_features.sort();
        inferred_features.sort();
        assert_eq!(trained_features, inferred_features);
        assert_eq!(inferred.table().len(), 1);
    }

    #[test]
    fn test_invalid_date_is_fatal_in_training() {
        let mut records = training_records();
        records.rows[0][1] = "11/01/2019".into();
        let err = materializer()
            .training(&records, &mut EncoderRegistry::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDate { row: 0, .. }));
    }

    #[test]
    fn test_invalid_label_is_fatal() {
        let mut records = training_records();
        records.rows[0][3] = "maybe".into();
        let err = materializer()
            .training(&records, &mut EncoderRegistry::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidLabel { .. }));
    }
}
