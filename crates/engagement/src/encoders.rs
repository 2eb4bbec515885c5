//! Categorical encoders and the per-run encoder registry
//!
//! Encoders are fitted once per categorical column while materializing the
//! training table and are then only read while materializing inference
//! batches. The registry is an explicit value passed to the materializer:
//! training takes it by `&mut`, inference by `&`.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::errors::{PipelineError, Result};
use crate::table::Cell;

/// Outcome of encoding a single category string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoded {
    Known(i64),
    Unseen,
}

impl Encoded {
    /// Resolve to a code, substituting `fallback` for unseen categories
    pub fn or_fallback(self, fallback: i64) -> i64 {
        match self {
            Encoded::Known(code) => code,
            Encoded::Unseen => fallback,
        }
    }
}

/// Dense integer codes for a fixed set of category strings.
///
/// Codes follow the sorted order of the distinct strings seen at fit time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoricalEncoder {
    classes: Vec<String>,
    codes: HashMap<String, i64>,
}

impl CategoricalEncoder {
    pub fn fit<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let classes: Vec<String> = values
            .into_iter()
            .map(Into::into)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let codes = classes
            .iter()
            .enumerate()
            .map(|(code, class)| (class.clone(), code as i64))
            .collect();

        Self { classes, codes }
    }

    pub fn encode(&self, category: &str) -> Encoded {
        self.codes
            .get(category)
            .map(|&code| Encoded::Known(code))
            .unwrap_or(Encoded::Unseen)
    }

    /// The category string for `code`, if any
    pub fn decode(&self, code: i64) -> Option<&str> {
        usize::try_from(code)
            .ok()
            .and_then(|idx| self.classes.get(idx))
            .map(String::as_str)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Column name to fitted encoder
#[derive(Debug, Clone, Default)]
pub struct EncoderRegistry {
    encoders: HashMap<String, CategoricalEncoder>,
}

/// Encoded column plus the number of cells that fell back
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedColumn {
    pub cells: Vec<Cell>,
    pub unseen: usize,
}

impl EncoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit an encoder on `cells`, register it under `column` and return the
    /// encoded cells. A previously registered encoder is replaced.
    pub fn fit_transform(&mut self, column: &str, cells: &[Cell]) -> Vec<Cell> {
        let encoder = CategoricalEncoder::fit(cells.iter().map(Cell::category_key));
        debug!(column, classes = encoder.len(), "fitted categorical encoder");

        let encoded = cells
            .iter()
            .map(|cell| Cell::Integer(encoder.encode(&cell.category_key()).or_fallback(-1)))
            .collect();
        self.encoders.insert(column.to_string(), encoder);
        encoded
    }

    /// Encode `cells` with the encoder fitted for `column`
    pub fn transform(&self, column: &str, cells: &[Cell], fallback: i64) -> Result<EncodedColumn> {
        let encoder = self.require(column)?;
        let mut unseen = 0usize;
        let cells = cells
            .iter()
            .map(|cell| {
                let encoded = encoder.encode(&cell.category_key());
                if encoded == Encoded::Unseen {
                    unseen += 1;
                }
                Cell::Integer(encoded.or_fallback(fallback))
            })
            .collect();

        Ok(EncodedColumn { cells, unseen })
    }

    pub fn get(&self, column: &str) -> Option<&CategoricalEncoder> {
        self.encoders.get(column)
    }

    pub fn require(&self, column: &str) -> Result<&CategoricalEncoder> {
        self.get(column).ok_or_else(|| PipelineError::EncoderNotFound {
            column: column.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.encoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(values: &[&str]) -> Vec<Cell> {
        values.iter().map(|v| Cell::Text(v.to_string())).collect()
    }

    #[test]
    fn test_codes_follow_sorted_classes() {
        let encoder = CategoricalEncoder::fit(["tag", "follower", "tag", "liker"]);
        assert_eq!(encoder.classes(), &["follower", "liker", "tag"]);
        assert_eq!(encoder.encode("follower"), Encoded::Known(0));
        assert_eq!(encoder.encode("tag"), Encoded::Known(2));
        assert_eq!(encoder.encode("other"), Encoded::Unseen);
        assert_eq!(encoder.decode(1), Some("liker"));
        assert_eq!(encoder.decode(-1), None);
    }

    #[test]
    fn test_fit_then_transform_is_idempotent() {
        let mut registry = EncoderRegistry::new();
        let cells = text(&["b", "a", "c", "a"]);
        let fitted = registry.fit_transform("source", &cells);
        let again = registry.transform("source", &cells, -1).unwrap();

        assert_eq!(fitted, again.cells);
        assert_eq!(again.unseen, 0);
    }

    #[test]
    fn test_unseen_category_uses_fallback() {
        let mut registry = EncoderRegistry::new();
        registry.fit_transform("source", &text(&["a", "b"]));

        let encoded = registry
            .transform("source", &text(&["b", "zzz"]), -1)
            .unwrap();
        assert_eq!(encoded.cells, vec![Cell::Integer(1), Cell::Integer(-1)]);
        assert_eq!(encoded.unseen, 1);
    }

    #[test]
    fn test_missing_cells_share_empty_category() {
        let mut registry = EncoderRegistry::new();
        let fitted = registry.fit_transform("source", &[Cell::Missing, Cell::Text("x".into())]);
        assert_eq!(fitted, vec![Cell::Integer(0), Cell::Integer(1)]);
    }

    #[test]
    fn test_transform_before_fit_fails() {
        let registry = EncoderRegistry::new();
        let err = registry.transform("source", &text(&["a"]), -1).unwrap_err();
        assert!(matches!(err, PipelineError::EncoderNotFound { column } if column == "source"));
    }
}
