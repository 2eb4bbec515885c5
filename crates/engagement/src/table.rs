//! Record sets and column-oriented feature tables
//!
//! A [`RecordSet`] is the raw loader output: header names plus string
//! fields. A [`FeatureTable`] holds typed [`Cell`]s per named column after
//! the structured payload has been flattened.

use std::fmt;

use outreach_gbdt::FeatureStats;
use serde_json::Value;
use tracing::warn;

use crate::errors::{PipelineError, Result};

/// Raw tabular records as read from a delimited source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RecordSet {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// A single typed value
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Missing,
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl Cell {
    /// Type a raw delimited field
    pub fn parse_scalar(raw: &str) -> Cell {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Missing;
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return Cell::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Cell::Bool(false);
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Cell::Integer(i);
        }
        match trimmed.parse::<f64>() {
            Ok(f) if f.is_finite() => Cell::Number(f),
            _ => Cell::Text(raw.to_string()),
        }
    }

    /// Type a JSON payload value; nested values keep their compact JSON text
    pub fn from_json(value: &Value) -> Cell {
        match value {
            Value::Null => Cell::Missing,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Integer(i),
                None => n.as_f64().map(Cell::Number).unwrap_or(Cell::Missing),
            },
            Value::String(s) => Cell::Text(s.clone()),
            nested => Cell::Text(nested.to_string()),
        }
    }

    /// Numeric view used for model input
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Cell::Integer(i) => Some(*i as f64),
            Cell::Number(f) => Some(*f),
            Cell::Missing | Cell::Text(_) => None,
        }
    }

    /// Boolean view; accepts 0/1 numbers and textual true/false
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Cell::Bool(b) => Some(*b),
            Cell::Integer(0) => Some(false),
            Cell::Integer(1) => Some(true),
            Cell::Number(f) if *f == 0.0 => Some(false),
            Cell::Number(f) if *f == 1.0 => Some(true),
            Cell::Text(s) if s.eq_ignore_ascii_case("true") => Some(true),
            Cell::Text(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    /// A present, non-empty value
    pub fn is_present(&self) -> bool {
        match self {
            Cell::Missing => false,
            Cell::Text(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Category string used by the encoders; missing encodes as ""
    pub fn category_key(&self) -> String {
        match self {
            Cell::Missing => String::new(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Missing => Ok(()),
            Cell::Bool(b) => write!(f, "{}", b),
            Cell::Integer(i) => write!(f, "{}", i),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Cell::Number(n) => write!(f, "{}", n),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

/// Named column of cells
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub cells: Vec<Cell>,
}

/// Column-oriented table of typed cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    columns: Vec<Column>,
    rows: usize,
}

impl FeatureTable {
    /// An empty table with `rows` rows and no columns
    pub fn with_rows(rows: usize) -> Self {
        Self {
            columns: Vec::new(),
            rows,
        }
    }

    /// Flatten a record set: scalar fields are typed in place and every key
    /// of the JSON object in `payload_column` becomes its own column.
    ///
    /// Payload keys follow the raw columns in first-seen order; a key that
    /// collides with a raw column replaces it.
    pub fn flatten(records: &RecordSet, payload_column: &str) -> Result<Self> {
        let payload_idx =
            records
                .column_index(payload_column)
                .ok_or_else(|| PipelineError::MissingColumn {
                    column: payload_column.to_string(),
                })?;

        let mut table = Self::with_rows(records.len());
        for (idx, header) in records.headers.iter().enumerate() {
            if idx == payload_idx {
                continue;
            }
            let cells = records
                .rows
                .iter()
                .map(|row| row.get(idx).map(|raw| Cell::parse_scalar(raw)).unwrap_or(Cell::Missing))
                .collect();
            table.set_column(header, cells);
        }

        let mut payload_columns: Vec<Column> = Vec::new();
        for (row_idx, row) in records.rows.iter().enumerate() {
            let raw = row.get(payload_idx).map(String::as_str).unwrap_or("");
            let parsed: Value = if raw.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(raw).map_err(|e| PipelineError::Load {
                    source_name: payload_column.to_string(),
                    reason: format!("row {}: invalid payload: {}", row_idx, e),
                })?
            };
            let Value::Object(map) = parsed else {
                return Err(PipelineError::Load {
                    source_name: payload_column.to_string(),
                    reason: format!("row {}: payload is not a JSON object", row_idx),
                });
            };

            for (key, value) in map {
                let pos = match payload_columns.iter().position(|c| c.name == key) {
                    Some(pos) => pos,
                    None => {
                        payload_columns.push(Column {
                            name: key,
                            cells: vec![Cell::Missing; records.len()],
                        });
                        payload_columns.len() - 1
                    }
                };
                payload_columns[pos].cells[row_idx] = Cell::from_json(&value);
            }
        }

        for column in payload_columns {
            table.set_column(&column.name, column.cells);
        }

        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Column names in table order
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&[Cell]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.cells.as_slice())
    }

    /// Replace an existing column in place or append a new one
    pub fn set_column(&mut self, name: &str, cells: Vec<Cell>) {
        assert_eq!(cells.len(), self.rows, "column '{}' has wrong length", name);
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(column) => column.cells = cells,
            None => self.columns.push(Column {
                name: name.to_string(),
                cells,
            }),
        }
    }

    /// Keep only the rows whose mask entry is true
    pub fn retain_rows(&mut self, keep: &[bool]) {
        assert_eq!(keep.len(), self.rows);
        for column in &mut self.columns {
            let mut mask = keep.iter();
            column.cells.retain(|_| *mask.next().unwrap_or(&false));
        }
        self.rows = keep.iter().filter(|&&k| k).count();
    }

    /// Row-major numeric matrix over `names`, in that order.
    ///
    /// Missing cells become NaN. Text cells also become NaN, with one warning
    /// per affected column.
    pub fn matrix(&self, names: &[String]) -> Result<Vec<Vec<f64>>> {
        let missing: Vec<String> = names
            .iter()
            .filter(|name| !self.has_column(name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::FeatureMismatch { missing });
        }

        let mut rows = vec![Vec::with_capacity(names.len()); self.rows];
        for name in names {
            let cells = self.column(name).unwrap_or(&[]);
            let mut text_cells = 0usize;
            for (row, cell) in rows.iter_mut().zip(cells) {
                if matches!(cell, Cell::Text(_)) {
                    text_cells += 1;
                }
                row.push(cell.as_f64().unwrap_or(f64::NAN));
            }
            if text_cells > 0 {
                warn!(column = %name, text_cells, "non-numeric feature values treated as missing");
            }
        }

        Ok(rows)
    }

    /// Min/max/missing per named column
    pub fn feature_stats(&self, names: &[String]) -> Vec<(String, FeatureStats)> {
        names
            .iter()
            .map(|name| {
                let mut stats = FeatureStats {
                    min: f64::INFINITY,
                    max: f64::NEG_INFINITY,
                    missing: 0,
                };
                for cell in self.column(name).unwrap_or(&[]) {
                    match cell.as_f64() {
                        Some(v) => {
                            stats.min = stats.min.min(v);
                            stats.max = stats.max.max(v);
                        }
                        None => stats.missing += 1,
                    }
                }
                (name.clone(), stats)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> RecordSet {
        RecordSet::new(
            vec!["id".into(), "json".into(), "source".into()],
            vec![
                vec![
                    "1".into(),
                    r#"{"follower_count": 120, "is_private": false, "zip": "10001"}"#.into(),
                    "tag".into(),
                ],
                vec![
                    "2".into(),
                    r#"{"follower_count": 3.5, "media_count": null, "tags": [1, 2]}"#.into(),
                    "".into(),
                ],
            ],
        )
    }

    #[test]
    fn test_parse_scalar_types() {
        assert_eq!(Cell::parse_scalar(""), Cell::Missing);
        assert_eq!(Cell::parse_scalar("True"), Cell::Bool(true));
        assert_eq!(Cell::parse_scalar("42"), Cell::Integer(42));
        assert_eq!(Cell::parse_scalar("0.5"), Cell::Number(0.5));
        assert_eq!(Cell::parse_scalar("abc"), Cell::Text("abc".into()));
        assert_eq!(Cell::parse_scalar("NaN"), Cell::Text("NaN".into()));
    }

    #[test]
    fn test_flatten_appends_payload_columns() {
        let table = FeatureTable::flatten(&records(), "json").unwrap();

        assert_eq!(table.len(), 2);
        assert!(!table.has_column("json"));
        assert_eq!(
            table.column_names(),
            vec!["id", "source", "follower_count", "is_private", "zip", "media_count", "tags"]
        );
        assert_eq!(table.column("follower_count").unwrap()[1], Cell::Number(3.5));
        assert_eq!(table.column("zip").unwrap()[1], Cell::Missing);
        assert_eq!(table.column("tags").unwrap()[1], Cell::Text("[1,2]".into()));
        assert_eq!(table.column("source").unwrap()[1], Cell::Missing);
    }

    #[test]
    fn test_flatten_rejects_bad_payload() {
        let mut bad = records();
        bad.rows[1][1] = "[1, 2]".into();
        assert!(matches!(
            FeatureTable::flatten(&bad, "json"),
            Err(PipelineError::Load { .. })
        ));

        assert!(matches!(
            FeatureTable::flatten(&records(), "payload"),
            Err(PipelineError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_retain_rows() {
        let mut table = FeatureTable::flatten(&records(), "json").unwrap();
        table.retain_rows(&[false, true]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.column("id").unwrap(), &[Cell::Integer(2)]);
    }

    #[test]
    fn test_matrix_reports_missing_features() {
        let table = FeatureTable::flatten(&records(), "json").unwrap();
        let err = table
            .matrix(&["follower_count".to_string(), "nope".to_string()])
            .unwrap_err();
        assert!(matches!(err, PipelineError::FeatureMismatch { missing } if missing == vec!["nope"]));

        let rows = table
            .matrix(&["is_private".to_string(), "source".to_string()])
            .unwrap();
        assert_eq!(rows[0][0], 0.0);
        assert!(rows[0][1].is_nan());
    }

    #[test]
    fn test_display_renders_whole_numbers_as_integers() {
        assert_eq!(Cell::Number(123456789.0).to_string(), "123456789");
        assert_eq!(Cell::Number(0.25).to_string(), "0.25");
        assert_eq!(Cell::Integer(9007199254740993).to_string(), "9007199254740993");
        assert_eq!(Cell::Missing.to_string(), "");
    }
}
