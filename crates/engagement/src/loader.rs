//! Chunked CSV record loading
//!
//! Reads a delimited source incrementally through a buffered reader,
//! collecting `chunk_size` rows at a time and appending each chunk to the
//! record set. Any failure aborts the load; partial tables are never
//! returned.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::{debug, info};

use crate::config::LoaderConfig;
use crate::errors::{PipelineError, Result};
use crate::table::RecordSet;

/// Loads record sets from CSV sources
#[derive(Debug, Clone)]
pub struct RecordLoader {
    config: LoaderConfig,
}

impl RecordLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    pub fn payload_column(&self) -> &str {
        &self.config.payload_column
    }

    /// Load every record from the CSV file at `path`
    pub fn load(&self, path: &Path) -> Result<RecordSet> {
        let source_name = path.display().to_string();
        let file = File::open(path).map_err(|e| PipelineError::Load {
            source_name: source_name.clone(),
            reason: e.to_string(),
        })?;

        let records = self.load_reader(&source_name, BufReader::new(file))?;
        info!(
            source = %source_name,
            rows = records.len(),
            columns = records.headers.len(),
            "loaded records"
        );
        Ok(records)
    }

    /// Load every record from an arbitrary reader
    pub fn load_reader<R: Read>(&self, source_name: &str, reader: R) -> Result<RecordSet> {
        let load_error = |reason: String| PipelineError::Load {
            source_name: source_name.to_string(),
            reason,
        };

        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()
            .map_err(|e| load_error(format!("unreadable header: {}", e)))?
            .iter()
            .map(str::to_string)
            .collect();

        if !headers.iter().any(|h| h == &self.config.payload_column) {
            return Err(load_error(format!(
                "missing payload column '{}'",
                self.config.payload_column
            )));
        }

        let chunk_size = self.config.chunk_size.max(1);
        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut chunk: Vec<Vec<String>> = Vec::with_capacity(chunk_size);
        let mut chunks = 0usize;

        for (line, record) in csv_reader.records().enumerate() {
            let record = record.map_err(|e| load_error(format!("record {}: {}", line + 1, e)))?;
            chunk.push(record.iter().map(str::to_string).collect());

            if chunk.len() == chunk_size {
                rows.append(&mut chunk);
                chunks += 1;
                debug!(source = %source_name, chunks, rows = rows.len(), "appended chunk");
            }
        }

        if !chunk.is_empty() {
            rows.append(&mut chunk);
            chunks += 1;
        }
        debug!(source = %source_name, chunks, rows = rows.len(), "finished reading");

        Ok(RecordSet::new(headers, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn loader(chunk_size: usize) -> RecordLoader {
        RecordLoader::new(LoaderConfig {
            chunk_size,
            ..LoaderConfig::default()
        })
    }

    #[test]
    fn test_load_csv_with_quoted_payload() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "id,json,engaged")?;
        writeln!(file, r#"1,"{{""follower_count"": 10}}",true"#)?;
        writeln!(file, r#"2,"{{""follower_count"": 20}}",false"#)?;
        file.flush()?;

        let records = loader(1000).load(file.path())?;
        assert_eq!(records.headers, vec!["id", "json", "engaged"]);
        assert_eq!(records.len(), 2);
        assert_eq!(records.rows[0][1], r#"{"follower_count": 10}"#);
        Ok(())
    }

    #[test]
    fn test_chunking_preserves_every_row() -> Result<()> {
        let mut data = String::from("id,json\n");
        for i in 0..23 {
            data.push_str(&format!("{},{{}}\n", i));
        }

        let records = loader(5).load_reader("inline", data.as_bytes())?;
        assert_eq!(records.len(), 23);
        assert_eq!(records.rows[22][0], "22");
        Ok(())
    }

    #[test]
    fn test_missing_source_is_load_error() {
        let err = loader(10)
            .load(Path::new("/definitely/not/here.csv"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Load { .. }));
    }

    #[test]
    fn test_missing_payload_column_is_load_error() {
        let err = loader(10)
            .load_reader("inline", "id,name\n1,a\n".as_bytes())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Load { reason, .. } if reason.contains("payload")));
    }

    #[test]
    fn test_ragged_rows_are_load_error() {
        let err = loader(10)
            .load_reader("inline", "id,json\n1,{}\n2\n".as_bytes())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Load { .. }));
    }
}
