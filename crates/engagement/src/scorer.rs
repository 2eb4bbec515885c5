//! Pending batch discovery, scoring and hand-off
//!
//! A batch is one file in the watched directory whose name starts with the
//! pending marker. Scoring a batch writes its result file (pending marker
//! replaced by the scored marker) through a synced temporary file that is
//! atomically persisted, and only then moves the input into the processed
//! directory. Interrupting between the two steps leaves a complete result
//! next to a still-pending input, which the next run simply scores again.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use outreach_gbdt::GbdtModel;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::ScoringConfig;
use crate::encoders::EncoderRegistry;
use crate::ensemble::{Classifier, Ensemble};
use crate::errors::{PipelineError, Result};
use crate::loader::RecordLoader;
use crate::materialize::FeatureMaterializer;
use crate::table::FeatureTable;

/// Result file header
pub const RESULT_HEADER: [&str; 3] = ["our_pk", "user_pk", "score"];

const LOCK_FILE: &str = ".outreach.lock";

/// Lifecycle of one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Input waiting in the watched directory
    Pending,
    /// Result written, input not yet moved
    Scored,
    /// Input moved into the processed directory
    Archived,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Pending => "pending",
            BatchState::Scored => "scored",
            BatchState::Archived => "archived",
        }
    }
}

/// One scored row of the result file
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRow {
    pub internal_key: String,
    pub external_key: String,
    pub score: f64,
}

/// A batch and the paths of its three states
#[derive(Debug, Clone)]
pub struct BatchJob {
    input: PathBuf,
    result: PathBuf,
    archive: PathBuf,
    state: BatchState,
}

impl BatchJob {
    pub fn new(input: PathBuf, result: PathBuf, archive: PathBuf) -> Self {
        Self {
            input,
            result,
            archive,
            state: BatchState::Pending,
        }
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn result_path(&self) -> &Path {
        &self.result
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    fn expect_state(&self, expected: BatchState) -> Result<()> {
        if self.state != expected {
            return Err(PipelineError::InvalidTransition {
                path: self.input.clone(),
                state: self.state.as_str(),
                expected: expected.as_str(),
            });
        }
        Ok(())
    }

    /// Pending → Scored: write every row, sync, then persist under the
    /// result name. A failure leaves no partial result behind.
    pub fn write_result(&mut self, rows: &[ScoreRow]) -> Result<()> {
        self.expect_state(BatchState::Pending)?;

        let dir = self
            .result
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut temp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = csv::Writer::from_writer(&mut temp);
            writer.write_record(RESULT_HEADER)?;
            for row in rows {
                writer.write_record([
                    row.internal_key.as_str(),
                    row.external_key.as_str(),
                    row.score.to_string().as_str(),
                ])?;
            }
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.result).map_err(|e| PipelineError::Io(e.error))?;

        self.state = BatchState::Scored;
        debug!(result = %self.result.display(), rows = rows.len(), "result persisted");
        Ok(())
    }

    /// Scored → Archived: move the input into the processed directory
    pub fn archive(&mut self) -> Result<()> {
        self.expect_state(BatchState::Scored)?;

        if let Some(parent) = self.archive.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&self.input, &self.archive)?;

        self.state = BatchState::Archived;
        debug!(archive = %self.archive.display(), "input archived");
        Ok(())
    }

    /// Write the result and then archive the input
    pub fn commit(&mut self, rows: &[ScoreRow]) -> Result<()> {
        self.write_result(rows)?;
        self.archive()
    }
}

/// Exclusive advisory lock on a watched directory, released on drop.
///
/// The lock file itself persists between runs.
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
    file: File,
}

impl DirLock {
    pub fn acquire(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let lock_path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)?;

        FileExt::try_lock_exclusive(&file).map_err(|e| PipelineError::ScorerBusy {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;

        file.set_len(0)?;
        writeln!(&file, "pid={}", std::process::id())?;

        Ok(Self {
            path: lock_path,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// Unlock only; the lock file must outlive every holder.
impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Batches handled by one [`BatchScorer::score_pending`] call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoringSummary {
    pub scored: Vec<PathBuf>,
    /// Inputs left pending after a failure
    pub failed: Vec<PathBuf>,
}

/// Scores pending batches with a trained ensemble
pub struct BatchScorer<'a, M = GbdtModel> {
    config: ScoringConfig,
    loader: &'a RecordLoader,
    materializer: &'a FeatureMaterializer,
    encoders: &'a EncoderRegistry,
    ensemble: &'a Ensemble<M>,
}

impl<'a, M: Classifier> BatchScorer<'a, M> {
    pub fn new(
        config: ScoringConfig,
        loader: &'a RecordLoader,
        materializer: &'a FeatureMaterializer,
        encoders: &'a EncoderRegistry,
        ensemble: &'a Ensemble<M>,
    ) -> Self {
        Self {
            config,
            loader,
            materializer,
            encoders,
            ensemble,
        }
    }

    /// Pending batches in the watched directory, sorted by file name
    pub fn discover(&self) -> Result<Vec<BatchJob>> {
        let watch_dir = &self.config.watch_dir;
        let processed = watch_dir.join(&self.config.processed_dir);

        let mut names = Vec::new();
        for entry in fs::read_dir(watch_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') || !name.starts_with(&self.config.pending_marker) {
                continue;
            }
            names.push(name);
        }
        names.sort();

        Ok(names
            .into_iter()
            .map(|name| {
                let result_name =
                    name.replace(&self.config.pending_marker, &self.config.scored_marker);
                BatchJob::new(
                    watch_dir.join(&name),
                    watch_dir.join(result_name),
                    processed.join(&name),
                )
            })
            .collect())
    }

    /// Score every pending batch while holding the directory lock.
    ///
    /// A failing batch is logged and left pending; the others proceed.
    pub fn score_pending(&self) -> Result<ScoringSummary> {
        let _lock = DirLock::acquire(&self.config.watch_dir)?;
        let jobs = self.discover()?;
        info!(
            watch_dir = %self.config.watch_dir.display(),
            batches = jobs.len(),
            "discovered pending batches"
        );

        let mut summary = ScoringSummary::default();
        for mut job in jobs {
            match self.score_batch(&mut job) {
                Ok(rows) => {
                    info!(input = %job.input().display(), rows = rows.len(), "batch scored");
                    summary.scored.push(job.input().to_path_buf());
                }
                Err(source) => {
                    let err = PipelineError::Batch {
                        path: job.input().to_path_buf(),
                        source: Box::new(source),
                    };
                    warn!(state = job.state().as_str(), "{}", err);
                    summary.failed.push(job.input().to_path_buf());
                }
            }
        }

        Ok(summary)
    }

    /// Materialize, predict and commit one batch
    pub fn score_batch(&self, job: &mut BatchJob) -> Result<Vec<ScoreRow>> {
        let records = self.loader.load(job.input())?;
        let set = self.materializer.inference(&records, self.encoders)?;

        let extra: Vec<&String> = set
            .valid_features
            .iter()
            .filter(|name| !self.ensemble.feature_names.contains(*name))
            .collect();
        if !extra.is_empty() {
            warn!(input = %job.input().display(), ?extra, "ignoring columns unknown to the ensemble");
        }

        let scores = self.ensemble.predict(&set.table)?;
        let rows = self.score_rows(&set.table, scores)?;
        self.log_top(job.input(), &rows);

        job.commit(&rows)?;
        Ok(rows)
    }

    fn score_rows(&self, table: &FeatureTable, scores: Vec<f64>) -> Result<Vec<ScoreRow>> {
        let key = |name: &str| {
            table.column(name).ok_or_else(|| PipelineError::MissingColumn {
                column: name.to_string(),
            })
        };
        let internal = key(&self.config.internal_key)?;
        let external = key(&self.config.external_key)?;

        Ok(internal
            .iter()
            .zip(external)
            .zip(scores)
            .map(|((internal, external), score)| ScoreRow {
                internal_key: internal.to_string(),
                external_key: external.to_string(),
                score,
            })
            .collect())
    }

    fn log_top(&self, input: &Path, rows: &[ScoreRow]) {
        let mut ranked: Vec<&ScoreRow> = rows.iter().collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        for (rank, row) in ranked.iter().take(self.config.top_n).enumerate() {
            info!(
                input = %input.display(),
                rank = rank + 1,
                key = %row.external_key,
                score = row.score,
                "top score"
            );
        }
    }
}
