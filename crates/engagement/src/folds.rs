//! Seeded k-fold partitioning

use outreach_gbdt::LcgRng;

use crate::errors::{PipelineError, Result};

/// Train/validation row indices for one fold; both sorted ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldSplit {
    pub train: Vec<usize>,
    pub valid: Vec<usize>,
}

/// Shuffled k-fold splitter.
///
/// Rows are shuffled once with the seeded LCG and then cut into `folds`
/// contiguous groups. The first `n % folds` groups receive one extra row.
#[derive(Debug, Clone, Copy)]
pub struct KFold {
    folds: usize,
    seed: u64,
}

impl KFold {
    pub fn new(folds: usize, seed: u64) -> Self {
        Self { folds, seed }
    }

    pub fn folds(&self) -> usize {
        self.folds
    }

    pub fn split(&self, rows: usize) -> Result<Vec<FoldSplit>> {
        if self.folds < 2 || self.folds > rows {
            return Err(PipelineError::InvalidFolds {
                folds: self.folds,
                rows,
            });
        }

        let mut order: Vec<usize> = (0..rows).collect();
        LcgRng::new(self.seed).shuffle(&mut order);

        let base = rows / self.folds;
        let extra = rows % self.folds;
        let mut splits = Vec::with_capacity(self.folds);
        let mut start = 0usize;

        for fold in 0..self.folds {
            let size = base + usize::from(fold < extra);
            let end = start + size;

            let mut valid = order[start..end].to_vec();
            let mut train: Vec<usize> = order[..start]
                .iter()
                .chain(&order[end..])
                .copied()
                .collect();
            valid.sort_unstable();
            train.sort_unstable();

            splits.push(FoldSplit { train, valid });
            start = end;
        }

        Ok(splits)
    }
}
