//! Log directory and checkpoint naming.
//!
//! Every training run writes into `model_dir/{name}{YYYYMMDD}T{HHMM}` and saves one
//! checkpoint per completed epoch as `mask_rcnn_{name}_{epoch:04}.mpk`. Resuming
//! from a checkpoint recovers both the run directory and the epoch from its path.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, NaiveDateTime};
use regex::Regex;
use walkdir::WalkDir;

use crate::error::{MaskModelError, MaskModelResult};

/// File name prefix of every checkpoint.
pub const CHECKPOINT_PREFIX: &str = "mask_rcnn";

/// Extension of checkpoints written by this crate.
pub const CHECKPOINT_EXTENSION: &str = "mpk";

const CHECKPOINT_PATTERN: &str =
    r".*[/\\][\w-]+(\d{4})(\d{2})(\d{2})T(\d{2})(\d{2})[/\\]mask_rcnn_[\w-]+(\d{4})\.(h5|mpk)$";

/// Where a model's runs and checkpoints live.
#[derive(Debug, Clone)]
pub struct CheckpointLayout {
    model_dir: PathBuf,
    name: String,
    epoch: usize,
    started: NaiveDateTime,
}

impl CheckpointLayout {
    /// A fresh run of model `name` under `model_dir`, starting now at epoch 0.
    pub fn new(model_dir: impl Into<PathBuf>, name: &str) -> Self {
        Self {
            model_dir: model_dir.into(),
            name: name.to_lowercase(),
            epoch: 0,
            started: Local::now().naive_local(),
        }
    }

    /// Point the layout at the run that produced `model_path`, or at a fresh run.
    ///
    /// A path that does not look like one of our checkpoints starts a fresh run.
    pub fn set_log_dir(&mut self, model_path: Option<&Path>) -> MaskModelResult<()> {
        self.epoch = 0;
        self.started = Local::now().naive_local();

        let Some(model_path) = model_path else {
            return Ok(());
        };

        match parse_checkpoint_path(&model_path.to_string_lossy())? {
            Some((started, epoch)) => {
                self.started = started;
                self.epoch = epoch;
                tracing::info!(
                    epoch,
                    path = %model_path.display(),
                    "Resuming from checkpoint"
                );
            }
            None => {
                tracing::warn!(
                    path = %model_path.display(),
                    "Checkpoint path does not name a run and epoch, starting a fresh run"
                );
            }
        }
        Ok(())
    }

    /// Number of epochs already completed.
    pub const fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Directory of the current run.
    pub fn log_dir(&self) -> PathBuf {
        self.model_dir.join(format!(
            "{}{}",
            self.name,
            self.started.format("%Y%m%dT%H%M")
        ))
    }

    /// Checkpoint written after `epoch` completed epochs.
    pub fn checkpoint_path(&self, epoch: usize) -> PathBuf {
        self.log_dir().join(format!(
            "{CHECKPOINT_PREFIX}_{}_{epoch:04}.{CHECKPOINT_EXTENSION}",
            self.name
        ))
    }

    /// Last checkpoint of the most recent run.
    ///
    /// # Errors
    ///
    /// Returns [`MaskModelError::ModelDirectoryNotFound`] when no run directory
    /// exists and [`MaskModelError::WeightFilesNotFound`] when the latest run has no
    /// checkpoint.
    pub fn find_last(&self) -> MaskModelResult<PathBuf> {
        let last_run = sorted_entries(&self.model_dir, |entry| {
            entry.file_type().is_dir() && file_name(entry).starts_with(&self.name)
        })
        .pop()
        .ok_or_else(|| MaskModelError::ModelDirectoryNotFound {
            dir: self.model_dir.clone(),
        })?;

        sorted_entries(&last_run, |entry| {
            entry.file_type().is_file() && file_name(entry).starts_with(CHECKPOINT_PREFIX)
        })
        .pop()
        .ok_or(MaskModelError::WeightFilesNotFound { dir: last_run })
    }
}

/// Run start time and epoch encoded in a checkpoint path.
fn parse_checkpoint_path(path: &str) -> MaskModelResult<Option<(NaiveDateTime, usize)>> {
    let regex = Regex::new(CHECKPOINT_PATTERN).map_err(|source| MaskModelError::InvalidPattern {
        pattern: CHECKPOINT_PATTERN.to_string(),
        source,
    })?;
    let Some(captures) = regex.captures(path) else {
        return Ok(None);
    };

    let number = |index: usize| -> Option<u32> { captures.get(index)?.as_str().parse().ok() };
    let parsed = (|| {
        let date = NaiveDate::from_ymd_opt(number(1)? as i32, number(2)?, number(3)?)?;
        let started = date.and_hms_opt(number(4)?, number(5)?, 0)?;
        Some((started, number(6)? as usize))
    })();
    Ok(parsed)
}

fn file_name(entry: &walkdir::DirEntry) -> String {
    entry.file_name().to_string_lossy().into_owned()
}

fn sorted_entries(dir: &Path, keep: impl Fn(&walkdir::DirEntry) -> bool) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| keep(entry))
        .map(walkdir::DirEntry::into_path)
        .collect()
}
