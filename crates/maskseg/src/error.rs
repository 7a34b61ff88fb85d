//! Errors of the model assembler.

use std::path::PathBuf;

use maskseg_model::ModelError;
use maskseg_train::DatasetError;
use thiserror::Error;

/// Errors raised while managing checkpoints or training a [`MaskModel`](crate::MaskModel).
#[derive(Error, Debug)]
pub enum MaskModelError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    /// A weight file to load does not exist.
    #[error("Checkpoint not found: {}", .path.display())]
    CheckpointNotFound { path: PathBuf },

    #[error("Could not find model directory under {}", .dir.display())]
    ModelDirectoryNotFound { dir: PathBuf },

    #[error("Could not find weight files in {}", .dir.display())]
    WeightFilesNotFound { dir: PathBuf },

    /// Reading or writing a record failed.
    #[error("Failed to access record {}: {reason}", .path.display())]
    Record { path: PathBuf, reason: String },

    #[error("Failed to access {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid pattern '{pattern}'")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// `train` was called on a model built for inference.
    #[error("Model was built in inference mode and cannot be trained")]
    NotTrainable,
}

pub type MaskModelResult<T> = Result<T, MaskModelError>;
