//! Error types of the data pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading samples and assembling batches.
#[derive(Error, Debug)]
pub enum DatasetError {
    /// The image directory does not exist.
    #[error("Image directory not found: {}", .path.display())]
    ImageDirectoryNotFound {
        /// The expected image directory.
        path: PathBuf,
    },

    /// Opening or decoding an image failed.
    #[error("Failed to open image: {}", .path.display())]
    ImageOpenFailed {
        /// The image that failed to open.
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Reading the run-length annotation file failed.
    #[error("Failed to read annotations: {}", .path.display())]
    AnnotationReadFailed {
        /// The annotation file.
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// A required column is missing from the annotation file.
    #[error("Annotation file {} has no {column} column", .path.display())]
    MissingColumn {
        path: PathBuf,
        column: String,
    },

    /// A run-length string could not be decoded.
    #[error("Invalid run-length encoding for {image_id}: {reason}")]
    InvalidRle { image_id: String, reason: String },

    /// An image id outside the dataset was requested.
    #[error("Sample {id} not found in dataset of {len} samples")]
    SampleNotFound { id: usize, len: usize },

    /// The dataset has no samples to draw from.
    #[error("Dataset is empty")]
    EmptyDataset,

    /// Sample data does not have the announced or expected shape.
    #[error("Shape mismatch for sample {id}: expected {expected}, got {actual}")]
    ShapeMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    /// Generation gave up after too many consecutive sample failures.
    #[error("Aborting after {count} consecutive sample errors")]
    TooManyErrors {
        count: usize,
        /// The last sample error.
        #[source]
        source: Box<DatasetError>,
    },

    /// A feeder worker thread could not be started.
    #[error("Failed to spawn feeder worker")]
    WorkerSpawnFailed {
        #[source]
        source: std::io::Error,
    },

    /// The feeder workers have all stopped.
    #[error("Data feeder disconnected")]
    FeederDisconnected,
}

/// Convenience alias for results of this crate.
pub type DatasetResult<T> = Result<T, DatasetError>;
