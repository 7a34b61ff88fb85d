//! Error types for the segmentation model.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while configuring or running the segmentation network.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("Invalid tensor shape: expected {expected}, got {actual}")]
    InvalidTensorShape { expected: String, actual: String },

    #[error("Failed to access config file {}", .path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience alias for results of this crate.
pub type ModelResult<T> = Result<T, ModelError>;
