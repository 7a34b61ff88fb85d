//! # maskseg metrics
//!
//! Evaluation metrics for segmentation masks, implemented as Burn training metrics.
//!
//! ## Implemented Metrics
//!
//! - [`MaskAccuracyMetric`]: hard-thresholded overlap, see [`mask_accuracy`]
//! - [`DiceMetric`]: soft Dice coefficient
//! - [`LossMetric`]: a scalar loss reported under a given name

mod accuracy;
mod dice;
mod input;
mod loss;

use burn::{data::dataloader::Progress, train::metric::MetricMetadata};

pub use accuracy::{mask_accuracy, MaskAccuracyMetric, DEFAULT_ACCURACY_SMOOTH};
pub use dice::DiceMetric;
pub use input::{MaskLossInput, MaskMetricInput};
pub use loss::LossMetric;

/// Metadata of training step `iteration` (of `iterations`) in `epoch`.
pub fn step_metadata(
    epoch: usize,
    epoch_total: usize,
    iteration: usize,
    iterations: usize,
    lr: Option<f64>,
) -> MetricMetadata {
    MetricMetadata {
        progress: Progress {
            items_processed: iteration,
            items_total: iterations,
        },
        epoch,
        epoch_total,
        iteration,
        lr,
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    pub type TestBackend = NdArray<f32>;
}
