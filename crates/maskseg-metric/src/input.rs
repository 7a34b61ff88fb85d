//! Inputs of the mask metrics.
//!
//! Outputs of the training and validation steps adapt into these structs.

use burn::{prelude::*, tensor::backend::Backend};

pub struct MaskMetricInput<B: Backend> {
    /// Predicted probabilities, `[batch_size, classes, height, width]`.
    pub predictions: Tensor<B, 4>,
    /// Target masks, same shape as `predictions`.
    pub targets: Tensor<B, 4>,
}

impl<B: Backend> MaskMetricInput<B> {
    pub const fn new(predictions: Tensor<B, 4>, targets: Tensor<B, 4>) -> Self {
        Self {
            predictions,
            targets,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.predictions.dims()[0]
    }
}

pub struct MaskLossInput<B: Backend> {
    pub loss: Tensor<B, 1>,
    pub batch_size: usize,
}

impl<B: Backend> MaskLossInput<B> {
    pub const fn new(loss: Tensor<B, 1>, batch_size: usize) -> Self {
        Self { loss, batch_size }
    }
}
