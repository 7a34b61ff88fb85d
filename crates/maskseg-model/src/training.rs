//! Training data structures.
//!
//! The batch and output types live next to the network so that the data pipeline
//! and the training loop can share them without depending on each other.

use burn::{
    prelude::*,
    train::metric::{Adaptor, ItemLazy},
};
use maskseg_metric::{MaskLossInput, MaskMetricInput};

/// A batch of molded images and their target masks.
#[derive(Debug, Clone)]
pub struct MaskBatch<B: Backend> {
    /// Images with the mean pixel subtracted, `[batch_size, channels, height, width]`.
    pub images: Tensor<B, 4>,
    /// Binary masks, `[batch_size, num_classes, height, width]`.
    pub masks: Tensor<B, 4>,
}

impl<B: Backend> MaskBatch<B> {
    /// Create a new mask batch.
    pub const fn new(images: Tensor<B, 4>, masks: Tensor<B, 4>) -> Self {
        Self { images, masks }
    }

    /// Get the batch size.
    pub fn batch_size(&self) -> usize {
        self.images.dims()[0]
    }
}

/// Everything one training or validation step produces.
///
/// The loss and the accuracy are computed inside the graph, so callers only read them.
#[derive(Debug, Clone)]
pub struct MaskOutput<B: Backend> {
    /// Weighted mask loss plus the L2 penalty, the value that is minimized.
    pub loss: Tensor<B, 1>,
    /// Unweighted mask loss.
    pub mask_loss: Tensor<B, 1>,
    /// Mask accuracy of the batch.
    pub mask_accuracy: Tensor<B, 1>,
    /// Predicted mask probabilities.
    pub mask: Tensor<B, 4>,
    /// Target masks.
    pub targets: Tensor<B, 4>,
}

impl<B: Backend> MaskOutput<B> {
    /// Create a new mask output.
    pub const fn new(
        loss: Tensor<B, 1>,
        mask_loss: Tensor<B, 1>,
        mask_accuracy: Tensor<B, 1>,
        mask: Tensor<B, 4>,
        targets: Tensor<B, 4>,
    ) -> Self {
        Self {
            loss,
            mask_loss,
            mask_accuracy,
            mask,
            targets,
        }
    }

    /// Get the batch size.
    pub fn batch_size(&self) -> usize {
        self.mask.dims()[0]
    }

    /// The unweighted mask loss as a metric input.
    pub fn mask_loss_input(&self) -> MaskLossInput<B> {
        MaskLossInput::new(self.mask_loss.clone(), self.batch_size())
    }
}

impl<B: Backend> ItemLazy for MaskOutput<B> {
    type ItemSync = Self;

    fn sync(self) -> Self::ItemSync {
        self
    }
}

impl<B: Backend> Adaptor<MaskMetricInput<B>> for MaskOutput<B> {
    fn adapt(&self) -> MaskMetricInput<B> {
        MaskMetricInput::new(self.mask.clone(), self.targets.clone())
    }
}

impl<B: Backend> Adaptor<MaskLossInput<B>> for MaskOutput<B> {
    fn adapt(&self) -> MaskLossInput<B> {
        MaskLossInput::new(self.loss.clone(), self.batch_size())
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn mask_batch_new_creates_correct_structure() {
        let device = Default::default();

        let images =
            Tensor::<TestBackend, 4>::random([4, 3, 32, 48], Distribution::Default, &device);
        let masks = Tensor::<TestBackend, 4>::zeros([4, 4, 32, 48], &device);

        let batch = MaskBatch::new(images, masks);

        assert_eq!(batch.images.dims(), [4, 3, 32, 48]);
        assert_eq!(batch.masks.dims(), [4, 4, 32, 48]);
        assert_eq!(batch.batch_size(), 4);
    }

    #[test]
    fn mask_output_new_creates_correct_structure() {
        let device = Default::default();
        let mask = Tensor::<TestBackend, 4>::random([2, 4, 8, 8], Distribution::Default, &device);
        let scalar = || Tensor::<TestBackend, 1>::zeros([1], &device);

        let output = MaskOutput::new(scalar(), scalar(), scalar(), mask.clone(), mask);

        assert_eq!(output.mask.dims(), [2, 4, 8, 8]);
        assert_eq!(output.loss.dims(), [1]);
        assert_eq!(output.batch_size(), 2);
    }

    #[test]
    fn mask_output_adapts_to_metric_inputs() {
        let device = Default::default();
        let mask = Tensor::<TestBackend, 4>::random([3, 1, 4, 4], Distribution::Default, &device);
        let targets = Tensor::<TestBackend, 4>::ones([3, 1, 4, 4], &device);
        let output = MaskOutput::new(
            Tensor::from_floats([1.5], &device),
            Tensor::from_floats([0.5], &device),
            Tensor::from_floats([0.25], &device),
            mask.clone(),
            targets.clone(),
        );

        let metric: MaskMetricInput<TestBackend> = output.adapt();
        let loss: MaskLossInput<TestBackend> = output.adapt();
        let mask_loss = output.mask_loss_input();

        metric.predictions.into_data().assert_eq(&mask.into_data(), true);
        metric.targets.into_data().assert_eq(&targets.into_data(), true);
        assert_eq!(loss.batch_size, 3);
        assert_eq!(loss.loss.into_scalar(), 1.5);
        assert_eq!(mask_loss.loss.into_scalar(), 0.5);
    }
}
