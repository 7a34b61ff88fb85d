//! Soft Dice coefficient and loss.
//!
//! ```text
//! Dice = (2 * sum(y * p) + smooth) / (sum(y) + sum(p) + smooth)
//! Loss = 1 - Dice
//! ```
//!
//! Sums run over every element of the batch, so the coefficient is a single overlap
//! score for the whole batch rather than a mean of per-image scores.

use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Tensor},
};

/// Soft Dice coefficient over all elements of `predictions` and `targets`.
///
/// # Shapes
///
/// - predictions: `[batch_size, channels, height, width]`
/// - targets: `[batch_size, channels, height, width]`
/// - output: `[1]`
pub fn dice_coefficient<B: Backend>(
    predictions: Tensor<B, 4>,
    targets: Tensor<B, 4>,
    smooth: f64,
) -> Tensor<B, 1> {
    assert_eq!(
        predictions.dims(),
        targets.dims(),
        "Shape of predictions ({:?}) must match targets ({:?})",
        predictions.dims(),
        targets.dims()
    );

    let intersection = predictions.clone().mul(targets.clone()).sum();
    let total = targets.sum().add(predictions.sum());

    intersection
        .mul_scalar(2.0)
        .add_scalar(smooth)
        .div(total.add_scalar(smooth))
}

/// Configuration for creating a [Dice loss](DiceLoss).
#[derive(Config, Debug)]
pub struct DiceLossConfig {
    /// Smoothing constant added to numerator and denominator. Default: 1.0
    #[config(default = 1.0)]
    pub smooth: f64,
}

impl DiceLossConfig {
    /// Initialize [Dice loss](DiceLoss).
    pub fn init(&self) -> DiceLoss {
        assert!(
            self.smooth >= 0.0,
            "Smoothing for DiceLoss must be non-negative, got {}",
            self.smooth
        );
        DiceLoss {
            smooth: self.smooth,
        }
    }
}

/// `1 - Dice` loss.
#[derive(Module, Clone, Debug)]
pub struct DiceLoss {
    /// Smoothing constant.
    pub smooth: f64,
}

impl Default for DiceLoss {
    fn default() -> Self {
        DiceLossConfig::new().init()
    }
}

impl DiceLoss {
    /// Compute the loss.
    ///
    /// # Shapes
    ///
    /// - predictions: `[batch_size, channels, height, width]`
    /// - targets: `[batch_size, channels, height, width]`
    /// - output: `[1]`
    pub fn forward<B: Backend>(&self, predictions: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
        dice_coefficient(predictions, targets, self.smooth)
            .neg()
            .add_scalar(1.0)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use burn::tensor::TensorData;

    use super::*;
    use crate::tests::TestBackend;

    fn mask(values: Vec<f32>) -> Tensor<TestBackend, 4> {
        let len = values.len();
        Tensor::from_data(TensorData::new(values, [1, 1, 1, len]), &Default::default())
    }

    #[test]
    fn dice_is_one_for_identical_masks() {
        let target = mask(vec![1.0, 0.0, 1.0, 1.0]);

        let dice = dice_coefficient(target.clone(), target, 1.0).into_scalar();

        assert_relative_eq!(dice, 1.0);
    }

    #[test]
    fn dice_without_smoothing_is_exact_overlap() {
        let prediction = mask(vec![1.0, 1.0, 0.0, 0.0]);
        let target = mask(vec![1.0, 0.0, 1.0, 0.0]);

        let dice = dice_coefficient(prediction, target, 0.0).into_scalar();

        assert_relative_eq!(dice, 0.5);
    }

    #[test]
    fn dice_loss_is_one_minus_coefficient() {
        let prediction = mask(vec![0.5, 0.5, 0.0, 0.0]);
        let target = mask(vec![1.0, 0.0, 0.0, 0.0]);

        let loss = DiceLoss::default().forward(prediction, target).into_scalar();

        // (2 * 0.5 + 1) / (1 + 1 + 1)
        assert_relative_eq!(loss, 1.0 - 2.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn dice_with_smoothing_is_one_for_empty_masks() {
        let empty = mask(vec![0.0; 4]);

        let dice = dice_coefficient(empty.clone(), empty, 1.0).into_scalar();

        assert_relative_eq!(dice, 1.0);
    }
}
