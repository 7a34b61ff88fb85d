//! Combined mask loss: binary cross-entropy plus weighted Dice loss.
//!
//! ```text
//! MaskLoss = BCE(p, y) + dice_weight * (1 - Dice(p, y))
//! ```

use burn::{
    config::Config,
    module::Module,
    nn::loss::Reduction,
    tensor::{backend::Backend, Tensor},
};

use crate::{BinaryCrossEntropy, BinaryCrossEntropyConfig, DiceLoss, DiceLossConfig};

/// Configuration for creating a [mask loss](MaskLoss).
#[derive(Config, Debug)]
pub struct MaskLossConfig {
    /// Weight of the Dice term. Default: 4.0
    #[config(default = 4.0)]
    pub dice_weight: f64,
    /// Dice smoothing constant. Default: 1.0
    #[config(default = 1.0)]
    pub smooth: f64,
    /// Epsilon inside the cross-entropy logarithms. Default: 1e-9
    #[config(default = 1e-9)]
    pub epsilon: f64,
}

impl MaskLossConfig {
    /// Plain `BCE + Dice loss` with unit Dice weight.
    pub fn bce_dice() -> Self {
        Self::new().with_dice_weight(1.0)
    }

    /// Initialize [mask loss](MaskLoss).
    pub fn init(&self) -> MaskLoss {
        assert!(
            self.dice_weight >= 0.0,
            "Dice weight for MaskLoss must be non-negative, got {}",
            self.dice_weight
        );
        MaskLoss {
            bce: BinaryCrossEntropyConfig::new()
                .with_epsilon(self.epsilon)
                .init(),
            dice: DiceLossConfig::new().with_smooth(self.smooth).init(),
            dice_weight: self.dice_weight,
        }
    }
}

/// Segmentation mask loss.
#[derive(Module, Clone, Debug)]
pub struct MaskLoss {
    /// Cross-entropy term.
    pub bce: BinaryCrossEntropy,
    /// Dice term.
    pub dice: DiceLoss,
    /// Weight of the Dice term.
    pub dice_weight: f64,
}

impl Default for MaskLoss {
    fn default() -> Self {
        MaskLossConfig::new().init()
    }
}

impl MaskLoss {
    /// Compute the loss.
    ///
    /// # Shapes
    ///
    /// - predictions: `[batch_size, classes, height, width]`, probabilities
    /// - targets: `[batch_size, classes, height, width]`, binary masks
    /// - output: `[1]`
    pub fn forward<B: Backend>(&self, predictions: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
        let bce = self
            .bce
            .forward(predictions.clone(), targets.clone(), Reduction::Mean);
        let dice = self.dice.forward(predictions, targets);

        bce.add(dice.mul_scalar(self.dice_weight))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use burn::tensor::TensorData;

    use super::*;
    use crate::tests::{TestAutodiffBackend, TestBackend};

    #[test]
    fn mask_loss_combines_terms_with_weight() {
        let device = Default::default();
        let predictions = Tensor::<TestBackend, 4>::full([1, 2, 2, 2], 0.5, &device);
        let targets = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![1.0_f32, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0], [1, 2, 2, 2]),
            &device,
        );

        let loss = MaskLoss::default()
            .forward(predictions, targets)
            .into_scalar();

        // BCE = ln 2, Dice = (2 * 2 + 1) / (4 + 4 + 1)
        let expected = 2.0_f32.ln() + 4.0 * (1.0 - 5.0 / 9.0);
        assert_relative_eq!(loss, expected, epsilon = 1e-5);
    }

    #[test]
    fn bce_dice_preset_uses_unit_weight() {
        let loss = MaskLossConfig::bce_dice().init();
        assert_relative_eq!(loss.dice_weight, 1.0);
        assert_relative_eq!(loss.dice.smooth, 1.0);
    }

    #[test]
    fn perfect_prediction_has_near_zero_loss() {
        let device = Default::default();
        let targets = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![1.0_f32, 0.0, 0.0, 1.0], [1, 1, 2, 2]),
            &device,
        );

        let loss = MaskLoss::default()
            .forward(targets.clone(), targets)
            .into_scalar();

        assert!(loss < 1e-6);
    }

    #[test]
    fn mask_loss_produces_gradients() {
        let device = Default::default();
        let predictions =
            Tensor::<TestAutodiffBackend, 4>::full([1, 1, 2, 2], 0.3, &device).require_grad();
        let targets = Tensor::<TestAutodiffBackend, 4>::ones([1, 1, 2, 2], &device);

        let loss = MaskLoss::default().forward(predictions.clone(), targets);
        let grads = loss.backward();

        let grad = predictions.grad(&grads).expect("gradient for predictions");
        // Raising the prediction towards the target lowers the loss.
        assert!(grad.max().into_scalar() < 0.0);
    }
}
