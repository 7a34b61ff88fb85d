//! Binary cross-entropy on probabilities.
//!
//! ```text
//! BCE = mean(-y * ln(p + eps) - (1 - y) * ln(1 - p + eps))
//! ```
//!
//! The predictions are sigmoid outputs, not logits. The additive epsilon keeps the
//! logarithms finite for saturated predictions.

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    nn::loss::Reduction,
    tensor::{backend::Backend, Tensor},
};

/// Configuration for creating a [binary cross-entropy loss](BinaryCrossEntropy).
#[derive(Config, Debug)]
pub struct BinaryCrossEntropyConfig {
    /// Value added inside the logarithms. Default: 1e-9
    #[config(default = 1e-9)]
    pub epsilon: f64,
}

impl BinaryCrossEntropyConfig {
    /// Initialize [binary cross-entropy loss](BinaryCrossEntropy).
    pub fn init(&self) -> BinaryCrossEntropy {
        self.assertions();
        BinaryCrossEntropy {
            epsilon: self.epsilon,
        }
    }

    fn assertions(&self) {
        assert!(
            self.epsilon > 0.0,
            "Epsilon for BinaryCrossEntropy must be positive, got {}",
            self.epsilon
        );
    }
}

/// Binary cross-entropy between probabilities and binary targets.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct BinaryCrossEntropy {
    /// Value added inside the logarithms.
    pub epsilon: f64,
}

impl Default for BinaryCrossEntropy {
    fn default() -> Self {
        BinaryCrossEntropyConfig::new().init()
    }
}

impl ModuleDisplay for BinaryCrossEntropy {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content.add("epsilon", &self.epsilon).optional()
    }
}

impl BinaryCrossEntropy {
    /// Compute the criterion with reduction.
    ///
    /// # Shapes
    ///
    /// - predictions: `[batch_size, channels, height, width]`
    /// - targets: `[batch_size, channels, height, width]`
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        predictions: Tensor<B, 4>,
        targets: Tensor<B, 4>,
        reduction: Reduction,
    ) -> Tensor<B, 1> {
        let loss = self.forward_no_reduction(predictions, targets);
        match reduction {
            Reduction::Mean | Reduction::Auto => loss.mean(),
            Reduction::Sum => loss.sum(),
        }
    }

    /// Compute the mean criterion of every sample.
    ///
    /// # Shapes
    ///
    /// - predictions: `[batch_size, channels, height, width]`
    /// - targets: `[batch_size, channels, height, width]`
    /// - output: `[batch_size]`
    pub fn forward_no_reduction<B: Backend>(
        &self,
        predictions: Tensor<B, 4>,
        targets: Tensor<B, 4>,
    ) -> Tensor<B, 1> {
        assert_eq!(
            predictions.dims(),
            targets.dims(),
            "Shape of predictions ({:?}) must match targets ({:?})",
            predictions.dims(),
            targets.dims()
        );
        let [batch_size, ..] = predictions.dims();

        let positive = targets
            .clone()
            .mul(predictions.clone().add_scalar(self.epsilon).log());
        let negative = targets
            .neg()
            .add_scalar(1.0)
            .mul(predictions.neg().add_scalar(1.0).add_scalar(self.epsilon).log());

        positive
            .add(negative)
            .neg()
            .reshape([batch_size as i32, -1])
            .mean_dim(1)
            .squeeze(1)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use burn::tensor::TensorData;

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn bce_matches_hand_computed_value() {
        let device = Default::default();
        let predictions = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![0.9_f32, 0.2, 0.6, 0.1], [1, 1, 2, 2]),
            &device,
        );
        let targets = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![1.0_f32, 0.0, 1.0, 0.0], [1, 1, 2, 2]),
            &device,
        );

        let loss = BinaryCrossEntropy::default()
            .forward(predictions, targets, Reduction::Mean)
            .into_scalar();

        let expected =
            -(0.9_f32.ln() + 0.8_f32.ln() + 0.6_f32.ln() + 0.9_f32.ln()) / 4.0;
        assert_relative_eq!(loss, expected, epsilon = 1e-5);
    }

    #[test]
    fn bce_is_finite_for_saturated_predictions() {
        let device = Default::default();
        let predictions = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![0.0_f32, 1.0], [1, 1, 1, 2]),
            &device,
        );
        let targets = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![1.0_f32, 0.0], [1, 1, 1, 2]),
            &device,
        );

        let loss = BinaryCrossEntropy::default()
            .forward(predictions, targets, Reduction::Mean)
            .into_scalar();

        assert!(loss.is_finite());
        assert!(loss > 10.0);
    }

    #[test]
    fn bce_no_reduction_is_per_sample() {
        let device = Default::default();
        let predictions = Tensor::<TestBackend, 4>::full([3, 2, 4, 4], 0.5, &device);
        let targets = Tensor::<TestBackend, 4>::ones([3, 2, 4, 4], &device);

        let loss = BinaryCrossEntropy::default().forward_no_reduction(predictions, targets);

        assert_eq!(loss.dims(), [3]);
        assert_relative_eq!(loss.sum().into_scalar(), 3.0 * 2.0_f32.ln(), epsilon = 1e-5);
    }

    #[test]
    #[should_panic(expected = "Epsilon for BinaryCrossEntropy must be positive")]
    fn bce_rejects_non_positive_epsilon() {
        let _ = BinaryCrossEntropyConfig::new().with_epsilon(0.0).init();
    }
}
