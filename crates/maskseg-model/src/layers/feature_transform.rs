//! Stacking feature maps on a new axis and reducing the stack back to a vector.

use burn::prelude::*;

use crate::error::{ModelError, ModelResult};

/// Stacks `k` feature maps of identical shape on a new axis 1.
#[derive(Module, Clone, Debug, Default)]
pub struct FeatureTransformLayer;

impl FeatureTransformLayer {
    pub const fn new() -> Self {
        Self
    }

    /// # Shapes
    ///
    /// - inputs: `k` tensors of `[batch_size, channels, height, width]`
    /// - output: `[batch_size, k, channels, height, width]`
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidTensorShape`] for an empty list or mismatched shapes.
    pub fn forward<B: Backend>(&self, inputs: Vec<Tensor<B, 4>>) -> ModelResult<Tensor<B, 5>> {
        let Some(first) = inputs.first() else {
            return Err(ModelError::InvalidTensorShape {
                expected: "at least one feature map".to_string(),
                actual: "none".to_string(),
            });
        };

        let dims = first.dims();
        if let Some(other) = inputs.iter().find(|t| t.dims() != dims) {
            return Err(ModelError::InvalidTensorShape {
                expected: format!("{dims:?}"),
                actual: format!("{:?}", other.dims()),
            });
        }

        Ok(Tensor::stack(inputs, 1))
    }
}

/// Sums a stack of feature maps and flattens the result per sample.
#[derive(Module, Clone, Debug, Default)]
pub struct FlatConvLayer;

impl FlatConvLayer {
    pub const fn new() -> Self {
        Self
    }

    /// # Shapes
    ///
    /// - input: `[batch_size, k, channels, height, width]`
    /// - output: `[batch_size, channels * height * width]`
    pub fn forward<B: Backend>(&self, input: Tensor<B, 5>) -> Tensor<B, 2> {
        let [batch_size, _, channels, height, width] = input.dims();
        input
            .sum_dim(1)
            .reshape([batch_size, channels * height * width])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn transform_stacks_on_axis_one() {
        let device = Default::default();
        let maps = (0..3)
            .map(|i| Tensor::<TestBackend, 4>::full([2, 4, 3, 3], i as f32, &device))
            .collect();

        let stacked = FeatureTransformLayer::new().forward(maps).unwrap();

        assert_eq!(stacked.dims(), [2, 3, 4, 3, 3]);
        let last = stacked.slice([0..2, 2..3, 0..4, 0..3, 0..3]);
        assert_eq!(last.mean().into_scalar(), 2.0);
    }

    #[test]
    fn transform_rejects_mismatched_maps() {
        let device = Default::default();
        let maps = vec![
            Tensor::<TestBackend, 4>::zeros([1, 4, 3, 3], &device),
            Tensor::<TestBackend, 4>::zeros([1, 4, 2, 3], &device),
        ];

        assert!(FeatureTransformLayer::new().forward(maps).is_err());
        assert!(FeatureTransformLayer::new()
            .forward(Vec::<Tensor<TestBackend, 4>>::new())
            .is_err());
    }

    #[test]
    fn flat_conv_sums_then_flattens() {
        let device = Default::default();
        let maps = (1..=3)
            .map(|i| Tensor::<TestBackend, 4>::full([2, 4, 3, 3], i as f32, &device))
            .collect();
        let stacked = FeatureTransformLayer::new().forward(maps).unwrap();

        let flat = FlatConvLayer::new().forward(stacked);

        assert_eq!(flat.dims(), [2, 36]);
        assert_eq!(flat.clone().min().into_scalar(), 6.0);
        assert_eq!(flat.max().into_scalar(), 6.0);
    }
}
