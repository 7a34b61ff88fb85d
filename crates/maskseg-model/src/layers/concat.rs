//! Channel concatenation.

use burn::prelude::*;

/// Concatenates feature maps of the same spatial size along the channel axis.
#[derive(Module, Clone, Debug, Default)]
pub struct ConcatFeatureLayer;

impl ConcatFeatureLayer {
    pub const fn new() -> Self {
        Self
    }

    /// # Shapes
    ///
    /// - inputs: `[batch_size, channels_i, height, width]`
    /// - output: `[batch_size, sum(channels_i), height, width]`
    pub fn forward<B: Backend>(&self, inputs: Vec<Tensor<B, 4>>) -> Tensor<B, 4> {
        Tensor::cat(inputs, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn concat_keeps_input_order() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 4>::zeros([2, 3, 4, 4], &device);
        let b = Tensor::<TestBackend, 4>::ones([2, 5, 4, 4], &device);

        let output = ConcatFeatureLayer::new().forward(vec![a, b]);

        assert_eq!(output.dims(), [2, 8, 4, 4]);
        let sum = output.slice([0..2, 3..8, 0..4, 0..4]).sum().into_scalar();
        assert_eq!(sum, (2 * 5 * 16) as f32);
    }
}
