//! Spatial quadrants folded into channels.

use burn::prelude::*;

use crate::error::{ModelError, ModelResult};

/// Splits the height then the width in half and concatenates the four quadrants
/// on the channel axis, top-left first and bottom-right last.
#[derive(Module, Clone, Debug, Default)]
pub struct SplitConcatLayer;

impl SplitConcatLayer {
    pub const fn new() -> Self {
        Self
    }

    /// # Shapes
    ///
    /// - input: `[batch_size, channels, height, width]`
    /// - output: `[batch_size, 4 * channels, height / 2, width / 2]`
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidTensorShape`] when the height or the width is odd.
    pub fn forward<B: Backend>(&self, input: Tensor<B, 4>) -> ModelResult<Tensor<B, 4>> {
        let [batch_size, channels, height, width] = input.dims();
        if height % 2 != 0 || width % 2 != 0 {
            return Err(ModelError::InvalidTensorShape {
                expected: "even height and width".to_string(),
                actual: format!("{:?}", input.dims()),
            });
        }

        let (h, w) = (height / 2, width / 2);
        let mut quadrants = Vec::with_capacity(4);
        for rows in [0..h, h..height] {
            for cols in [0..w, w..width] {
                quadrants.push(input.clone().slice([
                    0..batch_size,
                    0..channels,
                    rows.clone(),
                    cols,
                ]));
            }
        }

        Ok(Tensor::cat(quadrants, 1))
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::TensorData;

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn quadrants_are_ordered_height_outer() {
        let device = Default::default();
        let values: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let input =
            Tensor::<TestBackend, 4>::from_data(TensorData::new(values, [1, 1, 4, 4]), &device);

        let output = SplitConcatLayer::new().forward(input).unwrap();

        assert_eq!(output.dims(), [1, 4, 2, 2]);
        let expected = TensorData::new(
            vec![
                0.0_f32, 1.0, 4.0, 5.0, // top-left
                2.0, 3.0, 6.0, 7.0, // top-right
                8.0, 9.0, 12.0, 13.0, // bottom-left
                10.0, 11.0, 14.0, 15.0, // bottom-right
            ],
            [1, 4, 2, 2],
        );
        output.into_data().assert_eq(&expected, false);
    }

    #[test]
    fn odd_sizes_are_rejected() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 4>::zeros([1, 2, 5, 4], &device);

        let err = SplitConcatLayer::new().forward(input).unwrap_err();

        assert!(matches!(err, ModelError::InvalidTensorShape { .. }));
    }
}
