//! Bilinear crop-and-resize from normalized boxes.
//!
//! Sampling follows the usual `crop_and_resize` convention: a box `[y1, x1, y2, x2]`
//! in `[0, 1]` coordinates maps to pixel rows `y1 * (H - 1) ..= y2 * (H - 1)`, sampled at
//! `crop_h` evenly spaced positions. A crop of size 1 samples the box centre.

use burn::{
    prelude::*,
    tensor::{Int, TensorData},
};

/// Crop every box out of `input` and resize it to `crop_size` with bilinear sampling.
///
/// The same boxes are applied to every image of the batch.
///
/// # Shapes
///
/// - input: `[batch_size, channels, height, width]`
/// - output: one `[batch_size, channels, crop_h, crop_w]` tensor per box
pub fn crop_and_resize<B: Backend>(
    input: Tensor<B, 4>,
    boxes: &[[f32; 4]],
    crop_size: [usize; 2],
) -> Vec<Tensor<B, 4>> {
    let [_, _, height, width] = input.dims();
    let [crop_h, crop_w] = crop_size;
    let device = input.device();

    boxes
        .iter()
        .map(|&[y1, x1, y2, x2]| {
            let rows = SampleAxis::new(y1, y2, height, crop_h);
            let cols = SampleAxis::new(x1, x2, width, crop_w);

            let resized = rows.interpolate::<B>(input.clone(), 2, &device);
            cols.interpolate::<B>(resized, 3, &device)
        })
        .collect()
}

/// Sample positions along one spatial axis, split into neighbour indices and weights.
struct SampleAxis {
    lower: Vec<i64>,
    upper: Vec<i64>,
    weights: Vec<f32>,
}

impl SampleAxis {
    fn new(start: f32, end: f32, size: usize, samples: usize) -> Self {
        let last = size.saturating_sub(1) as f32;
        let positions: Vec<f32> = if samples > 1 {
            let step = (end - start) * last / (samples - 1) as f32;
            (0..samples)
                .map(|i| start * last + i as f32 * step)
                .collect()
        } else {
            vec![0.5 * (start + end) * last]
        };

        let mut lower = Vec::with_capacity(samples);
        let mut upper = Vec::with_capacity(samples);
        let mut weights = Vec::with_capacity(samples);

        for position in positions {
            let position = position.clamp(0.0, last);
            let floor = position.floor();
            let low = floor as usize;
            let high = (low + 1).min(size.saturating_sub(1));

            lower.push(low as i64);
            upper.push(high as i64);
            weights.push(position - floor);
        }

        Self {
            lower,
            upper,
            weights,
        }
    }

    fn interpolate<B: Backend>(
        &self,
        input: Tensor<B, 4>,
        dim: usize,
        device: &B::Device,
    ) -> Tensor<B, 4> {
        let samples = self.weights.len();
        let lower = Tensor::<B, 1, Int>::from_data(
            TensorData::new(self.lower.clone(), [samples]),
            device,
        );
        let upper = Tensor::<B, 1, Int>::from_data(
            TensorData::new(self.upper.clone(), [samples]),
            device,
        );

        let mut shape = [1; 4];
        shape[dim] = samples;
        let weights =
            Tensor::<B, 1>::from_data(TensorData::new(self.weights.clone(), [samples]), device)
                .reshape(shape);

        let low = input.clone().select(dim, lower);
        let high = input.select(dim, upper);

        let delta = high.sub(low.clone());
        low.add(delta.mul(weights))
    }
}

/// Pad the spatial dimensions of `input` with `padding` zeros on every side.
///
/// # Shapes
///
/// - input: `[batch_size, channels, height, width]`
/// - output: `[batch_size, channels, height + 2 * padding, width + 2 * padding]`
pub fn zero_pad2d<B: Backend>(input: Tensor<B, 4>, padding: usize) -> Tensor<B, 4> {
    if padding == 0 {
        return input;
    }
    input.pad((padding, padding, padding, padding), 0.0)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use burn::backend::NdArray;

    use super::*;

    type TestBackend = NdArray<f32>;

    fn ramp(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 4> {
        // Value at (y, x) is 10 * y + x.
        let values: Vec<f32> = (0..4)
            .flat_map(|y| (0..4).map(move |x| (10 * y + x) as f32))
            .collect();
        Tensor::from_data(TensorData::new(values, [1, 1, 4, 4]), device)
    }

    #[test]
    fn full_box_at_input_size_is_identity() {
        let device = Default::default();
        let input = ramp(&device);

        let crops = crop_and_resize(input.clone(), &[[0.0, 0.0, 1.0, 1.0]], [4, 4]);

        assert_eq!(crops.len(), 1);
        let diff = crops[0].clone().sub(input).abs().max().into_scalar();
        assert!(diff < 1e-5);
    }

    #[test]
    fn bilinear_samples_between_pixels() {
        let device = Default::default();
        let input = ramp(&device);

        // Rows 0 ..= 1.5 and columns 0 ..= 1.5, sampled at 2 points each.
        let crops = crop_and_resize(input, &[[0.0, 0.0, 0.5, 0.5]], [2, 2]);
        let values = crops[0].clone().into_data().to_vec::<f32>().unwrap();

        assert_relative_eq!(values[0], 0.0, epsilon = 1e-5);
        assert_relative_eq!(values[1], 1.5, epsilon = 1e-5);
        assert_relative_eq!(values[2], 15.0, epsilon = 1e-5);
        assert_relative_eq!(values[3], 16.5, epsilon = 1e-5);
    }

    #[test]
    fn single_sample_uses_box_centre() {
        let device = Default::default();
        let input = ramp(&device);

        let crops = crop_and_resize(input, &[[0.0, 0.0, 1.0, 1.0]], [1, 1]);

        assert_eq!(crops[0].dims(), [1, 1, 1, 1]);
        assert_relative_eq!(crops[0].clone().into_scalar(), 16.5, epsilon = 1e-5);
    }

    #[test]
    fn crop_shape_is_independent_of_input_size() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 4>::ones([2, 3, 13, 9], &device);

        let crops = crop_and_resize(input, &[[0.0, 0.0, 0.5, 0.5], [0.5, 0.5, 1.0, 1.0]], [7, 7]);

        assert_eq!(crops.len(), 2);
        for crop in crops {
            assert_eq!(crop.dims(), [2, 3, 7, 7]);
        }
    }

    #[test]
    fn zero_pad2d_grows_spatial_dims() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 4>::ones([1, 2, 4, 5], &device);

        let padded = zero_pad2d(input, 3);

        assert_eq!(padded.dims(), [1, 2, 10, 11]);
        assert_relative_eq!(padded.sum().into_scalar(), 40.0);
    }
}
