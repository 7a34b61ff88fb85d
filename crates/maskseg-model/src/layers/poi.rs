//! Pyramid of interest pooling.

use burn::{module::Ignored, prelude::*};
use maskseg_extra_ops::crop_and_resize;

use crate::error::{ModelError, ModelResult};

/// Tiles the unit square into `s x s` boxes for every scale `s`.
///
/// Boxes are normalized `[y1, x1, y2, x2]`, scales follow the order of `scales`
/// and each grid is emitted row by row.
pub fn generate_boxes_by_scale(scales: &[usize]) -> Vec<[f32; 4]> {
    let mut boxes = Vec::with_capacity(scales.iter().map(|s| s * s).sum());

    for &scale in scales {
        let step = 1.0 / scale as f32;
        for i in 0..scale {
            for j in 0..scale {
                boxes.push([
                    i as f32 * step,
                    j as f32 * step,
                    (i + 1) as f32 * step,
                    (j + 1) as f32 * step,
                ]);
            }
        }
    }

    boxes
}

/// Configuration for the [POI layer](PoiLayer).
#[derive(Config, Debug)]
pub struct PoiLayerConfig {
    /// Height and width every box is resized to.
    pub pool_shape: [usize; 2],
    /// Grid sizes of the box pyramid.
    #[config(default = "vec![8, 4, 2, 1]")]
    pub scales: Vec<usize>,
}

impl PoiLayerConfig {
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidConfiguration`] for an empty or non-positive
    /// scale list and for an empty pool shape.
    pub fn init(&self) -> ModelResult<PoiLayer> {
        if self.scales.is_empty() || self.scales.contains(&0) {
            return Err(ModelError::InvalidConfiguration {
                reason: format!("POI scales must be positive, got {:?}", self.scales),
            });
        }
        if self.pool_shape.contains(&0) {
            return Err(ModelError::InvalidConfiguration {
                reason: format!("POI pool shape must be positive, got {:?}", self.pool_shape),
            });
        }

        Ok(PoiLayer {
            pool_shape: self.pool_shape,
            boxes: Ignored(generate_boxes_by_scale(&self.scales)),
        })
    }
}

/// Crops every pyramid box out of the input and stacks the crops along the height axis.
#[derive(Module, Clone, Debug)]
pub struct PoiLayer {
    pool_shape: [usize; 2],
    boxes: Ignored<Vec<[f32; 4]>>,
}

impl PoiLayer {
    /// Number of pooled boxes.
    pub fn num_boxes(&self) -> usize {
        self.boxes.len()
    }

    /// # Shapes
    ///
    /// - input: `[batch_size, channels, height, width]`
    /// - output: `[batch_size, channels, pool_h * num_boxes, pool_w]`, whatever the
    ///   input resolution
    pub fn forward<B: Backend>(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let crops = crop_and_resize(input, &self.boxes, self.pool_shape);
        Tensor::cat(crops, 2)
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn single_scale_tiles_unit_square() {
        let boxes = generate_boxes_by_scale(&[2]);

        assert_eq!(
            boxes,
            vec![
                [0.0, 0.0, 0.5, 0.5],
                [0.0, 0.5, 0.5, 1.0],
                [0.5, 0.0, 1.0, 0.5],
                [0.5, 0.5, 1.0, 1.0],
            ]
        );
    }

    #[test]
    fn default_pyramid_has_85_boxes() {
        let boxes = generate_boxes_by_scale(&[8, 4, 2, 1]);

        assert_eq!(boxes.len(), 85);
        assert_eq!(boxes[64], [0.0, 0.0, 0.25, 0.25]);
        assert_eq!(boxes[84], [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn boxes_of_one_scale_do_not_overlap() {
        let scale = 3;
        let boxes = generate_boxes_by_scale(&[scale]);
        let area: f32 = boxes
            .iter()
            .map(|[y1, x1, y2, x2]| (y2 - y1) * (x2 - x1))
            .sum();

        assert_eq!(boxes.len(), scale * scale);
        assert!((area - 1.0).abs() < 1e-6);
        for pair in boxes.windows(2) {
            // row-major: same row shares y1 and x advances, next row starts at x = 0
            let ([y1a, _, _, x2a], [y1b, x1b, _, _]) = (pair[0], pair[1]);
            assert!((y1a == y1b && (x1b - x2a).abs() < 1e-6) || x1b == 0.0);
        }
    }

    #[test]
    fn poi_output_height_is_independent_of_input_size() {
        let device = Default::default();
        let layer = PoiLayerConfig::new([3, 4]).init().unwrap();

        for [height, width] in [[16, 16], [13, 29]] {
            let input = Tensor::<TestBackend, 4>::random(
                [2, 5, height, width],
                Distribution::Default,
                &device,
            );

            let output = layer.forward(input);

            assert_eq!(output.dims(), [2, 5, 3 * 85, 4]);
        }
    }

    #[test]
    fn whole_image_box_is_last() {
        let device = Default::default();
        let layer = PoiLayerConfig::new([2, 2])
            .with_scales(vec![2, 1])
            .init()
            .unwrap();
        let input = Tensor::<TestBackend, 4>::from_data(
            [[[[1.0_f32, 2.0], [3.0, 4.0]]]],
            &device,
        );

        let output = layer.forward(input.clone());

        assert_eq!(layer.num_boxes(), 5);
        assert_eq!(output.dims(), [1, 1, 10, 2]);
        let whole = output.slice([0..1, 0..1, 8..10, 0..2]);
        let diff = whole.sub(input).abs().max().into_scalar();
        assert!(diff < 1e-6);
    }

    #[test]
    fn zero_scale_or_pool_size_is_rejected() {
        for config in [
            PoiLayerConfig::new([3, 4]).with_scales(vec![2, 0]),
            PoiLayerConfig::new([3, 4]).with_scales(Vec::new()),
            PoiLayerConfig::new([0, 4]),
        ] {
            let err = config.init().unwrap_err();
            assert!(matches!(err, ModelError::InvalidConfiguration { .. }));
        }
    }
}
